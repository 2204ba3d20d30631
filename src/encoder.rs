//! The encoder driver (component G) and its lifecycle operations
//! (component H): the state machine that ties the bit-stream writer,
//! timestamp sub-coder, custom-field coders, and residual proto path
//! together into the `(timestamp, protobuf bytes) -> bits` contract.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;

use crate::bitstream::{write_varint, BitSink, BitWriter};
use crate::error::{invariant_violation, EncodeError};
use crate::fields::{classify, CustomCoder, CustomFieldSlot, SchemaDescr, CUSTOM_TYPE_TAG_BITS};
use crate::pool::{
    BytesPool, EncoderPool, HeapBytesPool, HeapSegmentReaderPool, SegmentReaderPool, SegmentSink,
};
use crate::proto::{RawMessage, RawValue, ResidualCoder};
use crate::timestamp::{DeltaOfDeltaCoder, TimeUnit, TimestampCoder};

/// Construction and pooling options for an [`Encoder`] (`spec.md` §6.2).
pub struct EncoderOptions {
    pub bytes_pool: Arc<dyn BytesPool>,
    pub encoder_pool: Option<Arc<dyn EncoderPool>>,
    pub segment_reader_pool: Arc<dyn SegmentReaderPool>,
    pub default_time_unit: TimeUnit,
    pub byte_field_dictionary_lru_size: usize,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            bytes_pool: Arc::new(HeapBytesPool),
            encoder_pool: None,
            segment_reader_pool: Arc::new(HeapSegmentReaderPool),
            default_time_unit: TimeUnit::Seconds,
            byte_field_dictionary_lru_size: 32,
        }
    }
}

/// Byte accounting for a stream (`spec.md` §4.G "Query operations").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
}

/// The single-writer streaming encoder state machine (`spec.md` §4.G).
pub struct Encoder {
    stream: BitWriter,
    bytes_pool: Arc<dyn BytesPool>,
    encoder_pool: Option<Arc<dyn EncoderPool>>,
    segment_reader_pool: Arc<dyn SegmentReaderPool>,
    default_time_unit: TimeUnit,
    byte_field_dictionary_lru_size: usize,

    timestamp_coder: Box<dyn TimestampCoder>,

    deploy_id: Option<String>,
    custom_fields: Vec<CustomFieldSlot>,
    residual_fields: Vec<u32>,
    residual_coder: ResidualCoder,

    num_encoded: u64,
    last_encoded_timestamp: u64,
    has_encoded_schema: bool,
    hard_err: Option<EncodeError>,
    closed: bool,
    stats: Stats,
}

impl Encoder {
    pub fn new(start_time: u64, options: EncoderOptions) -> Self {
        let default_time_unit = options.default_time_unit;
        tracing::debug!(start_time, ?default_time_unit, "encoder created");
        Self {
            stream: BitWriter::new(),
            bytes_pool: options.bytes_pool,
            encoder_pool: options.encoder_pool,
            segment_reader_pool: options.segment_reader_pool,
            default_time_unit,
            byte_field_dictionary_lru_size: options.byte_field_dictionary_lru_size,
            timestamp_coder: Box::new(DeltaOfDeltaCoder::new(default_time_unit)),
            deploy_id: None,
            custom_fields: Vec::new(),
            residual_fields: Vec::new(),
            residual_coder: ResidualCoder::new(),
            num_encoded: 0,
            last_encoded_timestamp: 0,
            has_encoded_schema: false,
            hard_err: None,
            closed: false,
            stats: Stats::default(),
        }
    }

    /// Injects a non-default timestamp sub-coder, e.g. a fault-injecting
    /// test double for `spec.md` §8 end-to-end scenario 5.
    pub fn with_timestamp_coder(mut self, coder: Box<dyn TimestampCoder>) -> Self {
        self.timestamp_coder = coder;
        self
    }

    /// `spec.md` §4.H: `SetSchema(None)` clears schema state; `SetSchema(Some(descr))`
    /// is a no-op when `descr.deploy_id()` is non-empty and unchanged, otherwise
    /// re-classifies fields and resets `has_encoded_schema`.
    pub fn set_schema(&mut self, descr: Option<Box<dyn SchemaDescr>>) {
        match descr {
            None => {
                self.deploy_id = None;
                self.custom_fields.clear();
                self.residual_fields.clear();
                self.has_encoded_schema = false;
            }
            Some(descr) => {
                let deploy_id = descr.deploy_id().to_string();
                if !deploy_id.is_empty() && self.deploy_id.as_deref() == Some(deploy_id.as_str()) {
                    return;
                }
                tracing::debug!(deploy_id = %deploy_id, "schema change detected");
                let previous = if self.custom_fields.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut self.custom_fields))
                };
                let (custom_fields, residual_fields) =
                    classify(descr.as_ref(), self.byte_field_dictionary_lru_size, previous);
                self.custom_fields = custom_fields;
                self.residual_fields = residual_fields;
                self.deploy_id = Some(deploy_id);
                self.has_encoded_schema = false;
            }
        }
    }

    /// Encodes one `(timestamp, protobuf bytes)` sample (`spec.md` §4.G "Encode").
    pub fn encode(
        &mut self,
        timestamp: u64,
        time_unit: TimeUnit,
        proto_bytes: &[u8],
    ) -> Result<(), EncodeError> {
        self.check_usable()?;
        if self.deploy_id.is_none() {
            invariant_violation("SchemaMissing");
        }

        let mut message = RawMessage::decode(proto_bytes).map_err(EncodeError::UnmarshalFailed)?;

        let known_fields: HashSet<u32> = self
            .custom_fields
            .iter()
            .map(|slot| slot.field_number)
            .chain(self.residual_fields.iter().copied())
            .collect();
        for field_number in message.field_numbers() {
            if !known_fields.contains(&field_number) {
                return Err(EncodeError::UnknownFields { field_number });
            }
        }

        if self.num_encoded == 0 {
            write_varint(&mut self.stream, 1);
            write_varint(&mut self.stream, self.byte_field_dictionary_lru_size as u64);
        }

        let schema_change = !self.has_encoded_schema;
        let time_unit_change = time_unit != self.timestamp_coder.time_unit();

        if schema_change || time_unit_change {
            self.stream.write_bit(true);
            self.stream.write_bit(true);
            self.stream.write_bit(time_unit_change);
            self.stream.write_bit(schema_change);
        } else {
            self.stream.write_bit(false);
        }

        // Past this point the control prefix is committed: every failure is hard.
        if let Err(err) =
            self.encode_body(timestamp, time_unit, schema_change, time_unit_change, &mut message)
        {
            tracing::warn!(error = %err, "encoder entering hard-failed state");
            self.hard_err = Some(err.clone());
            return Err(err);
        }

        self.num_encoded += 1;
        self.last_encoded_timestamp = timestamp;
        self.stats.uncompressed_bytes += proto_bytes.len() as u64;
        Ok(())
    }

    fn encode_body(
        &mut self,
        timestamp: u64,
        time_unit: TimeUnit,
        schema_change: bool,
        time_unit_change: bool,
        message: &mut RawMessage,
    ) -> Result<(), EncodeError> {
        if time_unit_change {
            self.timestamp_coder.write_time_unit(&mut self.stream, time_unit);
        }
        if schema_change {
            self.write_custom_schema_block();
            self.has_encoded_schema = true;
        }

        self.timestamp_coder
            .write_time(&mut self.stream, timestamp, time_unit)
            .map_err(EncodeError::TimestampEncodeFailed)?;

        for slot in &mut self.custom_fields {
            let raw_values = message.get(slot.field_number).map(|values| values.to_vec());
            encode_custom_field(&mut self.stream, slot, raw_values.as_deref())?;
            message.remove(slot.field_number);
        }

        let diff = self.residual_coder.diff_and_prune(message, &self.residual_fields);
        if !diff.changed {
            self.stream.write_bit(false);
        } else {
            self.stream.write_bit(true);
            if diff.changed_to_default.is_empty() {
                self.stream.write_bit(false);
            } else {
                self.stream.write_bit(true);
                ResidualCoder::encode_bitset(&mut self.stream, &diff.changed_to_default);
            }
            let marshaled = message.encode().map_err(EncodeError::MarshalFailed)?;
            write_varint(&mut self.stream, marshaled.len() as u64);
            self.stream.write_bytes(&marshaled);
        }

        Ok(())
    }

    /// `spec.md` §4.G "Custom-schema block".
    fn write_custom_schema_block(&mut self) {
        let max = self
            .custom_fields
            .iter()
            .map(|slot| slot.field_number)
            .max()
            .unwrap_or(0);
        write_varint(&mut self.stream, max as u64);
        for field_number in 1..=max {
            let tag = self
                .custom_fields
                .iter()
                .find(|slot| slot.field_number == field_number)
                .map(|slot| slot.kind.schema_tag())
                .unwrap_or(0);
            self.stream.write_bits(tag, CUSTOM_TYPE_TAG_BITS);
        }
    }

    fn check_usable(&self) -> Result<(), EncodeError> {
        if self.closed {
            return Err(EncodeError::EncoderClosed);
        }
        if let Some(err) = &self.hard_err {
            return Err(EncodeError::HardFailed(Box::new(err.clone())));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stream.len_bits()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.len_bits() == 0
    }

    pub fn num_encoded(&self) -> u64 {
        self.num_encoded
    }

    pub fn last_encoded(&self) -> Result<u64, EncodeError> {
        self.check_usable()?;
        if self.num_encoded == 0 {
            return Err(EncodeError::NoEncodedDatapoints);
        }
        Ok(self.last_encoded_timestamp)
    }

    pub fn stats(&self) -> Result<Stats, EncodeError> {
        self.check_usable()?;
        Ok(Stats {
            uncompressed_bytes: self.stats.uncompressed_bytes,
            compressed_bytes: (self.stream.len_bits() as u64 + 7) / 8,
        })
    }

    /// Borrow of the underlying byte slice. Unsafe with respect to
    /// subsequent writes: any further `encode` call may reallocate the
    /// backing buffer, invalidating this borrow's assumptions about length
    /// (enforced here by the borrow checker tying the lifetime to `&self`).
    pub fn bytes(&self) -> &[u8] {
        self.stream.as_bytes()
    }

    /// A read-only segment over a **copy** of the current bytes (`spec.md`
    /// §4.G "Stream"). Returns an empty segment when nothing has been
    /// written yet.
    pub fn stream(&self) -> Result<Box<dyn SegmentSink>, EncodeError> {
        self.check_usable()?;
        let (bytes, _) = self.stream.raw_bytes();
        let copy = Bytes::copy_from_slice(bytes);
        Ok(self.segment_reader_pool.acquire(copy, self.stream.len_bits()))
    }

    /// Takes ownership of the accumulated buffer and closes the encoder
    /// (`spec.md` §4.G "Discard").
    pub fn discard(&mut self) -> Box<dyn SegmentSink> {
        let bit_len = self.stream.len_bits();
        let bytes = self.stream.discard();
        self.closed = true;
        self.segment_reader_pool.acquire(bytes, bit_len)
    }

    /// `Discard` followed by `Reset`, for pooled reuse (`spec.md` §4.G
    /// "DiscardReset").
    pub fn discard_reset(
        &mut self,
        start_time: u64,
        capacity: usize,
        schema: Option<Box<dyn SchemaDescr>>,
    ) -> Box<dyn SegmentSink> {
        let segment = self.discard();
        self.reset(start_time, capacity, schema);
        segment
    }

    /// Reverts all per-stream state (`spec.md` §4.H "Reset"): schema is
    /// re-applied via `set_schema` (forced, bypassing the unchanged-deploy-id
    /// no-op, since a reset always re-derives classification from scratch),
    /// the timestamp sub-coder and residual-diff state are reinitialised,
    /// counters and error flags are cleared, and a freshly pooled buffer of
    /// `capacity` replaces the old one.
    pub fn reset(
        &mut self,
        start_time: u64,
        capacity: usize,
        schema: Option<Box<dyn SchemaDescr>>,
    ) {
        tracing::debug!(start_time, capacity, "encoder reset");

        let old_buf = self.stream.take_buffer();
        self.bytes_pool.release(old_buf);
        let fresh_buf = self.bytes_pool.acquire(capacity);
        self.stream = BitWriter::with_pooled_buffer(fresh_buf);

        self.timestamp_coder.reset(self.default_time_unit);
        self.residual_coder.reset();

        self.deploy_id = None;
        self.custom_fields.clear();
        self.residual_fields.clear();
        self.set_schema(schema);

        self.num_encoded = 0;
        self.last_encoded_timestamp = 0;
        self.hard_err = None;
        self.closed = false;
        self.stats = Stats::default();
    }

    /// Idempotently marks the encoder permanently unusable (`spec.md` §4.H
    /// "Close"). Does not return the instance to an [`EncoderPool`] — use
    /// [`Encoder::close_into_pool`] for that, since returning to a pool
    /// requires giving up ownership of `self`.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Consumes the encoder, closing it and handing it back to its
    /// configured [`EncoderPool`] (if any) for reuse via a subsequent
    /// `Reset`.
    pub fn close_into_pool(mut self) {
        self.closed = true;
        if let Some(pool) = self.encoder_pool.take() {
            pool.release(Box::new(self));
        }
    }
}

fn encode_custom_field(
    sink: &mut dyn BitSink,
    slot: &mut CustomFieldSlot,
    raw_values: Option<&[RawValue]>,
) -> Result<(), EncodeError> {
    let raw = raw_values.and_then(|values| values.first());
    let field_number = slot.field_number;

    match &mut slot.coder {
        CustomCoder::Double(coder) => {
            let bits = match raw {
                None => 0u64,
                Some(RawValue::Fixed64(bits)) => *bits,
                Some(_) => return Err(EncodeError::FieldTypeMismatch { field_number }),
            };
            coder.write(sink, bits);
        }
        CustomCoder::Float(coder) => {
            let bits = match raw {
                None => 0u64,
                Some(RawValue::Fixed32(bits)) => *bits as u64,
                Some(_) => return Err(EncodeError::FieldTypeMismatch { field_number }),
            };
            coder.write(sink, bits);
        }
        CustomCoder::Int(coder) => {
            let value = match raw {
                None => 0u64,
                Some(RawValue::Varint(v)) => *v,
                Some(_) => return Err(EncodeError::FieldTypeMismatch { field_number }),
            };
            coder.write(sink, value);
        }
        CustomCoder::Bytes(coder) => {
            let bytes: Vec<u8> = match raw {
                None => Vec::new(),
                Some(RawValue::LengthDelimited(bytes)) => bytes.to_vec(),
                Some(_) => return Err(EncodeError::FieldTypeMismatch { field_number }),
            };
            coder.write(sink, &bytes);
        }
        CustomCoder::Bool(coder) => {
            let value = match raw {
                None => false,
                Some(RawValue::Varint(v)) => *v != 0,
                Some(_) => return Err(EncodeError::FieldTypeMismatch { field_number }),
            };
            coder.write(sink, value);
        }
    }
    Ok(())
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(0, EncoderOptions::default())
    }
}
