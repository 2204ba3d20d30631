//! The residual protobuf path (component F): a schema-driven, dynamic wire
//! model (`RawMessage`) plus the diff-against-last / bitset-of-defaults
//! encoding from `spec.md` §4.F.
//!
//! Schemas here are opaque handles supplied at runtime (`spec.md` §1 calls
//! the schema registry an out-of-scope external collaborator), so there is
//! no generated Rust struct per message type to marshal against. Instead
//! this module walks the wire format directly with `prost::encoding`'s
//! low-level varint/key primitives — the same building blocks `prost`'s own
//! derive macro expands into — which keeps unmarshal/marshal grounded in the
//! ecosystem's protobuf implementation without requiring `.proto` code
//! generation for a schema this crate never sees ahead of time.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::encoding::{decode_key, decode_varint, encode_key, encode_varint, WireType};

use crate::bitstream::{write_varint, BitSink};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DecodeProtoError {
    #[error("truncated protobuf wire data")]
    Truncated,
    #[error("unsupported wire type {0:?} on field {1}")]
    UnsupportedWireType(WireType, u32),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EncodeProtoError {
    #[error("field {0}'s length-delimited payload exceeds the varint length limit")]
    PayloadTooLarge(u32),
}

/// One decoded field value, tagged by wire type. Semantics (double vs.
/// sint32 vs. plain int64, etc.) are layered on top by the caller — this
/// model only knows about the four protobuf wire types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    LengthDelimited(Bytes),
}

impl RawValue {
    /// Proto3's notion of "this is the type's default value" at the wire
    /// level: zero for numeric kinds, empty for length-delimited kinds.
    /// Proto3 never puts a default scalar on the wire in the first place,
    /// so this doubles as "would have been omitted by a real encoder."
    pub fn is_default(&self) -> bool {
        match self {
            RawValue::Varint(v) => *v == 0,
            RawValue::Fixed64(v) => *v == 0,
            RawValue::Fixed32(v) => *v == 0,
            RawValue::LengthDelimited(b) => b.is_empty(),
        }
    }

    fn wire_type(&self) -> WireType {
        match self {
            RawValue::Varint(_) => WireType::Varint,
            RawValue::Fixed64(_) => WireType::SixtyFourBit,
            RawValue::Fixed32(_) => WireType::ThirtyTwoBit,
            RawValue::LengthDelimited(_) => WireType::LengthDelimited,
        }
    }
}

/// A protobuf message represented purely at the wire level: an ordered list
/// of `(field number, repeated values)`. Ordered by first appearance so
/// re-marshaling a pruned message stays deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    fields: Vec<(u32, Vec<RawValue>)>,
}

impl RawMessage {
    pub fn decode(mut buf: &[u8]) -> Result<Self, DecodeProtoError> {
        let mut fields: Vec<(u32, Vec<RawValue>)> = Vec::new();
        while buf.has_remaining() {
            let (field_num, wire_type) =
                decode_key(&mut buf).map_err(|_| DecodeProtoError::Truncated)?;
            let value = match wire_type {
                WireType::Varint => {
                    RawValue::Varint(decode_varint(&mut buf).map_err(|_| DecodeProtoError::Truncated)?)
                }
                WireType::SixtyFourBit => {
                    if buf.remaining() < 8 {
                        return Err(DecodeProtoError::Truncated);
                    }
                    RawValue::Fixed64(buf.get_u64_le())
                }
                WireType::ThirtyTwoBit => {
                    if buf.remaining() < 4 {
                        return Err(DecodeProtoError::Truncated);
                    }
                    RawValue::Fixed32(buf.get_u32_le())
                }
                WireType::LengthDelimited => {
                    let len = decode_varint(&mut buf).map_err(|_| DecodeProtoError::Truncated)? as usize;
                    if buf.remaining() < len {
                        return Err(DecodeProtoError::Truncated);
                    }
                    let bytes = Bytes::copy_from_slice(&buf.chunk()[..len]);
                    buf.advance(len);
                    RawValue::LengthDelimited(bytes)
                }
                other => return Err(DecodeProtoError::UnsupportedWireType(other, field_num)),
            };
            match fields.iter_mut().find(|(n, _)| *n == field_num) {
                Some((_, values)) => values.push(value),
                None => fields.push((field_num, vec![value])),
            }
        }
        Ok(Self { fields })
    }

    pub fn get(&self, field_number: u32) -> Option<&[RawValue]> {
        self.fields
            .iter()
            .find(|(n, _)| *n == field_number)
            .map(|(_, v)| v.as_slice())
    }

    pub fn remove(&mut self, field_number: u32) {
        self.fields.retain(|(n, _)| *n != field_number);
    }

    pub fn set(&mut self, field_number: u32, values: Vec<RawValue>) {
        self.remove(field_number);
        if !values.is_empty() {
            self.fields.push((field_number, values));
        }
    }

    pub fn field_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.fields.iter().map(|(n, _)| *n)
    }

    pub fn encode(&self) -> Result<Bytes, EncodeProtoError> {
        let mut buf = BytesMut::new();
        for (num, values) in &self.fields {
            for v in values {
                encode_key(*num, v.wire_type(), &mut buf);
                match v {
                    RawValue::Varint(x) => encode_varint(*x, &mut buf),
                    RawValue::Fixed64(x) => buf.put_u64_le(*x),
                    RawValue::Fixed32(x) => buf.put_u32_le(*x),
                    RawValue::LengthDelimited(b) => {
                        if b.len() as u64 > u32::MAX as u64 {
                            return Err(EncodeProtoError::PayloadTooLarge(*num));
                        }
                        encode_varint(b.len() as u64, &mut buf);
                        buf.put_slice(b);
                    }
                }
            }
        }
        Ok(buf.freeze())
    }
}

/// Result of diffing one sample's residual fields against the last encoded
/// message (`spec.md` §4.F step 1).
pub struct ResidualDiff {
    pub changed: bool,
    /// Field numbers (1-indexed, as protobuf field numbers are) whose new
    /// value equals that field's proto3 default.
    pub changed_to_default: Vec<u32>,
}

/// Component F: diff-against-last residual proto encoding. Owns the last
/// accepted message so it can compare future samples against it.
#[derive(Debug, Default)]
pub struct ResidualCoder {
    last: RawMessage,
}

impl ResidualCoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.last = RawMessage::default();
    }

    /// Compares `message`'s residual fields against the last accepted
    /// sample, clearing every unchanged field from `message` in place (so
    /// the caller can marshal the pruned remainder), and updates the
    /// internal last-encoded state for the fields that did change.
    pub fn diff_and_prune(&mut self, message: &mut RawMessage, residual_fields: &[u32]) -> ResidualDiff {
        let mut changed = false;
        let mut changed_to_default = Vec::new();

        for &field_num in residual_fields {
            let current = message.get(field_num).map(|v| v.to_vec());
            let previous = self.last.get(field_num).map(|v| v.to_vec());

            if current == previous {
                message.remove(field_num);
                continue;
            }

            changed = true;
            let is_default = match &current {
                None => true,
                Some(values) => values.iter().all(RawValue::is_default),
            };
            if is_default {
                changed_to_default.push(field_num);
            }
            match current {
                Some(values) => self.last.set(field_num, values),
                None => self.last.remove(field_num),
            }
        }

        ResidualDiff {
            changed,
            changed_to_default,
        }
    }

    /// Encodes the `spec.md` §4.F "encodeBitset" format: `varint(max)`
    /// followed by one bit per field number in `[1, max]`, set iff that
    /// field number appears in `values`.
    pub fn encode_bitset(sink: &mut dyn BitSink, values: &[u32]) {
        let max = values.iter().copied().max().unwrap_or(0);
        write_varint(sink, max as u64);
        for i in 0..max {
            let field_num = i + 1;
            sink.write_bit(values.contains(&field_num));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_field(num: u32, value: RawValue) -> Bytes {
        let mut msg = RawMessage::default();
        msg.set(num, vec![value]);
        msg.encode().unwrap()
    }

    #[test]
    fn roundtrip_varint_field() {
        let bytes = encode_field(3, RawValue::Varint(150));
        let decoded = RawMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.get(3), Some(&[RawValue::Varint(150)][..]));
    }

    #[test]
    fn roundtrip_length_delimited_field() {
        let bytes = encode_field(7, RawValue::LengthDelimited(Bytes::from_static(b"hello")));
        let decoded = RawMessage::decode(&bytes).unwrap();
        assert_eq!(
            decoded.get(7),
            Some(&[RawValue::LengthDelimited(Bytes::from_static(b"hello"))][..])
        );
    }

    #[test]
    fn unchanged_fields_are_pruned() {
        let mut coder = ResidualCoder::new();
        let mut msg = RawMessage::default();
        msg.set(5, vec![RawValue::Varint(9)]);
        let diff = coder.diff_and_prune(&mut msg, &[5]);
        assert!(diff.changed);
        assert!(msg.get(5).is_some());

        let mut msg2 = RawMessage::default();
        msg2.set(5, vec![RawValue::Varint(9)]);
        let diff2 = coder.diff_and_prune(&mut msg2, &[5]);
        assert!(!diff2.changed);
        assert!(msg2.get(5).is_none());
    }

    #[test]
    fn changed_to_default_tracks_reset_fields() {
        let mut coder = ResidualCoder::new();
        let mut msg = RawMessage::default();
        msg.set(2, vec![RawValue::Varint(5)]);
        coder.diff_and_prune(&mut msg, &[2]);

        let mut msg2 = RawMessage::default(); // field 2 absent == reset to default
        let diff = coder.diff_and_prune(&mut msg2, &[2]);
        assert!(diff.changed);
        assert_eq!(diff.changed_to_default, vec![2]);
    }

    #[test]
    fn bitset_max_zero_has_no_trailing_bits() {
        let mut w = crate::bitstream::BitWriter::new();
        ResidualCoder::encode_bitset(&mut w, &[]);
        assert_eq!(w.len_bits(), 8); // varint(0) only, one byte, no bit loop iterations
    }

    #[test]
    fn bitset_marks_one_indexed_positions() {
        let mut w = crate::bitstream::BitWriter::new();
        ResidualCoder::encode_bitset(&mut w, &[1, 3]);
        let (bytes, _) = w.raw_bytes();
        let mut r = crate::bitstream::BitReader::new(bytes, w.len_bits());
        assert_eq!(r.read_varint(), Some(3));
        assert_eq!(r.read_bit(), Some(true)); // field 1 -> bit 0
        assert_eq!(r.read_bit(), Some(false)); // field 2 -> bit 1
        assert_eq!(r.read_bit(), Some(true)); // field 3 -> bit 2
    }
}
