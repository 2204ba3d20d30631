//! Pool and segment-reader traits (ambient component J): the "interface-
//! shaped collaborator" pattern from `spec.md` §9 applied to buffer pooling.
//! This crate defines the interfaces plus one allocate-on-demand reference
//! implementation of each so it's usable standalone; a real deployment
//! supplies its own pool backed by whatever allocator/arena strategy it
//! likes.

use bytes::{Bytes, BytesMut};

/// Pools the growable buffers backing a stream's [`crate::bitstream::BitWriter`].
pub trait BytesPool: std::fmt::Debug + Send + Sync {
    fn acquire(&self, capacity: usize) -> BytesMut;
    fn release(&self, buf: BytesMut);
}

/// Allocates a fresh buffer on every acquire and drops it on release.
#[derive(Debug, Default)]
pub struct HeapBytesPool;

impl BytesPool for HeapBytesPool {
    fn acquire(&self, capacity: usize) -> BytesMut {
        BytesMut::with_capacity(capacity)
    }

    fn release(&self, _buf: BytesMut) {}
}

/// Pools whole [`crate::encoder::Encoder`] instances across `Close`/`Reset`
/// cycles (`spec.md` §4.H, §5).
pub trait EncoderPool: std::fmt::Debug + Send + Sync {
    fn acquire(&self) -> Option<Box<crate::encoder::Encoder>>;
    fn release(&self, encoder: Box<crate::encoder::Encoder>);
}

/// Never retains encoders; `Close` simply drops them.
#[derive(Debug, Default)]
pub struct NoopEncoderPool;

impl EncoderPool for NoopEncoderPool {
    fn acquire(&self) -> Option<Box<crate::encoder::Encoder>> {
        None
    }

    fn release(&self, _encoder: Box<crate::encoder::Encoder>) {}
}

/// A read-only view over a committed byte range, returned by
/// [`crate::encoder::Encoder::stream`] and [`crate::encoder::Encoder::discard`].
pub trait SegmentSink: std::fmt::Debug + Send + Sync {
    fn bytes(&self) -> &[u8];
    /// Length of meaningful content in bits; may be less than `bytes().len() * 8`
    /// when the final byte is only partially filled.
    fn bit_len(&self) -> usize;
}

/// Default [`SegmentSink`]: an owned, reference-counted byte range.
#[derive(Debug, Clone)]
pub struct Segment {
    bytes: Bytes,
    bit_len: usize,
}

impl Segment {
    pub fn new(bytes: Bytes, bit_len: usize) -> Self {
        Self { bytes, bit_len }
    }

    pub fn empty() -> Self {
        Self {
            bytes: Bytes::new(),
            bit_len: 0,
        }
    }
}

impl SegmentSink for Segment {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bit_len(&self) -> usize {
        self.bit_len
    }
}

/// Pools [`SegmentSink`] instances returned by `Stream` (`spec.md` §5).
pub trait SegmentReaderPool: std::fmt::Debug + Send + Sync {
    fn acquire(&self, bytes: Bytes, bit_len: usize) -> Box<dyn SegmentSink>;
    fn release(&self, segment: Box<dyn SegmentSink>);
}

/// Allocates a fresh [`Segment`] on every acquire and drops it on release.
#[derive(Debug, Default)]
pub struct HeapSegmentReaderPool;

impl SegmentReaderPool for HeapSegmentReaderPool {
    fn acquire(&self, bytes: Bytes, bit_len: usize) -> Box<dyn SegmentSink> {
        Box::new(Segment::new(bytes, bit_len))
    }

    fn release(&self, _segment: Box<dyn SegmentSink>) {}
}
