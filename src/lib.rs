//! Streaming protobuf time-series encoder.
//!
//! Turns a sequence of `(timestamp, protobuf-message-bytes)` samples
//! conforming to one externally-supplied schema into a compact,
//! append-only bit stream: a delta-of-delta timestamp coder, per-field
//! custom coders (float/int/bytes/bool), and a residual protobuf
//! diff-merge path for everything else. See [`encoder::Encoder`] for the
//! entry point.
//!
//! Decoding is intentionally not part of this crate — the bit-stream
//! format is documented on [`encoder::Encoder::encode`] for a paired
//! decoder to implement separately.

pub mod bitstream;
pub mod encoder;
pub mod error;
pub mod fields;
pub mod pool;
pub mod proto;
pub mod timestamp;

pub use encoder::{Encoder, EncoderOptions, Stats};
pub use error::EncodeError;
pub use fields::{FieldDescr, FieldKind, SchemaDescr, StaticSchemaDescr};
pub use pool::{BytesPool, EncoderPool, Segment, SegmentReaderPool, SegmentSink};
pub use timestamp::{TimeUnit, TimestampCoder};
