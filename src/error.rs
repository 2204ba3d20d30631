//! Error kinds (`spec.md` §7), implemented with `thiserror` in the style the
//! teacher's wider family (`opentelemetry-rust-contrib`) uses for its
//! exporter crates.
//!
//! `spec.md` distinguishes three tiers:
//! - **soft** errors, raised before any control bits for the current sample
//!   are written — the encoder stays usable.
//! - **hard** errors, raised after the control prefix is committed — they
//!   set the encoder's sticky `hardErr` state.
//! - **invariant violations**, which indicate a programming bug rather than
//!   bad input and are surfaced as a panic, not a `Result`, so callers can't
//!   silently swallow them.

use crate::proto::{DecodeProtoError, EncodeProtoError};
use crate::timestamp::TimestampError;

/// Errors returned by [`crate::encoder::Encoder::encode`] and the other
/// fallible operations on `Encoder`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EncodeError {
    /// The encoder has no schema set (`spec.md` §4.G precondition). This
    /// variant exists for completeness; `Encoder::encode` raises it via
    /// [`invariant_violation`] rather than returning it, since a schemaless
    /// `encode` call is a caller bug, not a runtime condition.
    #[error("encoder has no schema set")]
    SchemaMissing,

    #[error("encoder is closed")]
    EncoderClosed,

    /// A previous sample left the encoder permanently unusable.
    #[error("encoder is in a hard-failed state: {0}")]
    HardFailed(Box<EncodeError>),

    #[error("annotation contains a field not present in the schema: field {field_number}")]
    UnknownFields { field_number: u32 },

    #[error("failed to unmarshal annotation bytes: {0}")]
    UnmarshalFailed(#[from] DecodeProtoError),

    #[error("custom field {field_number} did not match its declared wire type")]
    FieldTypeMismatch { field_number: u32 },

    #[error("failed to marshal residual proto message: {0}")]
    MarshalFailed(#[from] EncodeProtoError),

    #[error("timestamp sub-coder failed: {0}")]
    TimestampEncodeFailed(#[from] TimestampError),

    #[error("no datapoints have been encoded yet")]
    NoEncodedDatapoints,

    /// A bytes-dictionary entry's recorded byte range fell outside the
    /// current stream buffer. Should-never-happen invariant; like
    /// `SchemaMissing`, raised via [`invariant_violation`].
    #[error("bytes dictionary entry points outside the stream buffer")]
    DictionaryOutOfBounds,
}

/// Panics with a message identifying which `spec.md` §7 invariant was
/// violated. Invariant violations are programming bugs, not recoverable
/// runtime errors, so they never travel through a `Result`.
#[track_caller]
pub fn invariant_violation(kind: &str) -> ! {
    panic!("protoseries invariant violation: {kind}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "protoseries invariant violation: SchemaMissing")]
    fn invariant_violation_panics_with_kind() {
        invariant_violation("SchemaMissing");
    }

    #[test]
    fn hard_failed_wraps_original_cause() {
        let err = EncodeError::HardFailed(Box::new(EncodeError::NoEncodedDatapoints));
        assert!(err.to_string().contains("no datapoints"));
    }
}
