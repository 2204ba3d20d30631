//! The timestamp sub-coder (component C). `spec.md` §1 lists this as an
//! external, black-box collaborator exposed only through its API
//! (`WriteTime`, `WriteTimeUnit`, current `TimeUnit`); this module defines
//! that contract as a trait plus the one concrete implementation the crate
//! ships, a delta-of-delta coder adapted from the teacher crate's
//! `Encoder::encode_delta_of_delta`.
//!
//! The driver never relies on this coder's own bit-level markers for
//! schema or time-unit changes (`spec.md` §4.C) — those are carried
//! out-of-band in the encoder's control prefix (`spec.md` §4.G step 6).

use crate::bitstream::BitSink;

/// The unit a stream's timestamps are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

/// Failure from the timestamp sub-coder. `spec.md` treats this coder as a
/// black box that can fail; in this implementation it is effectively
/// infallible (delta-of-delta has an escape bucket for any `i64`), but the
/// contract keeps a `Result` so a different sub-coder implementation (or a
/// future one bounded to fewer bits) has somewhere to report failure.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("timestamp delta {0} does not fit the sub-coder's representation")]
    DeltaOutOfRange(i64),
}

/// External contract for the timestamp sub-coder (`spec.md` §4.C).
pub trait TimestampCoder {
    /// Encodes `ts` (already converted to `time_unit`'s granularity by the
    /// caller) onto `sink`.
    fn write_time(
        &mut self,
        sink: &mut dyn BitSink,
        ts: u64,
        time_unit: TimeUnit,
    ) -> Result<(), TimestampError>;

    /// Emits an out-of-band-triggered time-unit-change block. Called by the
    /// driver only when `time_unit != self.time_unit()`, immediately after
    /// the encoder's own control prefix (`spec.md` §4.G step 7).
    fn write_time_unit(&mut self, sink: &mut dyn BitSink, time_unit: TimeUnit);

    /// The unit this coder currently believes it is encoding in.
    fn time_unit(&self) -> TimeUnit;

    /// Reverts all per-stream coder state (called from `Encoder::reset`).
    fn reset(&mut self, time_unit: TimeUnit);
}

/// Delta-of-delta timestamp coder, bucketed exactly like the teacher's
/// Gorilla implementation:
///
/// | dod == 0       | `0`                   | 1 bit   |
/// | [-63, 64]      | `10` + 7-bit value    | 9 bits  |
/// | [-255, 256]    | `110` + 9-bit value   | 12 bits |
/// | [-2047, 2048]  | `1110` + 12-bit value | 16 bits |
/// | otherwise      | `1111` + 64-bit value | 68 bits |
///
/// Unlike the teacher, this coder never reserves the `1111` bucket for an
/// end-of-stream sentinel — that control path belongs to this crate's own
/// `ControlPrefix` (`spec.md` §6.1), not to the sub-coder.
#[derive(Debug, Clone)]
pub struct DeltaOfDeltaCoder {
    time_unit: TimeUnit,
    samples_seen: u64,
    prev_timestamp: u64,
    prev_delta: i64,
}

impl DeltaOfDeltaCoder {
    pub fn new(time_unit: TimeUnit) -> Self {
        Self {
            time_unit,
            samples_seen: 0,
            prev_timestamp: 0,
            prev_delta: 0,
        }
    }

    fn encode_delta_of_delta(sink: &mut dyn BitSink, dod: i64) {
        if dod == 0 {
            sink.write_bit(false);
        } else if (-63..=64).contains(&dod) {
            sink.write_bits(0b10, 2);
            sink.write_bits((dod as u64) & 0x7F, 7);
        } else if (-255..=256).contains(&dod) {
            sink.write_bits(0b110, 3);
            sink.write_bits((dod as u64) & 0x1FF, 9);
        } else if (-2047..=2048).contains(&dod) {
            sink.write_bits(0b1110, 4);
            sink.write_bits((dod as u64) & 0xFFF, 12);
        } else {
            sink.write_bits(0b1111, 4);
            sink.write_bits(dod as u64, 64);
        }
    }
}

impl TimestampCoder for DeltaOfDeltaCoder {
    fn write_time(
        &mut self,
        sink: &mut dyn BitSink,
        ts: u64,
        _time_unit: TimeUnit,
    ) -> Result<(), TimestampError> {
        match self.samples_seen {
            0 => {
                sink.write_bits(ts, 64);
            }
            1 => {
                let delta = ts as i64 - self.prev_timestamp as i64;
                Self::encode_delta_of_delta(sink, delta);
                self.prev_delta = delta;
            }
            _ => {
                let delta = ts as i64 - self.prev_timestamp as i64;
                let dod = delta - self.prev_delta;
                Self::encode_delta_of_delta(sink, dod);
                self.prev_delta = delta;
            }
        }
        self.prev_timestamp = ts;
        self.samples_seen += 1;
        Ok(())
    }

    fn write_time_unit(&mut self, sink: &mut dyn BitSink, time_unit: TimeUnit) {
        let code: u64 = match time_unit {
            TimeUnit::Seconds => 0,
            TimeUnit::Milliseconds => 1,
            TimeUnit::Microseconds => 2,
            TimeUnit::Nanoseconds => 3,
        };
        sink.write_bits(code, 2);
        self.time_unit = time_unit;
    }

    fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    fn reset(&mut self, time_unit: TimeUnit) {
        self.time_unit = time_unit;
        self.samples_seen = 0;
        self.prev_timestamp = 0;
        self.prev_delta = 0;
    }
}
