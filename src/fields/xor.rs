//! The floating-point custom coder: TSZ-style XOR compression against the
//! previous value, adapted from the teacher's `Encoder::encode_value`.
//!
//! Control-bit layout: a bit for "identical to previous", then (if not) a
//! bit for "reuse previous window", and when neither applies, a **5-bit**
//! leading-zero count (clamped to 31) plus a **6-bit** meaningful-bit count
//! minus one. The teacher's own bit widths (6+6, storing the count itself)
//! are narrower here on the leading-zero side; the meaningful-width field
//! stores `meaningful - 1` rather than `meaningful`, the same trick the
//! teacher uses, since a full-width double (`meaningful == 64`) does not
//! fit in 6 bits but `meaningful - 1` always fits in `0..=63`.

use crate::bitstream::BitSink;

const LEADING_ZERO_BITS: u8 = 5;
const MEANINGFUL_WIDTH_BITS: u8 = 6;
const MAX_LEADING_ZEROS: u32 = 31;

/// XOR coder over a fixed bit width (32 for `float`, 64 for `double`).
#[derive(Debug, Clone)]
pub struct XorCoder {
    width: u8,
    prev_bits: u64,
    prev_leading: u32,
    prev_trailing: u32,
    seen_value: bool,
}

impl XorCoder {
    pub fn new(width: u8) -> Self {
        debug_assert!(width == 32 || width == 64);
        Self {
            width,
            prev_bits: 0,
            prev_leading: width as u32,
            prev_trailing: 0,
            seen_value: false,
        }
    }

    pub fn has_seen_value(&self) -> bool {
        self.seen_value
    }

    /// Encodes one value's raw bit pattern (`f64::to_bits`/`f32::to_bits`
    /// widened into the low bits of a `u64`).
    pub fn write(&mut self, sink: &mut dyn BitSink, bits: u64) {
        if !self.seen_value {
            sink.write_bits(bits, self.width);
            self.prev_bits = bits;
            self.prev_leading = self.width as u32;
            self.prev_trailing = 0;
            self.seen_value = true;
            return;
        }

        let xor = self.prev_bits ^ bits;
        if xor == 0 {
            sink.write_bit(false);
            return;
        }
        sink.write_bit(true);

        let leading = (xor.leading_zeros() - (64 - self.width as u32)).min(MAX_LEADING_ZEROS);
        let trailing = xor.trailing_zeros();

        if leading >= self.prev_leading
            && trailing >= self.prev_trailing
            && self.prev_leading + self.prev_trailing < self.width as u32
        {
            sink.write_bit(false);
            let meaningful = self.width as u32 - self.prev_leading - self.prev_trailing;
            let shifted = xor >> self.prev_trailing;
            sink.write_bits(shifted, meaningful as u8);
        } else {
            sink.write_bit(true);
            sink.write_bits(leading as u64, LEADING_ZERO_BITS);
            let meaningful = self.width as u32 - leading - trailing;
            sink.write_bits((meaningful - 1) as u64, MEANINGFUL_WIDTH_BITS);
            let shifted = xor >> trailing;
            sink.write_bits(shifted, meaningful as u8);
            self.prev_leading = leading;
            self.prev_trailing = trailing;
        }

        self.prev_bits = bits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::{BitReader, BitWriter};

    #[test]
    fn first_value_is_written_raw() {
        let mut coder = XorCoder::new(64);
        let mut w = BitWriter::new();
        coder.write(&mut w, 1.0_f64.to_bits());
        assert_eq!(w.len_bits(), 64);
    }

    #[test]
    fn identical_repeat_is_one_bit() {
        let mut coder = XorCoder::new(64);
        let mut w = BitWriter::new();
        coder.write(&mut w, 1.0_f64.to_bits());
        let before = w.len_bits();
        coder.write(&mut w, 1.0_f64.to_bits());
        assert_eq!(w.len_bits() - before, 1);

        let (bytes, _) = w.raw_bytes();
        let mut r = BitReader::new(bytes, w.len_bits());
        r.read_bits(64);
        assert_eq!(r.read_bit(), Some(false));
    }

    #[test]
    fn new_window_writes_full_control_header() {
        let mut coder = XorCoder::new(64);
        let mut w = BitWriter::new();
        coder.write(&mut w, 1.0_f64.to_bits());
        coder.write(&mut w, 2.0_f64.to_bits());

        let (bytes, _) = w.raw_bytes();
        let mut r = BitReader::new(bytes, w.len_bits());
        r.read_bits(64);
        assert_eq!(r.read_bit(), Some(true)); // differs from previous
        assert_eq!(r.read_bit(), Some(true)); // new window
        let leading = r.read_bits(LEADING_ZERO_BITS).unwrap();
        let meaningful_minus_one = r.read_bits(MEANINGFUL_WIDTH_BITS).unwrap();
        assert!(leading <= MAX_LEADING_ZEROS as u64);
        let meaningful = meaningful_minus_one + 1;
        assert!(meaningful >= 1 && meaningful <= 64);
    }

    /// `1.0` XOR `f64::from_bits(0xBFF0000000000001)` has zero leading and
    /// zero trailing zero bits, so `meaningful == 64` — the case that
    /// truncates to `0` in a plain 6-bit count but not in `meaningful - 1`.
    #[test]
    fn full_width_meaningful_span_does_not_truncate() {
        let mut coder = XorCoder::new(64);
        let mut w = BitWriter::new();
        coder.write(&mut w, 1.0_f64.to_bits());
        coder.write(&mut w, f64::from_bits(0xBFF0000000000001).to_bits());

        let (bytes, _) = w.raw_bytes();
        let mut r = BitReader::new(bytes, w.len_bits());
        r.read_bits(64);
        assert_eq!(r.read_bit(), Some(true));
        assert_eq!(r.read_bit(), Some(true)); // new window
        assert_eq!(r.read_bits(LEADING_ZERO_BITS), Some(0));
        assert_eq!(r.read_bits(MEANINGFUL_WIDTH_BITS), Some(63)); // 64 - 1
        assert_eq!(r.read_bits(64), Some(0x8000000000000001));
    }

    #[test]
    fn float_width_uses_32_bits_for_first_value() {
        let mut coder = XorCoder::new(32);
        let mut w = BitWriter::new();
        coder.write(&mut w, (1.5_f32.to_bits()) as u64);
        assert_eq!(w.len_bits(), 32);
    }
}
