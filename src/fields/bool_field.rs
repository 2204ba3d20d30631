//! The boolean custom coder (`spec.md` §4.D): no history, no dictionary —
//! each value is exactly one control bit.

use crate::bitstream::BitSink;

#[derive(Debug, Clone, Copy)]
pub struct BoolCoder;

impl BoolCoder {
    pub fn write(&mut self, sink: &mut dyn BitSink, value: bool) {
        sink.write_bit(value);
    }
}
