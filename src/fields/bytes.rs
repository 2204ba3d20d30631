//! The bytes custom coder: an LRU content-addressed dictionary over
//! already-written byte ranges in the stream, so a repeated label/string
//! value costs a cheap reference instead of a fresh literal.
//!
//! Three outcomes per value, cheapest first: the value is identical to the
//! most-recently-written one (tail match) and costs a single `0` bit; the
//! value matches some other live dictionary entry (interior hit) and costs
//! `1 0` plus an index; or neither, and it is written as a fresh literal
//! (`1 1` plus a length-prefixed byte run), which also becomes the new
//! most-recently-used entry.
//!
//! This can't reuse the pack's `lru` crate: matching isn't a key lookup, it
//! is "scan live dictionary entries, re-reading their byte range out of the
//! stream itself, for one whose content equals the candidate". That needs
//! direct access to [`BitSink::read_bytes_at`], which a generic key-value
//! LRU has no hook for, so the dictionary here is a hand-rolled `VecDeque`
//! ordered head (least-recently-used, evicted first) to tail
//! (most-recently-used).

use std::collections::VecDeque;

use xxhash_rust::xxh64::xxh64;

use crate::bitstream::BitSink;

const XXH64_SEED: u64 = 0;

#[derive(Debug, Clone)]
struct DictEntry {
    hash: u64,
    start: usize,
    len: usize,
}

/// Bytes field coder: emits a tail no-change bit, an interior dictionary
/// reference, or a fresh literal plus a new dictionary entry.
#[derive(Debug, Clone)]
pub struct BytesCoder {
    capacity: usize,
    /// Head = least-recently-used (evicted first), tail = most-recently-used.
    entries: VecDeque<DictEntry>,
}

impl BytesCoder {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bytes dictionary capacity must be positive");
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Number of bits needed to index into a dictionary of `capacity`
    /// entries (`ceil(log2(capacity))`).
    pub fn index_bits(capacity: usize) -> u8 {
        if capacity <= 1 {
            return 1;
        }
        (usize::BITS - (capacity - 1).leading_zeros()) as u8
    }

    fn content_matches(sink: &dyn BitSink, entry: &DictEntry, hash: u64, value: &[u8]) -> bool {
        entry.hash == hash
            && entry.len == value.len()
            && sink.read_bytes_at(entry.start, entry.len) == value
    }

    /// Encodes `value`, reading previously committed literal bytes back out
    /// of `sink` to verify dictionary candidates still match. No alignment
    /// is required on entry — only the new-literal path pads, immediately
    /// before its length varint, via `write_varint`'s own padding.
    pub fn write(&mut self, sink: &mut dyn BitSink, value: &[u8]) {
        let hash = xxh64(value, XXH64_SEED);

        let tail_matches = match self.entries.back() {
            Some(entry) => Self::content_matches(sink, entry, hash, value),
            None => false,
        };
        if tail_matches {
            sink.write_bit(false);
            return;
        }
        sink.write_bit(true);

        let hit = self
            .entries
            .iter()
            .position(|entry| Self::content_matches(sink, entry, hash, value));

        match hit {
            Some(pos) => {
                sink.write_bit(false);
                let index_bits = Self::index_bits(self.capacity);
                sink.write_bits(pos as u64, index_bits);
                let entry = self.entries.remove(pos).unwrap();
                self.entries.push_back(entry);
            }
            None => {
                sink.write_bit(true);
                crate::bitstream::write_varint(sink, value.len() as u64);
                let start = sink.len_bits() / 8;
                debug_assert_eq!(sink.len_bits() % 8, 0);
                sink.write_bytes(value);

                if self.entries.len() == self.capacity {
                    self.entries.pop_front();
                }
                self.entries.push_back(DictEntry {
                    hash,
                    start,
                    len: value.len(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::{BitReader, BitWriter};

    #[test]
    fn index_bits_covers_full_capacity_range() {
        assert_eq!(BytesCoder::index_bits(1), 1);
        assert_eq!(BytesCoder::index_bits(2), 1);
        assert_eq!(BytesCoder::index_bits(3), 2);
        assert_eq!(BytesCoder::index_bits(16), 4);
        assert_eq!(BytesCoder::index_bits(17), 5);
    }

    #[test]
    fn first_occurrence_is_a_literal() {
        let mut coder = BytesCoder::new(4);
        let mut w = BitWriter::new();
        coder.write(&mut w, b"hello");
        let (bytes, _) = w.raw_bytes();
        let mut r = BitReader::new(bytes, w.len_bits());
        assert_eq!(r.read_bit(), Some(true)); // changed from (empty) tail
        assert_eq!(r.read_bit(), Some(true)); // new literal
    }

    #[test]
    fn repeated_tail_value_is_a_single_no_change_bit() {
        let mut coder = BytesCoder::new(4);
        let mut w = BitWriter::new();
        coder.write(&mut w, b"hello");
        let before = w.len_bits();
        coder.write(&mut w, b"hello");
        assert_eq!(w.len_bits() - before, 1);

        let (bytes, _) = w.raw_bytes();
        let mut r = BitReader::new(bytes, w.len_bits());
        r.pos_to(before);
        assert_eq!(r.read_bit(), Some(false));
    }

    #[test]
    fn interior_hit_costs_one_control_bit_plus_index() {
        let mut coder = BytesCoder::new(4);
        let mut w = BitWriter::new();
        coder.write(&mut w, b"hello"); // index 0
        coder.write(&mut w, b"world"); // index 1, now tail
        let before = w.len_bits();
        coder.write(&mut w, b"hello"); // not tail, interior hit at index 0

        let (bytes, _) = w.raw_bytes();
        let mut r = BitReader::new(bytes, w.len_bits());
        r.pos_to(before);
        assert_eq!(r.read_bit(), Some(true)); // changed from tail
        assert_eq!(r.read_bit(), Some(false)); // interior hit, not a literal
        let index_bits = BytesCoder::index_bits(4);
        assert_eq!(r.read_bits(index_bits), Some(0));
        assert_eq!(w.len_bits() - before, 2 + index_bits as usize);
    }

    #[test]
    fn capacity_one_evicts_previous_entry() {
        let mut coder = BytesCoder::new(1);
        let mut w = BitWriter::new();
        coder.write(&mut w, b"a");
        coder.write(&mut w, b"b"); // evicts "a"
        coder.write(&mut w, b"a"); // must be a literal again, not a stale hit

        let (bytes, _) = w.raw_bytes();
        let mut r = BitReader::new(bytes, w.len_bits());
        assert_eq!(r.read_bit(), Some(true)); // "a": changed, literal
        assert_eq!(r.read_bit(), Some(true));
        r.read_varint();
        r.read_bits(8);
        assert_eq!(r.read_bit(), Some(true)); // "b": changed from "a", literal
        assert_eq!(r.read_bit(), Some(true));
        r.read_varint();
        r.read_bits(8);
        assert_eq!(r.read_bit(), Some(true)); // "a" again: changed from "b", literal
        assert_eq!(r.read_bit(), Some(true));
    }
}
