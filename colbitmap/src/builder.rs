use crate::word::{Word, LITERAL_BITS, MAX_FILL_RUN};
use crate::Bitmap;

/// Appends runs of bits in ascending row order, folding maximal runs into
/// fill words as it goes. This is the only way bits are produced; random
/// access mutation of a compressed stream is not supported, matching the
/// append-only construction style bin indexes and scans both naturally use.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    words: Vec<u32>,
    size: usize,
    active: u32,
    active_len: u32,
}

impl Builder {
    pub fn new() -> Self {
        Builder::default()
    }

    pub fn with_capacity(words: usize) -> Self {
        Builder {
            words: Vec::with_capacity(words),
            ..Default::default()
        }
    }

    pub fn append_bit(&mut self, bit: bool) {
        self.append_run(bit, 1);
    }

    pub fn append_run(&mut self, bit: bool, mut count: usize) {
        if count == 0 {
            return;
        }
        self.size += count;

        if self.active_len > 0 {
            let room = (LITERAL_BITS - self.active_len) as usize;
            let take = room.min(count);
            if bit {
                self.active |= ((1u32 << take) - 1) << self.active_len;
            }
            self.active_len += take as u32;
            count -= take;
            if self.active_len == LITERAL_BITS {
                self.flush_literal();
            }
            if count == 0 {
                return;
            }
        }

        let full_units = (count / LITERAL_BITS as usize) as u64;
        let mut remaining_units = full_units;
        while remaining_units > 0 {
            let run = remaining_units.min(MAX_FILL_RUN as u64) as u32;
            self.push_fill(bit, run);
            remaining_units -= run as u64;
        }
        count -= full_units as usize * LITERAL_BITS as usize;

        if count > 0 {
            self.active = if bit { (1u32 << count) - 1 } else { 0 };
            self.active_len = count as u32;
        }
    }

    fn flush_literal(&mut self) {
        self.words.push(Word::Literal(self.active).encode());
        self.active = 0;
        self.active_len = 0;
    }

    fn push_fill(&mut self, bit: bool, run: u32) {
        if run == 0 {
            return;
        }
        if let Some(&last) = self.words.last() {
            if let Word::Fill { bit: lb, run: lr } = Word::decode(last) {
                if lb == bit && lr.checked_add(run).is_some_and(|r| r <= MAX_FILL_RUN) {
                    *self.words.last_mut().unwrap() = Word::Fill { bit, run: lr + run }.encode();
                    return;
                }
            }
        }
        self.words.push(Word::Fill { bit, run }.encode());
    }

    /// Append the low `nbits` bits of `bits` (bit 0 first).
    pub fn append_bits_lsb(&mut self, bits: u32, nbits: u32) {
        let mut i = 0u32;
        while i < nbits {
            let bit = bits & (1 << i) != 0;
            let mut run = 1usize;
            while i + (run as u32) < nbits && (bits & (1 << (i + run as u32)) != 0) == bit {
                run += 1;
            }
            self.append_run(bit, run);
            i += run as u32;
        }
    }

    pub fn finish(mut self) -> Bitmap {
        if self.active_len > 0 {
            self.flush_literal();
        }
        Bitmap::from_words(self.size, self.words)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_builder_mixed_runs() {
        let mut b = Builder::new();
        b.append_run(false, 100);
        b.append_run(true, 5);
        b.append_run(false, 50);
        let bm = b.finish();
        assert_eq!(bm.size(), 155);
        assert_eq!(bm.cnt(), 5);
        let ones: Vec<usize> = bm.iter_set().collect();
        assert_eq!(ones, vec![100, 101, 102, 103, 104]);
    }

    #[test]
    fn test_builder_crosses_many_words() {
        let mut b = Builder::new();
        b.append_run(true, 1_000_000);
        let bm = b.finish();
        assert_eq!(bm.cnt(), 1_000_000);
        assert_eq!(bm.size(), 1_000_000);
    }
}
