use crate::builder::Builder;
use crate::word::{Word, LITERAL_BITS};
use colbase::{err, Result};

const LITERAL_FULL: u32 = (1u32 << LITERAL_BITS) - 1;

/// A compressed, length-preserving sequence of bits over `[0, size)`,
/// physically a WAH word stream (spec §4.1). `size()` is tracked
/// separately from the word stream so the final, possibly-partial word
/// doesn't need special framing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bitmap {
    size: usize,
    words: Vec<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Chunk {
    Lit(u32),
    Fill { bit: bool, units: u64 },
}

struct Cursor<'a> {
    words: &'a [u32],
    pos: usize,
    cur: Option<Chunk>,
}

impl<'a> Cursor<'a> {
    fn new(words: &'a [u32]) -> Self {
        Cursor { words, pos: 0, cur: None }
    }

    fn peek(&mut self) -> Option<Chunk> {
        if self.cur.is_none() {
            if self.pos >= self.words.len() {
                return None;
            }
            let w = self.words[self.pos];
            self.pos += 1;
            self.cur = Some(match Word::decode(w) {
                Word::Literal(bits) => Chunk::Lit(bits),
                Word::Fill { bit, run } => Chunk::Fill { bit, units: run as u64 },
            });
        }
        self.cur
    }

    /// Consume `n` units (31-bit blocks) from the current chunk. For a
    /// literal chunk `n` must be 1 (a literal is always a single unit).
    fn consume_units(&mut self, n: u64) {
        match self.cur.take() {
            Some(Chunk::Lit(_)) => {
                debug_assert_eq!(n, 1);
            }
            Some(Chunk::Fill { bit, units }) => {
                if units > n {
                    self.cur = Some(Chunk::Fill { bit, units: units - n });
                }
            }
            None => {}
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum BinOp {
    And,
    Or,
    Xor,
    Minus,
}

impl BinOp {
    fn apply_bit(self, a: bool, b: bool) -> bool {
        match self {
            BinOp::And => a && b,
            BinOp::Or => a || b,
            BinOp::Xor => a != b,
            BinOp::Minus => a && !b,
        }
    }

    fn apply_word(self, a: u32, b: u32) -> u32 {
        (match self {
            BinOp::And => a & b,
            BinOp::Or => a | b,
            BinOp::Xor => a ^ b,
            BinOp::Minus => a & !b,
        }) & LITERAL_FULL
    }
}

impl Bitmap {
    pub fn empty(size: usize) -> Bitmap {
        let mut b = Builder::new();
        b.append_run(false, size);
        b.finish()
    }

    pub fn full(size: usize) -> Bitmap {
        let mut b = Builder::new();
        b.append_run(true, size);
        b.finish()
    }

    /// Ones in `[lo, hi)`, zero elsewhere, total length `size`.
    pub fn from_range(size: usize, lo: usize, hi: usize) -> Bitmap {
        let lo = lo.min(size);
        let hi = hi.min(size).max(lo);
        let mut b = Builder::new();
        b.append_run(false, lo);
        b.append_run(true, hi - lo);
        b.append_run(false, size - hi);
        b.finish()
    }

    /// Build from a sorted, deduplicated list of set positions.
    pub fn from_sorted_positions(size: usize, positions: &[usize]) -> Bitmap {
        let mut b = Builder::new();
        let mut prev = 0usize;
        for &p in positions {
            debug_assert!(p < size);
            debug_assert!(p >= prev);
            b.append_run(false, p.saturating_sub(prev));
            b.append_bit(true);
            prev = p + 1;
        }
        b.append_run(false, size.saturating_sub(prev));
        b.finish()
    }

    pub(crate) fn from_words(size: usize, words: Vec<u32>) -> Bitmap {
        Bitmap { size, words }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bytes(&self) -> usize {
        self.words.len() * 4
    }

    pub fn cnt(&self) -> usize {
        let mut n = 0usize;
        for &w in &self.words {
            match Word::decode(w) {
                Word::Literal(bits) => n += bits.count_ones() as usize,
                Word::Fill { bit: true, run } => n += run as usize * LITERAL_BITS as usize,
                Word::Fill { bit: false, .. } => {}
            }
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.cnt() == 0
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Iterate set bit positions in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        let mut pos = 0usize;
        self.words.iter().flat_map(move |&w| {
            let start = pos;
            let items: Vec<usize> = match Word::decode(w) {
                Word::Literal(bits) => (0..LITERAL_BITS)
                    .filter(|i| bits & (1 << i) != 0)
                    .map(|i| start + i as usize)
                    .collect(),
                Word::Fill { bit: true, run } => {
                    (0..run as usize * LITERAL_BITS as usize).map(|i| start + i).collect()
                }
                Word::Fill { bit: false, .. } => Vec::new(),
            };
            pos += match Word::decode(w) {
                Word::Literal(_) => LITERAL_BITS as usize,
                Word::Fill { run, .. } => run as usize * LITERAL_BITS as usize,
            };
            items
        })
    }

    fn merge(&self, other: &Bitmap, op: BinOp) -> Result<Bitmap> {
        if self.size != other.size {
            return Err(err(format!(
                "bitmap size mismatch: {} vs {}",
                self.size, other.size
            )));
        }
        let mut ca = Cursor::new(&self.words);
        let mut cb = Cursor::new(&other.words);
        let mut builder = Builder::new();
        let mut produced = 0usize;
        loop {
            match (ca.peek(), cb.peek()) {
                (None, None) => break,
                (Some(Chunk::Fill { bit: ab, units: au }), Some(Chunk::Fill { bit: bb, units: bu })) => {
                    let n = au.min(bu);
                    ca.consume_units(n);
                    cb.consume_units(n);
                    builder.append_run(op.apply_bit(ab, bb), n as usize * LITERAL_BITS as usize);
                    produced += n as usize * LITERAL_BITS as usize;
                }
                (Some(Chunk::Lit(al)), Some(Chunk::Fill { bit: bb, .. })) => {
                    ca.consume_units(1);
                    cb.consume_units(1);
                    let bl = if bb { LITERAL_FULL } else { 0 };
                    let nbits = (self.size - produced).min(LITERAL_BITS as usize) as u32;
                    builder.append_bits_lsb(op.apply_word(al, bl), nbits);
                    produced += nbits as usize;
                }
                (Some(Chunk::Fill { bit: ab, .. }), Some(Chunk::Lit(bl))) => {
                    ca.consume_units(1);
                    cb.consume_units(1);
                    let al = if ab { LITERAL_FULL } else { 0 };
                    let nbits = (self.size - produced).min(LITERAL_BITS as usize) as u32;
                    builder.append_bits_lsb(op.apply_word(al, bl), nbits);
                    produced += nbits as usize;
                }
                (Some(Chunk::Lit(al)), Some(Chunk::Lit(bl))) => {
                    ca.consume_units(1);
                    cb.consume_units(1);
                    let nbits = (self.size - produced).min(LITERAL_BITS as usize) as u32;
                    builder.append_bits_lsb(op.apply_word(al, bl), nbits);
                    produced += nbits as usize;
                }
                _ => return Err(err("corrupt bitmap: operand lengths disagree mid-stream")),
            }
        }
        Ok(builder.finish())
    }

    pub fn and(&self, other: &Bitmap) -> Result<Bitmap> {
        self.merge(other, BinOp::And)
    }

    pub fn or(&self, other: &Bitmap) -> Result<Bitmap> {
        self.merge(other, BinOp::Or)
    }

    pub fn xor(&self, other: &Bitmap) -> Result<Bitmap> {
        self.merge(other, BinOp::Xor)
    }

    pub fn minus(&self, other: &Bitmap) -> Result<Bitmap> {
        self.merge(other, BinOp::Minus)
    }

    pub fn not(&self) -> Bitmap {
        let mut builder = Builder::new();
        for &w in &self.words {
            match Word::decode(w) {
                Word::Literal(bits) => {
                    builder.append_bits_lsb(!bits & LITERAL_FULL, LITERAL_BITS);
                }
                Word::Fill { bit, run } => {
                    builder.append_run(!bit, run as usize * LITERAL_BITS as usize);
                }
            }
        }
        let mut bm = builder.finish();
        bm.adjust_size(false, self.size);
        bm
    }

    /// Canonicalize the encoding: merge adjacent fills of the same bit and
    /// fold uniform literal words into fill runs.
    pub fn compress(&self) -> Bitmap {
        let mut builder = Builder::new();
        for &w in &self.words {
            match Word::decode(w) {
                Word::Literal(bits) => match Word::Literal(bits).uniform_bit() {
                    Some(bit) => builder.append_run(bit, LITERAL_BITS as usize),
                    None => builder.append_bits_lsb(bits, LITERAL_BITS),
                },
                Word::Fill { bit, run } => builder.append_run(bit, run as usize * LITERAL_BITS as usize),
            }
        }
        let mut bm = builder.finish();
        // The loop above always emits full 31-bit units; if the original
        // bitmap's size was not a multiple of 31 its true length is shorter
        // than what the fully-expanded last literal implies, so trim back.
        bm.adjust_size(false, self.size);
        bm
    }

    /// Pad with `fill` or truncate to exactly `target` bits.
    pub fn adjust_size(&mut self, fill: bool, target: usize) {
        if target == self.size {
            return;
        }
        if target > self.size {
            let mut builder = Builder::new();
            for &w in &self.words {
                match Word::decode(w) {
                    Word::Literal(bits) => builder.append_bits_lsb(bits, LITERAL_BITS),
                    Word::Fill { bit, run } => {
                        builder.append_run(bit, run as usize * LITERAL_BITS as usize)
                    }
                }
            }
            builder.append_run(fill, target - self.size);
            *self = builder.finish();
        } else {
            let positions: Vec<usize> = self.iter_set().take_while(|&p| p < target).collect();
            *self = Bitmap::from_sorted_positions(target, &positions);
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.words.len() * 4);
        out.extend_from_slice(&(self.size as u32).to_le_bytes());
        for &w in &self.words {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Bitmap> {
        if bytes.len() < 4 {
            return Err(err("truncated bitmap: missing size header"));
        }
        let size = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let rest = &bytes[4..];
        if rest.len() % 4 != 0 {
            return Err(err("truncated bitmap: word stream not word-aligned"));
        }
        let words = rest
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        Ok(Bitmap { size, words })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn from_bools(bits: &[bool]) -> Bitmap {
        let mut b = Builder::new();
        for &bit in bits {
            b.append_bit(bit);
        }
        b.finish()
    }

    #[test]
    fn test_empty_full() {
        let e = Bitmap::empty(100);
        assert_eq!(e.size(), 100);
        assert_eq!(e.cnt(), 0);
        let f = Bitmap::full(100);
        assert_eq!(f.cnt(), 100);
    }

    #[test]
    fn test_round_trip_membership() {
        let bits: Vec<bool> = (0..500).map(|i| i % 7 == 0 || i == 499).collect();
        let bm = from_bools(&bits);
        assert_eq!(bm.size(), 500);
        for (i, &b) in bits.iter().enumerate() {
            assert_eq!(bm.iter_set().any(|p| p == i), b, "bit {i}");
        }
        let expected_cnt = bits.iter().filter(|&&b| b).count();
        assert_eq!(bm.cnt(), expected_cnt);
    }

    #[test]
    fn test_and_or_xor_minus() {
        let a = Bitmap::from_sorted_positions(10, &[1, 3, 5, 7]);
        let b = Bitmap::from_sorted_positions(10, &[3, 4, 5, 8]);
        assert_eq!(a.and(&b).unwrap().iter_set().collect::<Vec<_>>(), vec![3, 5]);
        assert_eq!(
            a.or(&b).unwrap().iter_set().collect::<Vec<_>>(),
            vec![1, 3, 4, 5, 7, 8]
        );
        assert_eq!(
            a.xor(&b).unwrap().iter_set().collect::<Vec<_>>(),
            vec![1, 4, 7, 8]
        );
        assert_eq!(a.minus(&b).unwrap().iter_set().collect::<Vec<_>>(), vec![1, 7]);
    }

    #[test]
    fn test_not() {
        let a = Bitmap::from_sorted_positions(5, &[0, 2, 4]);
        assert_eq!(a.not().iter_set().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_set_ops_across_many_words() {
        let positions_a: Vec<usize> = (0..5000).step_by(3).collect();
        let positions_b: Vec<usize> = (0..5000).step_by(5).collect();
        let a = Bitmap::from_sorted_positions(5000, &positions_a);
        let b = Bitmap::from_sorted_positions(5000, &positions_b);
        let and = a.and(&b).unwrap();
        let expected: Vec<usize> = (0..5000).filter(|i| i % 3 == 0 && i % 5 == 0).collect();
        assert_eq!(and.iter_set().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_serialize_round_trip() {
        let bm = Bitmap::from_sorted_positions(1000, &[0, 1, 2, 500, 999]);
        let bytes = bm.serialize();
        let back = Bitmap::deserialize(&bytes).unwrap();
        assert_eq!(back.size(), bm.size());
        assert_eq!(back.iter_set().collect::<Vec<_>>(), bm.iter_set().collect::<Vec<_>>());
    }

    #[test]
    fn test_adjust_size_grow_and_shrink() {
        let mut bm = Bitmap::from_sorted_positions(10, &[1, 2, 3]);
        bm.adjust_size(true, 20);
        assert_eq!(bm.size(), 20);
        assert_eq!(bm.cnt(), 3 + 10);
        bm.adjust_size(false, 5);
        assert_eq!(bm.size(), 5);
        assert_eq!(bm.iter_set().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_compress_canonicalizes() {
        let mut builder = Builder::new();
        builder.append_bits_lsb(0, 31);
        builder.append_bits_lsb(LITERAL_FULL, 31);
        let bm = builder.finish();
        let compressed = bm.compress();
        assert_eq!(compressed.size(), bm.size());
        assert_eq!(compressed.cnt(), bm.cnt());
        assert_eq!(compressed.words().len(), 2);
    }
}
