use crate::Bitmap;
use std::collections::BTreeSet;

/// A bitmap indexed over the product space `rows × rows`, used for join
/// results (spec glossary: "pair bitmap"). Pairs are sparse by construction
/// (they only ever arise from intersecting two row sets), so we track them
/// as an explicit sorted set of `(i, j)` rather than packing a dense
/// `N^2`-bit WAH stream — the caller-visible contract (`outerProduct`,
/// membership, set algebra, `cnt`/`bytes`) is the same either way.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PairBitmap {
    pairs: BTreeSet<(u32, u32)>,
}

impl PairBitmap {
    pub fn new() -> Self {
        PairBitmap::default()
    }

    pub fn insert(&mut self, i: u32, j: u32) {
        self.pairs.insert((i, j));
    }

    pub fn contains(&self, i: u32, j: u32) -> bool {
        self.pairs.contains(&(i, j))
    }

    pub fn cnt(&self) -> usize {
        self.pairs.len()
    }

    pub fn bytes(&self) -> usize {
        self.pairs.len() * 8
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.pairs.iter().copied()
    }

    pub fn union(&self, other: &PairBitmap) -> PairBitmap {
        PairBitmap {
            pairs: self.pairs.union(&other.pairs).copied().collect(),
        }
    }

    pub fn intersect(&self, other: &PairBitmap) -> PairBitmap {
        PairBitmap {
            pairs: self.pairs.intersection(&other.pairs).copied().collect(),
        }
    }

    pub fn difference(&self, other: &PairBitmap) -> PairBitmap {
        PairBitmap {
            pairs: self.pairs.difference(&other.pairs).copied().collect(),
        }
    }

    /// `outerProduct(a, b)`: bit `(i, j)` is set iff `a[i] ∧ b[j]`.
    pub fn outer_product(a: &Bitmap, b: &Bitmap) -> PairBitmap {
        let a_set: Vec<u32> = a.iter_set().map(|x| x as u32).collect();
        let b_set: Vec<u32> = b.iter_set().map(|x| x as u32).collect();
        let mut pairs = BTreeSet::new();
        for &i in &a_set {
            for &j in &b_set {
                pairs.insert((i, j));
            }
        }
        PairBitmap { pairs }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_outer_product() {
        let a = Bitmap::from_sorted_positions(3, &[0, 2]);
        let b = Bitmap::from_sorted_positions(2, &[1]);
        let p = PairBitmap::outer_product(&a, &b);
        assert_eq!(p.cnt(), 2);
        assert!(p.contains(0, 1));
        assert!(p.contains(2, 1));
        assert!(!p.contains(1, 1));
    }

    #[test]
    fn test_set_algebra() {
        let mut a = PairBitmap::new();
        a.insert(0, 0);
        a.insert(1, 1);
        let mut b = PairBitmap::new();
        b.insert(1, 1);
        b.insert(2, 2);
        assert_eq!(a.intersect(&b).cnt(), 1);
        assert_eq!(a.union(&b).cnt(), 3);
        assert_eq!(a.difference(&b).cnt(), 1);
    }
}
