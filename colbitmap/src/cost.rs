//! Cost model helpers (spec §4.1): `clusteringFactor` and `markovSize` let
//! callers (the expression reorderer, the join engine's memory guard)
//! choose between materialization strategies without actually building the
//! bitmap first.

/// Estimate how clustered a bitmap with `count` set bits out of `size` is,
/// given it actually compresses to `bytes`. A value near 1.0 means the set
/// bits are about as scattered as a random permutation would produce
/// (worst case for WAH compression); larger values mean the set bits come
/// in longer runs (better compression than random).
pub fn clustering_factor(size: usize, count: usize, bytes: usize) -> f64 {
    if size == 0 || count == 0 || count == size {
        return 1.0;
    }
    let n = size as f64;
    let k = count as f64;
    // Expected number of WAH words for a uniformly-random arrangement of k
    // set bits among n: roughly one literal word per 31-bit block that
    // straddles a 0/1 transition, i.e. proportional to k*(n-k)/n.
    let random_words = (k * (n - k) / n / 31.0).max(1.0);
    let random_bytes = random_words * 4.0;
    (random_bytes / bytes.max(1) as f64).max(1e-6)
}

/// Estimate the compressed size in bytes of a bitmap of `size` bits with
/// `count` set bits and clustering factor `cf`, without materializing it.
/// Used by the join engine's memory-safety check before allocating an
/// `N^2`-indexed candidate pair bitmap (spec §4.7).
pub fn markov_size(size: usize, count: usize, cf: f64) -> usize {
    if size == 0 || count == 0 || count == size {
        return 8;
    }
    let n = size as f64;
    let k = count as f64;
    let cf = cf.max(1e-6);
    let random_words = (k * (n - k) / n / 31.0).max(1.0);
    let words = (random_words / cf).max(1.0);
    (words * 4.0).ceil() as usize
}
