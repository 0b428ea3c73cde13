//! Deterministic chunking of all-pairs comparisons
//!
//! For `n` items the canonical pair set is every `(a, b)` with `a < b`,
//! numbered row by row:
//!
//! ```text
//! n = 4:  (0,1)=0 (0,2)=1 (0,3)=2 (1,2)=3 (1,3)=4 (2,3)=5
//! ```
//!
//! The `n(n-1)/2` positions are split into `k` contiguous ranges whose sizes
//! differ by at most one. Chunk `i` unranks its first position and walks
//! forward, so the chunks are disjoint, cover every pair exactly once, and do
//! not depend on thread scheduling.

use std::ops::Range;

/// Chunk count for `n` items: ten chunks per available core, at most `n`
pub fn chunk_count(n: usize) -> usize {
    let parallelism = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    (parallelism * 10).min(n).max(1)
}

/// Partition of the pairs of `n` items into `k` chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairwisePartitioner {
    n: usize,
    k: usize,
}

impl PairwisePartitioner {
    /// `k` is clamped to at least one chunk
    pub fn new(n: usize, k: usize) -> Self {
        Self { n, k: k.max(1) }
    }

    pub fn chunk_count(&self) -> usize {
        self.k
    }

    /// Number of unordered pairs, `n(n-1)/2`
    pub fn total_pairs(&self) -> u64 {
        let n = self.n as u64;
        n * n.saturating_sub(1) / 2
    }

    /// Canonical position of the pair `(a, b)`, `a < b < n`
    pub fn position(&self, a: usize, b: usize) -> u64 {
        debug_assert!(a < b && b < self.n);
        self.row_start(a) + (b - a - 1) as u64
    }

    /// Pair positions covered by chunk `i`; empty for `i >= k`
    pub fn chunk_range(&self, i: usize) -> Range<u64> {
        if i >= self.k {
            return 0..0;
        }
        let total = self.total_pairs() as u128;
        let k = self.k as u128;
        let start = (i as u128 * total / k) as u64;
        let end = ((i as u128 + 1) * total / k) as u64;
        start..end
    }

    /// Iterator over the pairs of chunk `i`, in position order
    pub fn chunk(&self, i: usize) -> PairChunk {
        let range = self.chunk_range(i);
        let remaining = range.end - range.start;
        let (a, b) = if remaining == 0 {
            (0, 0)
        } else {
            self.unrank(range.start)
        };
        PairChunk {
            n: self.n,
            a,
            b,
            remaining,
        }
    }

    /// First position of row `a`
    fn row_start(&self, a: usize) -> u64 {
        let n = self.n as u64;
        let a = a as u64;
        a * (2 * n - a - 1) / 2
    }

    /// Pair at canonical position `pos`
    fn unrank(&self, pos: u64) -> (usize, usize) {
        // Largest row whose start is <= pos
        let (mut lo, mut hi) = (0usize, self.n.saturating_sub(1));
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            if self.row_start(mid) <= pos {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        let a = lo;
        let b = a + 1 + (pos - self.row_start(a)) as usize;
        (a, b)
    }
}

/// Pairs of one chunk
#[derive(Debug, Clone)]
pub struct PairChunk {
    n: usize,
    a: usize,
    b: usize,
    remaining: u64,
}

impl Iterator for PairChunk {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let pair = (self.a, self.b);
        self.remaining -= 1;
        self.b += 1;
        if self.b >= self.n {
            self.a += 1;
            self.b = self.a + 1;
        }
        Some(pair)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_row_major() {
        let p = PairwisePartitioner::new(4, 1);
        let pairs: Vec<_> = p.chunk(0).collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
        for (pos, (a, b)) in pairs.into_iter().enumerate() {
            assert_eq!(p.position(a, b), pos as u64);
            assert_eq!(p.unrank(pos as u64), (a, b));
        }
    }

    #[test]
    fn test_chunks_split_evenly() {
        let p = PairwisePartitioner::new(5, 3);
        let sizes: Vec<_> = (0..3).map(|i| p.chunk(i).count()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
    }

    #[test]
    fn test_degenerate_sizes() {
        assert_eq!(PairwisePartitioner::new(0, 4).chunk(0).count(), 0);
        assert_eq!(PairwisePartitioner::new(1, 1).chunk(0).count(), 0);

        // more chunks than pairs
        let p = PairwisePartitioner::new(2, 2);
        let all: Vec<_> = (0..2).flat_map(|i| p.chunk(i)).collect();
        assert_eq!(all, vec![(0, 1)]);
        assert_eq!(p.chunk(7).count(), 0);
    }

    #[test]
    fn test_chunk_count_bounded_by_items() {
        assert_eq!(chunk_count(1), 1);
        assert!(chunk_count(3) <= 3);
        assert_eq!(chunk_count(0), 1);
    }
}
