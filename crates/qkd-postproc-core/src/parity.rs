//! Block partitioning and parity over permuted index spaces.
//!
//! A [`Pass`] fixes a permutation of `[0, n)` and cuts the permuted order into
//! consecutive blocks of `block_size` positions (the last block may be shorter).
//! Blocks of one pass are pairwise disjoint and cover every key index.

use std::ops::Range;

use crate::bits::BitString;
use crate::seed_stream::{self, SeedStream, domain};

/// XOR over `indices` of `bits`.
pub fn parity(bits: &BitString, indices: &[usize]) -> bool {
    bits.parity_of(indices)
}

/// First-pass block size `k1`.
///
/// `ceil(coefficient / p0)` clamped to `[1, n]`. With `p0 == 0` there is no error
/// rate to size against, so a quarter of the key (at least 4 bits) is used.
pub fn initial_block_size(n: usize, prior_qber: f64, coefficient: f64) -> usize {
    let upper = n.max(1);
    let k = if prior_qber <= 0.0 {
        (n / 4).max(4)
    } else {
        (coefficient / prior_qber).ceil() as usize
    };
    k.clamp(1, upper)
}

/// Block size of pass `number` (1-based): `k1 * growth^(number - 1)`, capped at `n`.
pub fn pass_block_size(k1: usize, growth: usize, number: usize, n: usize) -> usize {
    let mut k = k1;
    for _ in 1..number {
        k = k.saturating_mul(growth);
        if k >= n {
            break;
        }
    }
    k.clamp(1, n.max(1))
}

/// One partition of the key into blocks.
#[derive(Debug, Clone)]
pub struct Pass {
    number: usize,
    block_size: usize,
    /// `perm[position]` is the key index at `position`.
    perm: Vec<usize>,
    /// Key index to the block holding it.
    block_of: Vec<usize>,
}

impl Pass {
    /// Pass over an explicit permutation.
    pub fn new(number: usize, block_size: usize, perm: Vec<usize>) -> Self {
        let block_size = block_size.max(1);
        let mut block_of = vec![0; perm.len()];
        for (position, &index) in perm.iter().enumerate() {
            block_of[index] = position / block_size;
        }
        Self {
            number,
            block_size,
            perm,
            block_of,
        }
    }

    /// Pass 1: blocks of consecutive key indices.
    pub fn identity(n: usize, block_size: usize) -> Self {
        Self::new(1, block_size, (0..n).collect())
    }

    /// Later passes: permutation expanded from the exchanged seed.
    pub fn shuffled(number: usize, n: usize, block_size: usize, seed: u64) -> Self {
        let mut stream = SeedStream::new(seed, domain::PERMUTATION);
        Self::new(number, block_size, seed_stream::permutation(n, &mut stream))
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn key_len(&self) -> usize {
        self.perm.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.perm.len().div_ceil(self.block_size)
    }

    /// Positions spanned by block `block`.
    pub fn block_range(&self, block: usize) -> Range<usize> {
        let start = block * self.block_size;
        start..(start + self.block_size).min(self.perm.len())
    }

    /// Key indices at `positions`.
    pub fn indices(&self, positions: Range<usize>) -> &[usize] {
        &self.perm[positions]
    }

    pub fn block_indices(&self, block: usize) -> &[usize] {
        self.indices(self.block_range(block))
    }

    /// Key index at `position`.
    pub fn index_at(&self, position: usize) -> usize {
        self.perm[position]
    }

    /// Block holding key index `index`.
    pub fn block_containing(&self, index: usize) -> usize {
        self.block_of[index]
    }

    /// Whether `positions` lies inside block `block`.
    pub fn contains_range(&self, block: usize, positions: &Range<usize>) -> bool {
        if block >= self.num_blocks() {
            return false;
        }
        let range = self.block_range(block);
        positions.start < positions.end
            && positions.start >= range.start
            && positions.end <= range.end
    }

    pub fn range_parity(&self, bits: &BitString, positions: Range<usize>) -> bool {
        parity(bits, self.indices(positions))
    }

    /// Parity of every block, in block order.
    pub fn parities(&self, bits: &BitString) -> Vec<bool> {
        (0..self.num_blocks())
            .map(|b| parity(bits, self.block_indices(b)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_block_size() {
        assert_eq!(initial_block_size(4096, 0.02, 0.73), 37);
        assert_eq!(initial_block_size(4096, 0.0, 0.73), 1024);
        assert_eq!(initial_block_size(8, 0.0, 0.73), 4);
        assert_eq!(initial_block_size(10, 0.001, 0.73), 10);
        assert_eq!(initial_block_size(100, 0.49, 0.73), 2);
    }

    #[test]
    fn test_pass_block_size_doubles_and_caps() {
        assert_eq!(pass_block_size(37, 2, 1, 4096), 37);
        assert_eq!(pass_block_size(37, 2, 2, 4096), 74);
        assert_eq!(pass_block_size(37, 2, 4, 4096), 296);
        assert_eq!(pass_block_size(1000, 2, 4, 4096), 4096);
        assert_eq!(pass_block_size(37, 1, 4, 4096), 37);
    }

    #[test]
    fn test_blocks_partition_the_key() {
        let pass = Pass::shuffled(2, 1001, 64, 99);
        let mut seen = vec![0usize; 1001];
        for b in 0..pass.num_blocks() {
            for &i in pass.block_indices(b) {
                seen[i] += 1;
                assert_eq!(pass.block_containing(i), b);
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
        assert_eq!(pass.num_blocks(), 16);
        assert_eq!(pass.block_range(15), 960..1001);
    }

    #[test]
    fn test_identity_pass_blocks_are_contiguous() {
        let pass = Pass::identity(10, 4);
        assert_eq!(pass.block_indices(0), &[0, 1, 2, 3]);
        assert_eq!(pass.block_indices(2), &[8, 9]);
        assert_eq!(pass.block_containing(9), 2);
    }

    #[test]
    fn test_same_seed_same_pass() {
        let a = Pass::shuffled(3, 500, 20, 7);
        let b = Pass::shuffled(3, 500, 20, 7);
        assert_eq!(a.block_indices(4), b.block_indices(4));
    }

    #[test]
    fn test_parities_track_flips() {
        let mut bits = BitString::zeros(12);
        let pass = Pass::identity(12, 5);
        assert_eq!(pass.parities(&bits), vec![false, false, false]);
        bits.flip(6);
        assert_eq!(pass.parities(&bits), vec![false, true, false]);
        assert!(pass.range_parity(&bits, 5..7));
        assert!(!pass.range_parity(&bits, 7..10));
    }

    #[test]
    fn test_contains_range() {
        let pass = Pass::identity(12, 5);
        assert!(pass.contains_range(1, &(5..8)));
        assert!(!pass.contains_range(1, &(4..8)));
        assert!(!pass.contains_range(2, &(10..13)));
        assert!(!pass.contains_range(3, &(12..12)));
    }
}
