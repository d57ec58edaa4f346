//! Interactive bisection that locates one differing bit inside a block.
//!
//! Precondition for every search: the two parties' copies differ in an odd number of
//! positions over the searched range. Each round the searching party learns the peer's
//! parity of the left half; if it disagrees with its own the error is on the left,
//! otherwise (even left, so odd right) it is on the right. A range of `k` positions
//! needs at most `⌈log2 k⌉` rounds, exactly that many when `k` is a power of two.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::bits::BitString;
use crate::parity::parity;

/// A contiguous run of positions inside one block of one pass, as named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalfBlock {
    /// 1-based pass number.
    pub pass: usize,
    pub block: usize,
    pub start: usize,
    pub end: usize,
}

impl HalfBlock {
    pub fn positions(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// `⌈log2 k⌉`, the worst-case number of rounds for a block of `k` positions.
pub fn max_rounds(k: usize) -> usize {
    if k <= 1 {
        0
    } else {
        (usize::BITS - (k - 1).leading_zeros()) as usize
    }
}

/// State of one bisection over a block of a pass.
#[derive(Debug, Clone)]
pub struct Bisection {
    pass: usize,
    block: usize,
    range: Range<usize>,
    rounds: usize,
}

impl Bisection {
    pub fn new(pass: usize, block: usize, range: Range<usize>) -> Self {
        Self {
            pass,
            block,
            range,
            rounds: 0,
        }
    }

    pub fn pass(&self) -> usize {
        self.pass
    }

    pub fn block(&self) -> usize {
        self.block
    }

    pub fn is_done(&self) -> bool {
        self.range.len() <= 1
    }

    /// The half whose peer parity is needed next.
    pub fn query(&self) -> HalfBlock {
        let mid = self.range.start + self.range.len() / 2;
        HalfBlock {
            pass: self.pass,
            block: self.block,
            start: self.range.start,
            end: mid,
        }
    }

    /// Narrow the range given both parities of the queried half.
    pub fn step(&mut self, own: bool, reference: bool) {
        let mid = self.range.start + self.range.len() / 2;
        if own != reference {
            self.range.end = mid;
        } else {
            self.range.start = mid;
        }
        self.rounds += 1;
    }

    /// The located position once the search has converged.
    pub fn position(&self) -> Option<usize> {
        (self.range.len() == 1).then_some(self.range.start)
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }
}

/// Result of a single-block search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    /// Key index of the differing bit.
    pub index: usize,
    /// Peer parities requested, i.e. bits disclosed.
    pub rounds: usize,
}

/// Locate one differing bit of `indices` by asking `peer_parity` for the peer's parity
/// of successive left halves.
///
/// Returns `None` for an empty index set. The answer is meaningful only under the
/// odd-difference precondition.
pub fn locate_error<F>(own: &BitString, indices: &[usize], mut peer_parity: F) -> Result<Option<Located>>
where
    F: FnMut(&[usize]) -> Result<bool>,
{
    if indices.is_empty() {
        return Ok(None);
    }
    let mut search = Bisection::new(0, 0, 0..indices.len());
    while !search.is_done() {
        let half = search.query().positions();
        let reference = peer_parity(&indices[half.clone()])?;
        search.step(parity(own, &indices[half]), reference);
    }
    Ok(search.position().map(|p| Located {
        index: indices[p],
        rounds: search.rounds(),
    }))
}
