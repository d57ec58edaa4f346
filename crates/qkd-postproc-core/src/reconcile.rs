//! Reconciliation strategies and the correction log they produce.
//!
//! A session picks one [`ReconciliationStrategy`] up front. Whatever the strategy, the
//! reference party (Alice) calls [`Reconciliation::propose`] and never modifies her
//! key, the correcting party (Bob) calls [`Reconciliation::accept`] and edits his copy
//! in place, and both end with the same [`CorrectionLog`].

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bits::BitString;
use crate::cascade::CascadeReconciler;
use crate::channel::{AuthenticatedChannel, Transport};
use crate::config::{SessionConfig, StrategyKind};
use crate::ldpc::LdpcReconciler;
use crate::leakage::LeakageCounter;
use crate::parity::Pass;
use crate::{Error, Result};

/// A block of a pass; `pass` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId {
    pub pass: usize,
    pub block: usize,
}

/// One located and flipped error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    /// Pass of the block whose search located it.
    pub pass: usize,
    pub block: usize,
    /// Key index that was flipped on the correcting side.
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum BlockOutcome {
    Untouched,
    Corrected { errors: usize },
    /// Search failed or never converged; the block may still hold errors.
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassRecord {
    pub number: usize,
    pub block_size: usize,
    pub outcomes: Vec<BlockOutcome>,
}

/// A first-pass block, the counting unit of the QBER estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryBlock {
    pub len: usize,
    /// Corrections whose index falls in this block, whichever pass located them.
    pub corrected: usize,
    /// The block, or any unverified block of a later pass overlapping it, is unverified.
    pub unverified: bool,
}

/// Per-pass, per-block record of what reconciliation did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionLog {
    passes: Vec<PassRecord>,
    corrections: Vec<Correction>,
    primary: Vec<PrimaryBlock>,
}

impl CorrectionLog {
    /// Build the log from the pass structure both parties share.
    ///
    /// `corrections` and `unverified` usually come from the peer, so every reference is
    /// checked against `passes`; a dangling one is a channel error.
    pub fn from_passes(passes: &[Pass], corrections: Vec<Correction>, unverified: &[BlockId]) -> Result<Self> {
        let lookup = |pass: usize, block: usize| {
            pass.checked_sub(1)
                .and_then(|i| passes.get(i))
                .filter(|p| block < p.num_blocks())
                .ok_or_else(|| Error::Channel(format!("unknown block {block} of pass {pass}")))
        };

        let mut errors: BTreeMap<BlockId, usize> = BTreeMap::new();
        for c in &corrections {
            let pass = lookup(c.pass, c.block)?;
            if c.index >= pass.key_len() || pass.block_containing(c.index) != c.block {
                return Err(Error::Channel(format!(
                    "correction index {} is not in block {} of pass {}",
                    c.index, c.block, c.pass
                )));
            }
            *errors
                .entry(BlockId {
                    pass: c.pass,
                    block: c.block,
                })
                .or_default() += 1;
        }
        for id in unverified {
            lookup(id.pass, id.block)?;
        }

        let records = passes
            .iter()
            .map(|pass| PassRecord {
                number: pass.number(),
                block_size: pass.block_size(),
                outcomes: (0..pass.num_blocks())
                    .map(|block| {
                        let id = BlockId {
                            pass: pass.number(),
                            block,
                        };
                        if unverified.contains(&id) {
                            BlockOutcome::Unverified
                        } else {
                            match errors.get(&id) {
                                Some(&e) => BlockOutcome::Corrected { errors: e },
                                None => BlockOutcome::Untouched,
                            }
                        }
                    })
                    .collect(),
            })
            .collect();

        let primary = match passes.first() {
            Some(first) => {
                let mut blocks: Vec<PrimaryBlock> = (0..first.num_blocks())
                    .map(|b| PrimaryBlock {
                        len: first.block_range(b).len(),
                        corrected: 0,
                        unverified: false,
                    })
                    .collect();
                for c in &corrections {
                    blocks[first.block_containing(c.index)].corrected += 1;
                }
                for id in unverified {
                    for &index in passes[id.pass - 1].block_indices(id.block) {
                        blocks[first.block_containing(index)].unverified = true;
                    }
                }
                blocks
            }
            None => Vec::new(),
        };

        Ok(Self {
            passes: records,
            corrections,
            primary,
        })
    }

    pub fn passes(&self) -> &[PassRecord] {
        &self.passes
    }

    pub fn corrections(&self) -> &[Correction] {
        &self.corrections
    }

    pub fn primary_blocks(&self) -> &[PrimaryBlock] {
        &self.primary
    }

    /// Unverified blocks across all passes.
    pub fn unverified_blocks(&self) -> usize {
        self.passes
            .iter()
            .flat_map(|p| &p.outcomes)
            .filter(|o| matches!(o, BlockOutcome::Unverified))
            .count()
    }

    /// Total bits covered by primary blocks.
    pub fn primary_len(&self) -> usize {
        self.primary.iter().map(|b| b.len).sum()
    }
}

/// Common interface of the reconciliation strategies.
pub trait Reconciliation {
    /// Reference side: disclose what the peer needs; `key` is never modified.
    fn propose<T: Transport, R: Rng + ?Sized>(
        &mut self,
        key: &BitString,
        channel: &mut AuthenticatedChannel<'_, T>,
        rng: &mut R,
    ) -> Result<CorrectionLog>;

    /// Correcting side: consume disclosures and correct `key` in place.
    fn accept<T: Transport>(
        &mut self,
        key: &mut BitString,
        channel: &mut AuthenticatedChannel<'_, T>,
    ) -> Result<CorrectionLog>;

    /// Bits disclosed so far.
    fn leakage(&self) -> &LeakageCounter;
}

/// The strategy chosen for a session.
#[derive(Debug, Clone)]
pub enum ReconciliationStrategy {
    Cascade(CascadeReconciler),
    Ldpc(LdpcReconciler),
}

impl ReconciliationStrategy {
    pub fn from_config(config: &SessionConfig) -> Self {
        match config.strategy {
            StrategyKind::Cascade => Self::Cascade(CascadeReconciler::new(
                config.cascade.clone(),
                config.prior_qber,
            )),
            StrategyKind::Ldpc => {
                Self::Ldpc(LdpcReconciler::new(config.ldpc.clone(), config.prior_qber))
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Cascade(_) => StrategyKind::Cascade,
            Self::Ldpc(_) => StrategyKind::Ldpc,
        }
    }
}

impl Reconciliation for ReconciliationStrategy {
    fn propose<T: Transport, R: Rng + ?Sized>(
        &mut self,
        key: &BitString,
        channel: &mut AuthenticatedChannel<'_, T>,
        rng: &mut R,
    ) -> Result<CorrectionLog> {
        match self {
            Self::Cascade(c) => c.propose(key, channel, rng),
            Self::Ldpc(l) => l.propose(key, channel, rng),
        }
    }

    fn accept<T: Transport>(
        &mut self,
        key: &mut BitString,
        channel: &mut AuthenticatedChannel<'_, T>,
    ) -> Result<CorrectionLog> {
        match self {
            Self::Cascade(c) => c.accept(key, channel),
            Self::Ldpc(l) => l.accept(key, channel),
        }
    }

    fn leakage(&self) -> &LeakageCounter {
        match self {
            Self::Cascade(c) => c.leakage(),
            Self::Ldpc(l) => l.leakage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passes() -> Vec<Pass> {
        vec![Pass::identity(12, 4), Pass::new(2, 6, (0..12).rev().collect())]
    }

    #[test]
    fn test_outcomes_and_primary_blocks() {
        let corrections = vec![
            Correction {
                pass: 1,
                block: 0,
                index: 2,
            },
            Correction {
                pass: 2,
                block: 1,
                index: 1,
            },
        ];
        let log = CorrectionLog::from_passes(&passes(), corrections, &[]).unwrap();
        assert_eq!(log.passes()[0].outcomes[0], BlockOutcome::Corrected { errors: 1 });
        assert_eq!(log.passes()[0].outcomes[1], BlockOutcome::Untouched);
        assert_eq!(log.passes()[1].outcomes[1], BlockOutcome::Corrected { errors: 1 });
        // Both corrections land in primary block 0.
        assert_eq!(log.primary_blocks()[0].corrected, 2);
        assert_eq!(log.primary_len(), 12);
        assert_eq!(log.unverified_blocks(), 0);
    }

    #[test]
    fn test_unverified_later_block_taints_primary_blocks() {
        // Pass 2 block 0 covers positions 0..6 = indices 11..=6.
        let unverified = [BlockId { pass: 2, block: 0 }];
        let log = CorrectionLog::from_passes(&passes(), Vec::new(), &unverified).unwrap();
        let tainted: Vec<bool> = log.primary_blocks().iter().map(|b| b.unverified).collect();
        assert_eq!(tainted, vec![false, true, true]);
        assert_eq!(log.passes()[1].outcomes[0], BlockOutcome::Unverified);
        assert_eq!(log.unverified_blocks(), 1);
    }

    #[test]
    fn test_dangling_references_rejected() {
        let bad_block = vec![Correction {
            pass: 1,
            block: 1,
            index: 2,
        }];
        assert!(CorrectionLog::from_passes(&passes(), bad_block, &[]).is_err());
        let bad_pass = [BlockId { pass: 3, block: 0 }];
        assert!(CorrectionLog::from_passes(&passes(), Vec::new(), &bad_pass).is_err());
        let bad_index = vec![Correction {
            pass: 1,
            block: 0,
            index: 99,
        }];
        assert!(CorrectionLog::from_passes(&passes(), bad_index, &[]).is_err());
    }

    #[test]
    fn test_strategy_from_config() {
        let cascade = ReconciliationStrategy::from_config(&SessionConfig::default());
        assert_eq!(cascade.kind(), StrategyKind::Cascade);
        let ldpc = ReconciliationStrategy::from_config(
            &SessionConfig::default().with_strategy(StrategyKind::Ldpc),
        );
        assert_eq!(ldpc.kind(), StrategyKind::Ldpc);
        assert_eq!(ldpc.leakage().total(), 0);
    }
}
