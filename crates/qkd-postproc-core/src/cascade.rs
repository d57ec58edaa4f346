//! Cascade information reconciliation with cross-pass backtracking.
//!
//! Roles are fixed: Alice is the reference party. She picks every permutation seed,
//! reports block parities and answers parity queries; her key never changes. Bob is the
//! corrector. He drives every bisection in every pass and flips bits in his own copy.
//!
//! Per pass, Bob keeps a worklist of odd blocks over all passes run so far (a correction
//! toggles the parity of the block holding that index in every earlier pass). Each
//! round he takes a greedy set of pairwise-disjoint odd blocks, lowest pass first, and
//! bisects them together: one `BisectQuery`/`BisectParity` round trip per bisection
//! level. Disjointness keeps every search's odd-parity precondition intact while the
//! others correct. The pass ends when no odd block remains; if it locates more than
//! `backtrack_bound_factor * n` corrections first, it fails and its blocks (plus any
//! still-odd ones) are marked unverified and excluded from later work.

use std::collections::BTreeSet;

use log::{debug, trace, warn};
use rand::Rng;

use crate::bisect::{Bisection, HalfBlock};
use crate::bits::BitString;
use crate::channel::{AuthenticatedChannel, Transport};
use crate::config::CascadeConfig;
use crate::leakage::LeakageCounter;
use crate::message::{Message, unexpected};
use crate::parity::{Pass, initial_block_size, pass_block_size};
use crate::reconcile::{BlockId, Correction, CorrectionLog, Reconciliation};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct CascadeReconciler {
    config: CascadeConfig,
    prior_qber: f64,
    leakage: LeakageCounter,
    correction_bound: Option<usize>,
}

impl CascadeReconciler {
    pub fn new(config: CascadeConfig, prior_qber: f64) -> Self {
        Self {
            config,
            prior_qber,
            leakage: LeakageCounter::new(),
            correction_bound: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_correction_bound(mut self, bound: usize) -> Self {
        self.correction_bound = Some(bound);
        self
    }

    /// First-pass block size for a key of `n` bits.
    pub fn first_block_size(&self, n: usize) -> usize {
        match self.config.initial_block_size {
            Some(k) => k.clamp(1, n.max(1)),
            None => initial_block_size(n, self.prior_qber, self.config.k1_coefficient),
        }
    }

    fn block_size(&self, n: usize, number: usize) -> usize {
        pass_block_size(self.first_block_size(n), self.config.block_growth, number, n)
    }

    fn correction_bound(&self, n: usize) -> usize {
        self.correction_bound
            .unwrap_or(self.config.backtrack_bound_factor.saturating_mul(n))
    }

    // -----------------------------------------------------------------------
    // Alice
    // -----------------------------------------------------------------------

    fn answer_queries<T: Transport>(
        &mut self,
        key: &BitString,
        passes: &[Pass],
        number: usize,
        channel: &mut AuthenticatedChannel<'_, T>,
    ) -> Result<()> {
        loop {
            match channel.recv()? {
                Message::BisectQuery { halves } => {
                    let parities = halves
                        .iter()
                        .map(|half| half_parity(key, passes, half))
                        .collect::<Result<BitString>>()?;
                    self.leakage.add_reconciliation(parities.len());
                    channel.send(&Message::BisectParity { parities })?;
                }
                Message::PassComplete { pass } if pass == number => return Ok(()),
                other => return Err(unexpected("BisectQuery or PassComplete", &other)),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Bob
    // -----------------------------------------------------------------------

    /// Bisect odd blocks until none is left or the pass exceeds its bound.
    fn settle<T: Transport>(
        &mut self,
        state: &mut Worklist,
        key: &mut BitString,
        number: usize,
        channel: &mut AuthenticatedChannel<'_, T>,
    ) -> Result<usize> {
        let bound = self.correction_bound(key.len());
        let mut located = 0;
        loop {
            let batch = state.select_batch(key.len());
            if batch.is_empty() {
                return Ok(located);
            }
            let mut searches: Vec<Bisection> = batch
                .iter()
                .map(|id| Bisection::new(id.pass, id.block, state.pass(id.pass).block_range(id.block)))
                .collect();

            loop {
                let active: Vec<usize> = (0..searches.len())
                    .filter(|&i| !searches[i].is_done())
                    .collect();
                if active.is_empty() {
                    break;
                }
                let halves: Vec<HalfBlock> = active.iter().map(|&i| searches[i].query()).collect();
                channel.send(&Message::BisectQuery {
                    halves: halves.clone(),
                })?;
                let parities = match channel.recv()? {
                    Message::BisectParity { parities } => parities,
                    other => return Err(unexpected("BisectParity", &other)),
                };
                if parities.len() != halves.len() {
                    return Err(Error::Channel(format!(
                        "{} parities for {} queried half-blocks",
                        parities.len(),
                        halves.len()
                    )));
                }
                self.leakage.add_reconciliation(parities.len());
                for (j, (&i, half)) in active.iter().zip(&halves).enumerate() {
                    let own = state.pass(half.pass).range_parity(key, half.positions());
                    searches[i].step(own, parities.get(j));
                }
            }

            for search in &searches {
                if let Some(position) = search.position() {
                    let index = state.pass(search.pass()).index_at(position);
                    trace!(
                        "pass {number}: located index {index} in block {} of pass {} after {} rounds",
                        search.block(),
                        search.pass(),
                        search.rounds()
                    );
                    state.correct(key, index, search.pass(), search.block());
                    located += 1;
                }
            }

            if located > bound {
                warn!("pass {number} exceeded {bound} corrections, marking its blocks unverified");
                state.fail_pass(number);
                return Ok(located);
            }
        }
    }
}

/// Alice's parity of a queried half-block, validated against the shared passes.
fn half_parity(key: &BitString, passes: &[Pass], half: &HalfBlock) -> Result<bool> {
    half.pass
        .checked_sub(1)
        .and_then(|i| passes.get(i))
        .filter(|pass| pass.contains_range(half.block, &half.positions()))
        .map(|pass| pass.range_parity(key, half.positions()))
        .ok_or_else(|| Error::Channel(format!("query for invalid half-block {half:?}")))
}

impl Reconciliation for CascadeReconciler {
    fn propose<T: Transport, R: Rng + ?Sized>(
        &mut self,
        key: &BitString,
        channel: &mut AuthenticatedChannel<'_, T>,
        rng: &mut R,
    ) -> Result<CorrectionLog> {
        let n = key.len();
        let mut passes = Vec::with_capacity(self.config.max_passes);
        for number in 1..=self.config.max_passes {
            let block_size = self.block_size(n, number);
            let pass = if number == 1 {
                Pass::identity(n, block_size)
            } else {
                let seed: u64 = rng.random();
                channel.send(&Message::PermSeed { pass: number, seed })?;
                Pass::shuffled(number, n, block_size, seed)
            };
            let parities = BitString::from(pass.parities(key));
            self.leakage.add_reconciliation(parities.len());
            channel.send(&Message::ParityReport {
                pass: number,
                parities,
            })?;
            passes.push(pass);
            self.answer_queries(key, &passes, number, channel)?;
        }

        match channel.recv()? {
            Message::ReconcileSummary {
                corrections,
                unverified,
            } => CorrectionLog::from_passes(&passes, corrections, &unverified),
            other => Err(unexpected("ReconcileSummary", &other)),
        }
    }

    fn accept<T: Transport>(
        &mut self,
        key: &mut BitString,
        channel: &mut AuthenticatedChannel<'_, T>,
    ) -> Result<CorrectionLog> {
        let n = key.len();
        let mut state = Worklist::default();
        for number in 1..=self.config.max_passes {
            let block_size = self.block_size(n, number);
            let pass = if number == 1 {
                Pass::identity(n, block_size)
            } else {
                match channel.recv()? {
                    Message::PermSeed { pass, seed } if pass == number => {
                        Pass::shuffled(number, n, block_size, seed)
                    }
                    other => return Err(unexpected("PermSeed", &other)),
                }
            };
            let reference = match channel.recv()? {
                Message::ParityReport { pass, parities } if pass == number => parities,
                other => return Err(unexpected("ParityReport", &other)),
            };
            if reference.len() != pass.num_blocks() {
                return Err(Error::Channel(format!(
                    "parity report of {} bits for {} blocks",
                    reference.len(),
                    pass.num_blocks()
                )));
            }
            self.leakage.add_reconciliation(reference.len());
            let blocks = pass.num_blocks();
            state.push_pass(pass, reference, key);
            let odd = state.odd_blocks(number);

            let located = self.settle(&mut state, key, number, channel)?;
            channel.send(&Message::PassComplete { pass: number })?;
            debug!(
                "cascade pass {number}: k={block_size}, {blocks} blocks, {odd} odd, {located} located, leak {}",
                self.leakage.reconciliation()
            );
        }

        let unverified: Vec<BlockId> = state.unverified.iter().copied().collect();
        if !unverified.is_empty() {
            warn!("cascade finished with {} unverified blocks", unverified.len());
        }
        channel.send(&Message::ReconcileSummary {
            corrections: state.corrections.clone(),
            unverified: unverified.clone(),
        })?;
        CorrectionLog::from_passes(&state.passes, state.corrections, &unverified)
    }

    fn leakage(&self) -> &LeakageCounter {
        &self.leakage
    }
}

/// Bob's view of every pass run so far.
#[derive(Debug, Default)]
struct Worklist {
    passes: Vec<Pass>,
    /// Alice's block parities.
    reference: Vec<BitString>,
    /// Bob's current block parities, kept in step with every flip.
    own: Vec<Vec<bool>>,
    /// Blocks excluded from further searching.
    frozen: Vec<Vec<bool>>,
    corrections: Vec<Correction>,
    unverified: BTreeSet<BlockId>,
}

impl Worklist {
    fn pass(&self, number: usize) -> &Pass {
        &self.passes[number - 1]
    }

    fn push_pass(&mut self, pass: Pass, reference: BitString, key: &BitString) {
        self.own.push(pass.parities(key));
        self.frozen.push(vec![false; pass.num_blocks()]);
        self.reference.push(reference);
        self.passes.push(pass);
    }

    fn is_odd(&self, p: usize, block: usize) -> bool {
        !self.frozen[p][block] && self.own[p][block] != self.reference[p].get(block)
    }

    fn odd_blocks(&self, number: usize) -> usize {
        let p = number - 1;
        (0..self.passes[p].num_blocks())
            .filter(|&b| self.is_odd(p, b))
            .count()
    }

    /// Greedy set of pairwise-disjoint odd blocks, earliest passes first.
    fn select_batch(&self, n: usize) -> Vec<BlockId> {
        let mut claimed = vec![false; n];
        let mut batch = Vec::new();
        for (p, pass) in self.passes.iter().enumerate() {
            for block in 0..pass.num_blocks() {
                if !self.is_odd(p, block) {
                    continue;
                }
                let indices = pass.block_indices(block);
                if indices.iter().any(|&i| claimed[i]) {
                    continue;
                }
                for &i in indices {
                    claimed[i] = true;
                }
                batch.push(BlockId {
                    pass: p + 1,
                    block,
                });
            }
        }
        batch
    }

    /// Flip `index` and toggle the parity of its block in every pass.
    fn correct(&mut self, key: &mut BitString, index: usize, pass: usize, block: usize) {
        key.flip(index);
        for (p, known) in self.passes.iter().enumerate() {
            let b = known.block_containing(index);
            self.own[p][b] = !self.own[p][b];
        }
        self.corrections.push(Correction { pass, block, index });
    }

    fn freeze(&mut self, p: usize, block: usize) {
        self.frozen[p][block] = true;
        self.unverified.insert(BlockId { pass: p + 1, block });
    }

    /// Give up on pass `number`: all its blocks and every block still odd anywhere.
    fn fail_pass(&mut self, number: usize) {
        let mut doomed: Vec<(usize, usize)> = (0..self.passes[number - 1].num_blocks())
            .map(|b| (number - 1, b))
            .collect();
        for (p, pass) in self.passes.iter().enumerate() {
            doomed.extend((0..pass.num_blocks()).filter(|&b| self.is_odd(p, b)).map(|b| (p, b)));
        }
        for (p, b) in doomed {
            self.freeze(p, b);
        }
    }
}
