//! One-way syndrome reconciliation with an LDPC code.
//!
//! Alice expands a fresh public seed into a sparse parity-check matrix `H` (every key
//! bit sits in `column_weight` distinct checks), sends `H·x_A` and waits. Bob decodes
//! the error pattern `e` with `H·e = H·x_A ⊕ H·x_B` by normalised min-sum belief
//! propagation, flips it into his key if decoding converged, and reports back. The
//! syndrome length is the whole disclosure.

use log::{debug, warn};
use rand::Rng;

use crate::bits::BitString;
use crate::channel::{AuthenticatedChannel, Transport};
use crate::config::LdpcConfig;
use crate::estimate::binary_entropy;
use crate::leakage::LeakageCounter;
use crate::message::{Message, unexpected};
use crate::parity::Pass;
use crate::reconcile::{BlockId, Correction, CorrectionLog, Reconciliation};
use crate::seed_stream::{SeedStream, domain};
use crate::{Error, Result};

/// Min-sum normalisation factor.
const MIN_SUM_SCALE: f64 = 0.8;
/// Cap on message magnitudes.
const LLR_LIMIT: f64 = 50.0;
/// Floor on the design error rate, so a perfect prior still yields some checks.
const MIN_DESIGN_QBER: f64 = 1e-3;

/// Sparse binary parity-check matrix.
#[derive(Debug, Clone)]
pub struct ParityCheckMatrix {
    rows: usize,
    cols: usize,
    /// Edge `e` joins check `edge_check[e]` and bit `edge_bit[e]`.
    edge_check: Vec<usize>,
    edge_bit: Vec<usize>,
    check_edges: Vec<Vec<usize>>,
    bit_edges: Vec<Vec<usize>>,
}

impl ParityCheckMatrix {
    /// Matrix with `rows` checks over `cols` bits, each bit in `column_weight` distinct
    /// checks chosen from `seed`.
    pub fn generate(seed: u64, rows: usize, cols: usize, column_weight: usize) -> Self {
        let mut stream = SeedStream::new(seed, domain::LDPC_MATRIX);
        let weight = column_weight.min(rows);
        let mut edge_check = Vec::with_capacity(cols * weight);
        let mut edge_bit = Vec::with_capacity(cols * weight);
        let mut check_edges = vec![Vec::new(); rows];
        let mut bit_edges = vec![Vec::with_capacity(weight); cols];
        for bit in 0..cols {
            let mut chosen: Vec<usize> = Vec::with_capacity(weight);
            while chosen.len() < weight {
                let check = stream.next_below(rows as u64) as usize;
                if !chosen.contains(&check) {
                    chosen.push(check);
                }
            }
            for check in chosen {
                let e = edge_check.len();
                edge_check.push(check);
                edge_bit.push(bit);
                check_edges[check].push(e);
                bit_edges[bit].push(e);
            }
        }
        Self {
            rows,
            cols,
            edge_check,
            edge_bit,
            check_edges,
            bit_edges,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `H·x`. `x` must have `cols` bits.
    pub fn syndrome(&self, x: &BitString) -> BitString {
        let mut syndrome = BitString::zeros(self.rows);
        for (&check, &bit) in self.edge_check.iter().zip(&self.edge_bit) {
            if x.get(bit) {
                syndrome.flip(check);
            }
        }
        syndrome
    }

    /// Error pattern `e` with `H·e = target`, most likely under i.i.d. flips with
    /// probability `p`. `None` if min-sum does not converge in `max_iterations`.
    pub fn decode(&self, target: &BitString, p: f64, max_iterations: usize) -> Option<BitString> {
        let p = p.clamp(1e-9, 0.5 - 1e-9);
        let channel_llr = ((1.0 - p) / p).ln();
        let edges = self.edge_bit.len();
        let mut to_check = vec![channel_llr; edges];
        let mut to_bit = vec![0.0f64; edges];
        let mut estimate = BitString::zeros(self.cols);

        if self.syndrome(&estimate) == *target {
            return Some(estimate);
        }
        for _ in 0..max_iterations {
            for (check, edge_ids) in self.check_edges.iter().enumerate() {
                let flip = target.get(check);
                let mut sign_product = if flip { -1.0 } else { 1.0 };
                let (mut min1, mut min2, mut argmin) = (LLR_LIMIT, LLR_LIMIT, usize::MAX);
                for &e in edge_ids {
                    let m = to_check[e];
                    if m < 0.0 {
                        sign_product = -sign_product;
                    }
                    let mag = m.abs();
                    if mag < min1 {
                        min2 = min1;
                        min1 = mag;
                        argmin = e;
                    } else if mag < min2 {
                        min2 = mag;
                    }
                }
                for &e in edge_ids {
                    let own_sign = if to_check[e] < 0.0 { -1.0 } else { 1.0 };
                    let mag = if e == argmin { min2 } else { min1 };
                    to_bit[e] = sign_product * own_sign * MIN_SUM_SCALE * mag;
                }
            }

            for (bit, edge_ids) in self.bit_edges.iter().enumerate() {
                let total: f64 = channel_llr + edge_ids.iter().map(|&e| to_bit[e]).sum::<f64>();
                estimate.set(bit, total < 0.0);
                for &e in edge_ids {
                    to_check[e] = (total - to_bit[e]).clamp(-LLR_LIMIT, LLR_LIMIT);
                }
            }

            if self.syndrome(&estimate) == *target {
                return Some(estimate);
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct LdpcReconciler {
    config: LdpcConfig,
    prior_qber: f64,
    leakage: LeakageCounter,
}

impl LdpcReconciler {
    pub fn new(config: LdpcConfig, prior_qber: f64) -> Self {
        Self {
            config,
            prior_qber,
            leakage: LeakageCounter::new(),
        }
    }

    fn design_qber(&self) -> f64 {
        self.prior_qber.max(MIN_DESIGN_QBER)
    }

    /// Syndrome length `ceil(efficiency · h2(p0) · n)`, within `[1, n]`.
    pub fn syndrome_len(&self, n: usize) -> usize {
        let rows = (self.config.efficiency * binary_entropy(self.design_qber()) * n as f64).ceil() as usize;
        rows.clamp(1, n.max(1))
    }

    /// The single all-covering block both logs are keyed on.
    fn whole_key(n: usize) -> [Pass; 1] {
        [Pass::identity(n, n.max(1))]
    }
}

impl Reconciliation for LdpcReconciler {
    fn propose<T: Transport, R: Rng + ?Sized>(
        &mut self,
        key: &BitString,
        channel: &mut AuthenticatedChannel<'_, T>,
        rng: &mut R,
    ) -> Result<CorrectionLog> {
        let n = key.len();
        let rows = self.syndrome_len(n);
        let seed: u64 = rng.random();
        let matrix = ParityCheckMatrix::generate(seed, rows, n, self.config.column_weight);
        let syndrome = matrix.syndrome(key);
        self.leakage.add_reconciliation(syndrome.len());
        channel.send(&Message::LdpcSyndrome {
            seed,
            rows,
            syndrome,
        })?;

        match channel.recv()? {
            Message::ReconcileSummary {
                corrections,
                unverified,
            } => CorrectionLog::from_passes(&Self::whole_key(n), corrections, &unverified),
            other => Err(unexpected("ReconcileSummary", &other)),
        }
    }

    fn accept<T: Transport>(
        &mut self,
        key: &mut BitString,
        channel: &mut AuthenticatedChannel<'_, T>,
    ) -> Result<CorrectionLog> {
        let n = key.len();
        let expected_rows = self.syndrome_len(n);
        let (seed, syndrome) = match channel.recv()? {
            Message::LdpcSyndrome {
                seed,
                rows,
                syndrome,
            } => {
                if rows != expected_rows || syndrome.len() != rows {
                    return Err(Error::Channel(format!(
                        "syndrome of {} bits over {rows} rows, expected {expected_rows}",
                        syndrome.len()
                    )));
                }
                (seed, syndrome)
            }
            other => return Err(unexpected("LdpcSyndrome", &other)),
        };
        self.leakage.add_reconciliation(syndrome.len());

        let matrix = ParityCheckMatrix::generate(seed, expected_rows, n, self.config.column_weight);
        let target = matrix
            .syndrome(key)
            .xor(&syndrome)
            .ok_or_else(|| Error::Channel("syndrome length mismatch".into()))?;

        let mut corrections = Vec::new();
        let mut unverified = Vec::new();
        match matrix.decode(&target, self.design_qber(), self.config.max_iterations) {
            Some(errors) => {
                for index in (0..n).filter(|&i| errors.get(i)) {
                    key.flip(index);
                    corrections.push(Correction {
                        pass: 1,
                        block: 0,
                        index,
                    });
                }
                debug!(
                    "ldpc: {} rows, corrected {} bits",
                    expected_rows,
                    corrections.len()
                );
            }
            None => {
                warn!(
                    "ldpc: min-sum did not converge in {} iterations, key left unverified",
                    self.config.max_iterations
                );
                unverified.push(BlockId { pass: 1, block: 0 });
            }
        }

        channel.send(&Message::ReconcileSummary {
            corrections: corrections.clone(),
            unverified: unverified.clone(),
        })?;
        CorrectionLog::from_passes(&Self::whole_key(n), corrections, &unverified)
    }

    fn leakage(&self) -> &LeakageCounter {
        &self.leakage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryTransport;
    use crate::channel::tests::shared_buffers;
    use crate::reconcile::BlockOutcome;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn noisy_pair(n: usize, errors: usize, seed: u64) -> (BitString, BitString) {
        let mut rng = StdRng::seed_from_u64(seed);
        let alice = BitString::random(n, &mut rng);
        let mut bob = alice.clone();
        for i in rand::seq::index::sample(&mut rng, n, errors).iter() {
            bob.flip(i);
        }
        (alice, bob)
    }

    fn run(alice: &BitString, bob: &BitString, p0: f64) -> (CorrectionLog, CorrectionLog, BitString, u64) {
        let (mut ta, mut tb) = MemoryTransport::pair();
        let (mut ka, mut kb) = shared_buffers(1 << 14, 9);
        let mut bob_key = bob.clone();
        let mut alice_side = LdpcReconciler::new(LdpcConfig::default(), p0);
        let mut bob_side = alice_side.clone();
        let (a_log, b_log) = std::thread::scope(|s| {
            let a = s.spawn(|| {
                let mut ch = AuthenticatedChannel::open(&mut ta, &mut ka, 40)?;
                alice_side.propose(alice, &mut ch, &mut StdRng::seed_from_u64(1))
            });
            let b = s.spawn(|| {
                let mut ch = AuthenticatedChannel::open(&mut tb, &mut kb, 40)?;
                bob_side.accept(&mut bob_key, &mut ch)
            });
            (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
        });
        assert_eq!(alice_side.leakage(), bob_side.leakage());
        (a_log, b_log, bob_key, alice_side.leakage().reconciliation())
    }

    #[test]
    fn test_matrix_column_weight() {
        let h = ParityCheckMatrix::generate(3, 100, 400, 3);
        assert_eq!(h.rows(), 100);
        assert_eq!(h.cols(), 400);
        assert!(h.bit_edges.iter().all(|e| e.len() == 3));
        for edges in &h.bit_edges {
            let mut checks: Vec<usize> = edges.iter().map(|&e| h.edge_check[e]).collect();
            checks.sort_unstable();
            checks.dedup();
            assert_eq!(checks.len(), 3);
        }
    }

    #[test]
    fn test_syndrome_is_linear() {
        let mut rng = StdRng::seed_from_u64(4);
        let h = ParityCheckMatrix::generate(4, 64, 256, 3);
        let x = BitString::random(256, &mut rng);
        let y = BitString::random(256, &mut rng);
        let lhs = h.syndrome(&x.xor(&y).unwrap());
        let rhs = h.syndrome(&x).xor(&h.syndrome(&y)).unwrap();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn test_syndrome_of_unit_vector_is_its_column() {
        let h = ParityCheckMatrix::generate(8, 50, 120, 3);
        for bit in [0, 61, 119] {
            let mut x = BitString::zeros(120);
            x.flip(bit);
            let syndrome = h.syndrome(&x);
            let mut column: Vec<usize> = (0..h.rows()).filter(|&c| syndrome.get(c)).collect();
            let mut expected: Vec<usize> = h.bit_edges[bit].iter().map(|&e| h.edge_check[e]).collect();
            column.sort_unstable();
            expected.sort_unstable();
            assert_eq!(column, expected);
        }
    }

    #[test]
    fn test_decodes_sparse_error() {
        let h = ParityCheckMatrix::generate(5, 300, 1000, 3);
        let mut e = BitString::zeros(1000);
        for i in [10, 200, 555, 999] {
            e.flip(i);
        }
        let decoded = h.decode(&h.syndrome(&e), 0.01, 60).unwrap();
        assert_eq!(decoded, e);
    }

    #[test]
    fn test_syndrome_len() {
        let r = LdpcReconciler::new(LdpcConfig::default(), 0.02);
        // 1.6 · h2(0.02) · 4096 ≈ 926.9
        assert_eq!(r.syndrome_len(4096), 927);
        let zero = LdpcReconciler::new(LdpcConfig::default(), 0.0);
        assert!(zero.syndrome_len(4096) > 0);
    }

    #[test]
    fn test_reconciles_one_percent() {
        let (alice, bob) = noisy_pair(4096, 40, 6);
        let (a_log, b_log, bob_key, leak) = run(&alice, &bob, 0.02);
        assert_eq!(bob_key, alice);
        assert_eq!(a_log, b_log);
        assert_eq!(b_log.corrections().len(), 40);
        assert_eq!(leak, 927);
    }

    #[test]
    fn test_overloaded_code_cannot_reconcile() {
        let (alice, bob) = noisy_pair(2048, 400, 7);
        let (a_log, b_log, bob_key, _) = run(&alice, &bob, 0.01);
        assert_eq!(a_log, b_log);
        assert_ne!(bob_key, alice);
        if b_log.passes()[0].outcomes[0] == BlockOutcome::Unverified {
            assert_eq!(bob_key, bob);
        }
    }
}
