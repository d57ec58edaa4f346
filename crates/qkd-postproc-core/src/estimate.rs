//! QBER estimation and the security threshold.
//!
//! The estimate is read off the correction log's first-pass blocks:
//!
//! ```text
//! estimate = (1/N) · (Σ_verified corrected_i / len_i + 0.5 · unverified)
//! ```
//!
//! and a finite-size margin `ν` is added before the threshold check and before the
//! secret-length bound.

use log::debug;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};

use crate::bits::BitString;
use crate::config::{AmplificationConfig, MarginModel};
use crate::reconcile::CorrectionLog;
use crate::{Error, Result};

/// Pessimistic error rate assigned to an unverified block.
pub const UNVERIFIED_BLOCK_QBER: f64 = 0.5;

// ---------------------------------------------------------------------------
// Entropy helpers
// ---------------------------------------------------------------------------

/// Binary entropy `h2(p)` in bits; 0 at and outside the ends of `[0, 1]`.
pub fn binary_entropy(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    -p * p.log2() - (1.0 - p) * (1.0 - p).log2()
}

/// Secret fraction `1 - h2(q)` of a BB84-style key; 0 from `q = 0.5` on.
pub fn secrecy_capacity(q: f64) -> f64 {
    if q >= 0.5 {
        return 0.0;
    }
    1.0 - binary_entropy(q.max(0.0))
}

/// One-sided upper Clopper–Pearson bound on an error rate after `errors` of `trials`.
pub fn clopper_pearson_upper(errors: u64, trials: u64, confidence: f64) -> f64 {
    if trials == 0 || errors >= trials {
        return 1.0;
    }
    let a = errors as f64 + 1.0;
    let b = (trials - errors) as f64;
    match Beta::new(a, b) {
        Ok(beta) => beta.inverse_cdf(confidence).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Fraction of differing positions between directly compared sample bits.
///
/// `None` for empty or unequal-length samples.
pub fn estimate_from_sample(ours: &BitString, theirs: &BitString) -> Option<f64> {
    if ours.is_empty() || ours.len() != theirs.len() {
        return None;
    }
    Some(ours.hamming_distance(theirs) as f64 / ours.len() as f64)
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QberEstimate {
    pub estimate: f64,
    /// Finite-size margin `ν`.
    pub margin: f64,
    pub primary_blocks: usize,
    pub unverified_blocks: usize,
}

impl QberEstimate {
    /// `estimate + ν`, the value every security decision uses.
    pub fn bound(&self) -> f64 {
        self.estimate + self.margin
    }
}

#[derive(Debug, Clone)]
pub struct QberEstimator {
    margin: MarginModel,
    threshold: f64,
}

impl QberEstimator {
    pub fn new(margin: MarginModel, threshold: f64) -> Self {
        Self { margin, threshold }
    }

    pub fn from_config(config: &AmplificationConfig) -> Self {
        Self::new(config.margin, config.qber_threshold)
    }

    /// Estimate from first-pass blocks plus the configured margin.
    pub fn estimate(&self, log: &CorrectionLog) -> QberEstimate {
        let blocks = log.primary_blocks();
        let unverified = blocks.iter().filter(|b| b.unverified).count();
        let estimate = if blocks.is_empty() {
            UNVERIFIED_BLOCK_QBER
        } else {
            let sum: f64 = blocks
                .iter()
                .map(|b| {
                    if b.unverified {
                        UNVERIFIED_BLOCK_QBER
                    } else {
                        b.corrected as f64 / b.len.max(1) as f64
                    }
                })
                .sum();
            sum / blocks.len() as f64
        };
        let margin = self.margin_for(estimate, log.primary_len());
        debug!(
            "qber estimate {estimate:.5} + margin {margin:.5} over {} blocks ({unverified} unverified)",
            blocks.len()
        );
        QberEstimate {
            estimate,
            margin,
            primary_blocks: blocks.len(),
            unverified_blocks: unverified,
        }
    }

    /// `ν` for an estimate drawn from `sample_bits` bits.
    pub fn margin_for(&self, estimate: f64, sample_bits: usize) -> f64 {
        match self.margin {
            MarginModel::None => 0.0,
            MarginModel::Fixed { value } => value,
            MarginModel::ClopperPearson { confidence } => {
                let trials = sample_bits as u64;
                let errors = (estimate * sample_bits as f64).round() as u64;
                (clopper_pearson_upper(errors, trials, confidence) - estimate).max(0.0)
            }
        }
    }

    /// `SecurityAbort` once `estimate + ν` reaches the threshold.
    pub fn check(&self, qber: &QberEstimate) -> Result<()> {
        if qber.bound() >= self.threshold {
            return Err(Error::SecurityAbort(format!(
                "QBER {:.4} + margin {:.4} reaches threshold {}",
                qber.estimate, qber.margin, self.threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parity::Pass;
    use crate::reconcile::{BlockId, Correction};

    fn qber(estimate: f64) -> QberEstimate {
        QberEstimate {
            estimate,
            margin: 0.0,
            primary_blocks: 1,
            unverified_blocks: 0,
        }
    }

    #[test]
    fn test_binary_entropy() {
        assert_eq!(binary_entropy(0.0), 0.0);
        assert_eq!(binary_entropy(1.0), 0.0);
        assert!((binary_entropy(0.5) - 1.0).abs() < 1e-12);
        assert!((binary_entropy(0.11) - 0.4999).abs() < 1e-3);
        assert!((binary_entropy(0.3) - binary_entropy(0.7)).abs() < 1e-12);
    }

    #[test]
    fn test_secrecy_capacity() {
        assert_eq!(secrecy_capacity(0.0), 1.0);
        assert_eq!(secrecy_capacity(0.5), 0.0);
        assert!(secrecy_capacity(0.05) > secrecy_capacity(0.08));
    }

    #[test]
    fn test_threshold_boundary() {
        let estimator = QberEstimator::new(MarginModel::None, 0.11);
        assert!(matches!(
            estimator.check(&qber(0.11)),
            Err(Error::SecurityAbort(_))
        ));
        assert!(estimator.check(&qber(0.109)).is_ok());
    }

    #[test]
    fn test_margin_counts_toward_threshold() {
        let estimator = QberEstimator::new(MarginModel::Fixed { value: 0.002 }, 0.11);
        let mut q = qber(0.109);
        q.margin = estimator.margin_for(q.estimate, 10_000);
        assert!(estimator.check(&q).is_err());
    }

    #[test]
    fn test_clopper_pearson_upper() {
        let upper = clopper_pearson_upper(50, 4096, 0.95);
        let p = 50.0 / 4096.0;
        assert!(upper > p);
        assert!(upper < p + 0.01);
        // Zero observed errors: 1 - (1 - c)^(1/n).
        let zero = clopper_pearson_upper(0, 1000, 0.95);
        assert!((zero - (1.0 - 0.05f64.powf(1.0 / 1000.0))).abs() < 1e-5);
        assert_eq!(clopper_pearson_upper(5, 5, 0.95), 1.0);
        assert_eq!(clopper_pearson_upper(0, 0, 0.95), 1.0);
    }

    #[test]
    fn test_margin_shrinks_with_sample_size() {
        let estimator = QberEstimator::new(MarginModel::ClopperPearson { confidence: 0.95 }, 0.11);
        let small = estimator.margin_for(0.02, 1_000);
        let large = estimator.margin_for(0.02, 100_000);
        assert!(small > large);
        assert!(large > 0.0);
    }

    #[test]
    fn test_estimate_from_log() {
        let passes = [Pass::identity(100, 25)];
        let corrections = vec![
            Correction {
                pass: 1,
                block: 0,
                index: 3,
            },
            Correction {
                pass: 1,
                block: 1,
                index: 30,
            },
        ];
        let unverified = [BlockId { pass: 1, block: 3 }];
        let log = CorrectionLog::from_passes(&passes, corrections, &unverified).unwrap();
        let estimator = QberEstimator::new(MarginModel::None, 0.11);
        let q = estimator.estimate(&log);
        // (1/25 + 1/25 + 0 + 0.5) / 4
        assert!((q.estimate - 0.145).abs() < 1e-12);
        assert_eq!(q.unverified_blocks, 1);
        assert_eq!(q.primary_blocks, 4);
        assert!(estimator.check(&q).is_err());
    }

    #[test]
    fn test_estimate_from_sample() {
        let a = BitString::from(vec![true, false, true, false]);
        let b = BitString::from(vec![true, true, true, false]);
        assert_eq!(estimate_from_sample(&a, &b), Some(0.25));
        assert_eq!(estimate_from_sample(&a, &BitString::new()), None);
    }
}
