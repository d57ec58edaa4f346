//! Session configuration.
//!
//! Every tunable of the pipeline lives in [`SessionConfig`]. The Cascade block-size
//! formula and growth schedule are heuristics; they are plain fields here so they can
//! be tuned empirically. Configs round-trip through JSON and missing fields take
//! their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::verify::HashField;
use crate::{Error, Result};

/// Reconciliation strategy, selected once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Cascade,
    Ldpc,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cascade => write!(f, "cascade"),
            Self::Ldpc => write!(f, "ldpc"),
        }
    }
}

/// Cascade parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Number of passes.
    pub max_passes: usize,
    /// Fixed first-pass block size; derived from `prior_qber` when `None`.
    pub initial_block_size: Option<usize>,
    /// `k1 = ceil(k1_coefficient / p0)`.
    pub k1_coefficient: f64,
    /// Block size multiplier between passes.
    pub block_growth: usize,
    /// A pass fails once it has located more than `factor * n` corrections.
    pub backtrack_bound_factor: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_passes: 4,
            initial_block_size: None,
            k1_coefficient: 0.73,
            block_growth: 2,
            backtrack_bound_factor: 4,
        }
    }
}

/// LDPC syndrome reconciliation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LdpcConfig {
    /// Syndrome length relative to the Shannon limit `h2(p0) * n`.
    pub efficiency: f64,
    /// Parity checks each key bit participates in.
    pub column_weight: usize,
    /// Min-sum iterations before the decoder gives up.
    pub max_iterations: usize,
}

impl Default for LdpcConfig {
    fn default() -> Self {
        Self {
            efficiency: 1.6,
            column_weight: 3,
            max_iterations: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub field: HashField,
}

/// Finite-size statistical margin `ν` added to the QBER estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarginModel {
    /// `ν = 0`.
    None,
    /// Constant `ν`.
    Fixed { value: f64 },
    /// One-sided Clopper–Pearson upper bound at `confidence`, minus the estimate.
    ClopperPearson { confidence: f64 },
}

impl Default for MarginModel {
    fn default() -> Self {
        Self::ClopperPearson { confidence: 0.95 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplificationConfig {
    /// Leftover-hash-lemma security parameter.
    pub epsilon_pa: f64,
    /// Sessions whose `estimate + ν` reaches this value abort.
    pub qber_threshold: f64,
    pub margin: MarginModel,
    /// Input lengths at or above this use the FFT Toeplitz multiply.
    pub fft_threshold: usize,
}

impl Default for AmplificationConfig {
    fn default() -> Self {
        Self {
            epsilon_pa: 1e-12,
            qber_threshold: 0.11,
            margin: MarginModel::default(),
            fft_threshold: 10_000,
        }
    }
}

/// Shortest accepted Wegman–Carter tag; forgery probability ≤ 2^-40.
pub const MIN_TAG_BITS: usize = 40;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Wegman–Carter tag length; 40 bits gives forgery probability ≤ 2^-40.
    pub tag_bits: usize,
    /// Bits of each new secret key returned to the AuthKeyBuffer on top of what the
    /// session consumed. The refill is capped at half the key.
    pub replenish_bits: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tag_bits: 40,
            replenish_bits: 1024,
        }
    }
}

/// Configuration for one post-processing session. Both parties must use equal
/// configs apart from `rng_seed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub strategy: StrategyKind,
    /// A-priori QBER estimate `p0` from the quantum layer.
    pub prior_qber: f64,
    pub cascade: CascadeConfig,
    pub ldpc: LdpcConfig,
    pub verification: VerificationConfig,
    pub amplification: AmplificationConfig,
    pub auth: AuthConfig,
    /// Seed for this party's session randomness; OS entropy when `None`.
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            prior_qber: 0.02,
            cascade: CascadeConfig::default(),
            ldpc: LdpcConfig::default(),
            verification: VerificationConfig::default(),
            amplification: AmplificationConfig::default(),
            auth: AuthConfig::default(),
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_prior_qber(mut self, p0: f64) -> Self {
        self.prior_qber = p0;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Reject parameter combinations that cannot yield a sound session.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(Error::Config(msg));
        if !(0.0..0.5).contains(&self.prior_qber) {
            return bad(format!("prior_qber must be in [0, 0.5), got {}", self.prior_qber));
        }
        let c = &self.cascade;
        if c.max_passes == 0 {
            return bad("cascade.max_passes must be at least 1".into());
        }
        if c.initial_block_size == Some(0) {
            return bad("cascade.initial_block_size must be positive".into());
        }
        if !(c.k1_coefficient > 0.0) {
            return bad(format!("cascade.k1_coefficient must be positive, got {}", c.k1_coefficient));
        }
        if c.block_growth == 0 {
            return bad("cascade.block_growth must be at least 1".into());
        }
        if c.backtrack_bound_factor == 0 {
            return bad("cascade.backtrack_bound_factor must be at least 1".into());
        }
        let l = &self.ldpc;
        if !(l.efficiency >= 1.0) {
            return bad(format!("ldpc.efficiency must be >= 1.0, got {}", l.efficiency));
        }
        if l.column_weight < 2 {
            return bad("ldpc.column_weight must be at least 2".into());
        }
        if l.max_iterations == 0 {
            return bad("ldpc.max_iterations must be at least 1".into());
        }
        let a = &self.amplification;
        if !(a.epsilon_pa > 0.0 && a.epsilon_pa < 1.0) {
            return bad(format!("amplification.epsilon_pa must be in (0, 1), got {}", a.epsilon_pa));
        }
        if !(a.qber_threshold > 0.0 && a.qber_threshold <= 0.5) {
            return bad(format!(
                "amplification.qber_threshold must be in (0, 0.5], got {}",
                a.qber_threshold
            ));
        }
        match a.margin {
            MarginModel::None => {}
            MarginModel::Fixed { value } if !(value >= 0.0) => {
                return bad(format!("fixed margin must be non-negative, got {value}"));
            }
            MarginModel::ClopperPearson { confidence } if !(confidence > 0.0 && confidence < 1.0) => {
                return bad(format!("margin confidence must be in (0, 1), got {confidence}"));
            }
            _ => {}
        }
        if a.fft_threshold == 0 {
            return bad("amplification.fft_threshold must be positive".into());
        }
        if !(MIN_TAG_BITS..=128).contains(&self.auth.tag_bits) {
            return bad(format!(
                "auth.tag_bits must be in {MIN_TAG_BITS}..=128, got {}",
                self.auth.tag_bits
            ));
        }
        Ok(())
    }
}
