//! # qkd-postproc-core
//!
//! **Classical post-processing for quantum key distribution.**
//!
//! After the quantum exchange and sifting, Alice and Bob hold raw keys that mostly
//! agree. This crate turns them into identical, provably secret keys over a public
//! channel that is authenticated with a pre-shared secret.
//!
//! ## Quick Start
//!
//! ```no_run
//! use qkd_postproc_core::{BitString, SessionConfig, SimulatedLink, binary_symmetric_pair};
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let config = SessionConfig::default().with_seed(7);
//! let mut link = SimulatedLink::new(&config, &BitString::random(1 << 16, &mut rng)).unwrap();
//!
//! let (alice, bob) = binary_symmetric_pair(100_000, 0.02, &mut rng);
//! let outcome = link.run(&alice, &bob).unwrap();
//! assert!(outcome.keys_match());
//! println!("{} secret bits", outcome.alice.report.key_len);
//! ```
//!
//! ## Architecture
//!
//! Reconcile → Verify → Estimate QBER → Amplify
//!
//! - **Reconciliation**: Cascade (multi-pass binary search with backtracking) or a
//!   one-way LDPC syndrome code. Every disclosed parity bit is counted.
//! - **Verification**: polynomial universal hash over GF(2^64) or GF(2^128).
//! - **Estimation**: QBER from first-pass corrections plus a finite-size margin;
//!   sessions above the threshold abort.
//! - **Amplification**: Toeplitz hashing down to the leftover-hash-lemma length.
//!
//! Every protocol message travels through an [`AuthenticatedChannel`] tagged with
//! Wegman–Carter MACs keyed from a depleting [`AuthKeyBuffer`]; each session recycles
//! part of its output into the buffer.

pub mod amplify;
pub mod auth;
pub mod bisect;
pub mod bits;
pub mod cascade;
pub mod channel;
pub mod config;
pub mod error;
pub mod estimate;
pub mod ldpc;
pub mod leakage;
pub mod message;
pub mod parity;
pub mod reconcile;
pub mod seed_stream;
pub mod session;
pub mod simulate;
pub mod toeplitz;
pub mod verify;

pub use amplify::{KeyLengthBreakdown, PrivacyAmplifier};
pub use auth::{AuthKeyBuffer, MATRIX_SEED_BITS, WegmanCarter};
pub use bisect::{Bisection, HalfBlock, Located, locate_error};
pub use bits::BitString;
pub use cascade::CascadeReconciler;
pub use channel::{AuthenticatedChannel, MemoryTransport, Transport};
pub use config::{
    AmplificationConfig, AuthConfig, CascadeConfig, LdpcConfig, MarginModel, SessionConfig,
    StrategyKind, VerificationConfig,
};
pub use error::{AbortReason, Error};
pub use estimate::{QberEstimate, QberEstimator, binary_entropy, secrecy_capacity};
pub use ldpc::{LdpcReconciler, ParityCheckMatrix};
pub use leakage::LeakageCounter;
pub use message::Message;
pub use parity::Pass;
pub use reconcile::{
    BlockId, BlockOutcome, Correction, CorrectionLog, Reconciliation, ReconciliationStrategy,
};
pub use session::{
    PostProcessingController, Role, SecretKey, SessionOutcome, SessionReport, SessionResult,
    Stage,
};
pub use simulate::{PairOutcome, SimulatedLink, binary_symmetric_pair, exact_error_pair};
pub use verify::{HashField, KeyVerifier};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
