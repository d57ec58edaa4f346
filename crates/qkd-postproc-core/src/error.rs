//! Error types for qkd-postproc-core.
//!
//! Every fatal condition of a session is an [`Error`]; [`Error::abort_reason`] folds it
//! onto the four [`AbortReason`]s the application layer observes. Per-block
//! convergence failures are not errors: Cascade records them as unverified blocks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Wire codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Authentication failure: {0}")]
    Authentication(String),

    #[error("Authentication key exhausted: requested {requested} bits, {available} available")]
    KeyExhaustion { requested: usize, available: usize },

    #[error("Key verification failed: reconciled keys differ")]
    VerificationFailure,

    #[error("Security abort: {0}")]
    SecurityAbort(String),

    #[error("Peer aborted the session: {0}")]
    PeerAbort(AbortReason),
}

impl Error {
    /// The externally visible abort reason for this error.
    pub fn abort_reason(&self) -> AbortReason {
        match self {
            Self::Io(_)
            | Self::Json(_)
            | Self::Codec(_)
            | Self::Channel(_)
            | Self::Authentication(_) => AbortReason::ChannelError,
            Self::KeyExhaustion { .. } => AbortReason::KeyExhaustion,
            Self::VerificationFailure => AbortReason::VerificationFailure,
            Self::Config(_) | Self::SecurityAbort(_) => AbortReason::SecurityAbort,
            Self::PeerAbort(reason) => *reason,
        }
    }

    /// Whether the peer should be sent an `AbortNotice` for this error.
    ///
    /// Nothing is sent after a channel failure (the channel is no longer trusted),
    /// after exhaustion (no pad left to authenticate it), or in reply to the peer's
    /// own notice.
    pub fn notifies_peer(&self) -> bool {
        !matches!(
            self.abort_reason(),
            AbortReason::ChannelError | AbortReason::KeyExhaustion
        ) && !matches!(self, Self::PeerAbort(_))
    }
}

/// Why a session produced no key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// QBER estimate or secret length violates the security threshold.
    SecurityAbort,
    /// Reconciled keys hash differently.
    VerificationFailure,
    /// Authentication or transport failure.
    ChannelError,
    /// AuthKeyBuffer cannot supply the next pad.
    KeyExhaustion,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SecurityAbort => write!(f, "security_abort"),
            Self::VerificationFailure => write!(f, "verification_failure"),
            Self::ChannelError => write!(f, "channel_error"),
            Self::KeyExhaustion => write!(f, "key_exhaustion"),
        }
    }
}
