//! Protocol messages exchanged between the two parties.
//!
//! Messages are encoded with bincode and always travel inside an authenticated frame
//! (see [`crate::channel`]).

use serde::{Deserialize, Serialize};

use crate::bisect::HalfBlock;
use crate::bits::BitString;
use crate::error::AbortReason;
use crate::reconcile::{BlockId, Correction};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Permutation seed for a Cascade pass after the first.
    PermSeed { pass: usize, seed: u64 },
    /// Alice's parity of every block of a pass, in block order.
    ParityReport { pass: usize, parities: BitString },
    /// Bob asks for Alice's parity of each listed half-block.
    BisectQuery { halves: Vec<HalfBlock> },
    /// One parity per queried half-block, in query order.
    BisectParity { parities: BitString },
    /// Bob has no odd blocks left in this pass.
    PassComplete { pass: usize },
    /// LDPC syndrome of Alice's key under the matrix expanded from `seed`.
    LdpcSyndrome {
        seed: u64,
        rows: usize,
        syndrome: BitString,
    },
    /// Bob's reconciliation outcome, so both parties hold the same correction log.
    ReconcileSummary {
        corrections: Vec<Correction>,
        unverified: Vec<BlockId>,
    },
    VerifyHash { point: u128, tag: u128 },
    VerifyResult { matched: bool },
    ToeplitzSeed { seed: BitString },
    AbortNotice { reason: AbortReason },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermSeed { .. } => "PermSeed",
            Self::ParityReport { .. } => "ParityReport",
            Self::BisectQuery { .. } => "BisectQuery",
            Self::BisectParity { .. } => "BisectParity",
            Self::PassComplete { .. } => "PassComplete",
            Self::LdpcSyndrome { .. } => "LdpcSyndrome",
            Self::ReconcileSummary { .. } => "ReconcileSummary",
            Self::VerifyHash { .. } => "VerifyHash",
            Self::VerifyResult { .. } => "VerifyResult",
            Self::ToeplitzSeed { .. } => "ToeplitzSeed",
            Self::AbortNotice { .. } => "AbortNotice",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Error for a message that arrived out of protocol order.
pub(crate) fn unexpected(expected: &str, got: &Message) -> Error {
    Error::Channel(format!("expected {expected}, received {}", got.kind()))
}
