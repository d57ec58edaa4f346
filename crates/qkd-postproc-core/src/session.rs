//! Session controller: one full post-processing run per raw key.
//!
//! ```text
//! open channel → reconcile → verify → estimate QBER → amplify → replenish auth buffer
//! ```
//!
//! Alice is the reference party and never modifies her key; Bob corrects his. The
//! controller owns the transport and the party's [`AuthKeyBuffer`], so consecutive
//! sessions keep drawing fresh pads from where the last one stopped.
//!
//! # Aborts
//!
//! Any stage may end the session. Channel failures and pad exhaustion end it
//! silently. Security aborts and verification failures are decided identically by
//! both parties; Alice then announces hers with an `AbortNotice` and Bob consumes it,
//! which keeps both auth buffers at the same offset for the next session.

use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amplify::{KeyLengthBreakdown, PrivacyAmplifier};
use crate::auth::AuthKeyBuffer;
use crate::bits::BitString;
use crate::channel::{AuthenticatedChannel, Transport};
use crate::config::{SessionConfig, StrategyKind};
use crate::error::AbortReason;
use crate::estimate::{QberEstimate, QberEstimator};
use crate::leakage::LeakageCounter;
use crate::message::unexpected;
use crate::reconcile::{Reconciliation, ReconciliationStrategy};
use crate::verify::KeyVerifier;
use crate::{Error, Result};

// ---------------------------------------------------------------------------
// Roles and stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Reference party; key never modified.
    Alice,
    /// Correcting party.
    Bob,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alice => write!(f, "alice"),
            Self::Bob => write!(f, "bob"),
        }
    }
}

/// Last stage a session entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Reconciling,
    Verifying,
    Estimating,
    Amplifying,
    Done,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Final secret key handed to the application.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(BitString);

impl SecretKey {
    pub fn bits(&self) -> &BitString {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Packed MSB-first; the last byte is zero-padded.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn into_bits(self) -> BitString {
        self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({} bits)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResult {
    Key(SecretKey),
    Aborted(AbortReason),
}

/// Per-session statistics, serializable for offline analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub role: Role,
    pub strategy: StrategyKind,
    pub stage: Stage,
    pub raw_len: usize,
    pub passes: usize,
    pub corrections: usize,
    pub unverified_blocks: usize,
    pub leakage: LeakageCounter,
    pub qber: Option<QberEstimate>,
    pub breakdown: Option<KeyLengthBreakdown>,
    /// `ℓ_sec`, the amplified length.
    pub secret_len: usize,
    /// Bits handed to the application, `secret_len - recycled_bits`.
    pub key_len: usize,
    /// Amplified bits moved into the auth buffer.
    pub recycled_bits: usize,
    pub auth_bits_consumed: u64,
    pub auth_bits_available: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub duration_ms: u64,
    pub abort: Option<AbortReason>,
    pub error: Option<String>,
    pub version: String,
}

impl SessionReport {
    fn new(role: Role, strategy: StrategyKind, raw_len: usize) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            role,
            strategy,
            stage: Stage::Init,
            raw_len,
            passes: 0,
            corrections: 0,
            unverified_blocks: 0,
            leakage: LeakageCounter::new(),
            qber: None,
            breakdown: None,
            secret_len: 0,
            key_len: 0,
            recycled_bits: 0,
            auth_bits_consumed: 0,
            auth_bits_available: 0,
            messages_sent: 0,
            messages_received: 0,
            duration_ms: 0,
            abort: None,
            error: None,
            version: crate::VERSION.to_string(),
        }
    }

    /// Write the report as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub result: SessionResult,
    pub report: SessionReport,
}

impl SessionOutcome {
    pub fn key(&self) -> Option<&SecretKey> {
        match &self.result {
            SessionResult::Key(key) => Some(key),
            SessionResult::Aborted(_) => None,
        }
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self.result {
            SessionResult::Key(_) => None,
            SessionResult::Aborted(reason) => Some(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives post-processing sessions for one party.
pub struct PostProcessingController<T> {
    role: Role,
    config: SessionConfig,
    transport: T,
    auth: AuthKeyBuffer,
    rng: StdRng,
    sessions: u64,
}

impl<T: Transport> PostProcessingController<T> {
    /// Rejects an invalid config before anything touches the channel.
    pub fn new(role: Role, config: SessionConfig, transport: T, auth: AuthKeyBuffer) -> Result<Self> {
        config.validate()?;
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            role,
            config,
            transport,
            auth,
            rng,
            sessions: 0,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn auth_buffer(&self) -> &AuthKeyBuffer {
        &self.auth
    }

    /// Sessions run so far, aborted ones included.
    pub fn sessions_run(&self) -> u64 {
        self.sessions
    }

    pub fn into_parts(self) -> (T, AuthKeyBuffer) {
        (self.transport, self.auth)
    }

    /// Run one session on `raw_key`. Never panics on protocol failures: every error
    /// ends as [`SessionResult::Aborted`] with the details in the report.
    pub fn run(&mut self, raw_key: &BitString) -> SessionOutcome {
        let started = Instant::now();
        let mut report = SessionReport::new(self.role, self.config.strategy, raw_key.len());
        info!(
            "session {} ({}, {}): {} raw bits, {} auth bits available",
            report.session_id,
            self.role,
            self.config.strategy,
            raw_key.len(),
            self.auth.available()
        );

        let result = self.execute(raw_key, &mut report);
        self.sessions += 1;
        report.duration_ms = started.elapsed().as_millis() as u64;
        report.auth_bits_available = self.auth.available();

        match result {
            Ok(key) => {
                report.stage = Stage::Done;
                report.key_len = key.len();
                info!(
                    "session {} done: {} secret bits ({} recycled) in {} ms",
                    report.session_id, report.secret_len, report.recycled_bits, report.duration_ms
                );
                SessionOutcome {
                    result: SessionResult::Key(key),
                    report,
                }
            }
            Err(e) => {
                let reason = e.abort_reason();
                warn!(
                    "session {} aborted while {:?}: {e}",
                    report.session_id, report.stage
                );
                report.abort = Some(reason);
                report.error = Some(e.to_string());
                SessionOutcome {
                    result: SessionResult::Aborted(reason),
                    report,
                }
            }
        }
    }

    fn execute(&mut self, raw_key: &BitString, report: &mut SessionReport) -> Result<SecretKey> {
        if raw_key.is_empty() {
            return Err(Error::SecurityAbort("empty raw key".into()));
        }

        let mut channel =
            AuthenticatedChannel::open(&mut self.transport, &mut self.auth, self.config.auth.tag_bits)?;
        let result = match run_stages(self.role, &self.config, &mut channel, raw_key, &mut self.rng, report) {
            Err(e) if e.notifies_peer() => {
                exchange_abort_notice(self.role, &mut channel, &e);
                Err(e)
            }
            other => other,
        };
        report.auth_bits_consumed = channel.auth_bits_consumed();
        report.messages_sent = channel.messages_sent();
        report.messages_received = channel.messages_received();
        drop(channel);

        let secret = result?;
        // Both sides consumed the same pad bits, so both recycle the same suffix.
        let recycled = (report.auth_bits_consumed as usize + self.config.auth.replenish_bits)
            .min(secret.len() / 2);
        let (key, refill) = secret.split_at(secret.len() - recycled);
        self.auth.replenish(&refill);
        report.recycled_bits = recycled;
        debug!(
            "recycled {recycled} amplified bits, auth buffer now {} bits",
            self.auth.available()
        );
        Ok(SecretKey(key))
    }
}

/// Reconcile, verify, estimate and amplify; returns the full `ℓ_sec`-bit key.
fn run_stages<T: Transport>(
    role: Role,
    config: &SessionConfig,
    channel: &mut AuthenticatedChannel<'_, T>,
    raw_key: &BitString,
    rng: &mut StdRng,
    report: &mut SessionReport,
) -> Result<BitString> {
    report.stage = Stage::Reconciling;
    let mut strategy = ReconciliationStrategy::from_config(config);
    let mut key = raw_key.clone();
    let log = match role {
        Role::Alice => strategy.propose(&key, channel, rng)?,
        Role::Bob => strategy.accept(&mut key, channel)?,
    };
    let mut leakage = *strategy.leakage();
    report.passes = log.passes().len();
    report.corrections = log.corrections().len();
    report.unverified_blocks = log.unverified_blocks();
    report.leakage = leakage;
    info!(
        "reconciled {} bits: {} passes, {} corrections, {} unverified blocks, {} bits disclosed",
        key.len(),
        report.passes,
        report.corrections,
        report.unverified_blocks,
        leakage.reconciliation()
    );

    report.stage = Stage::Verifying;
    let verifier = KeyVerifier::new(config.verification.field);
    leakage.add_verification(verifier.tag_bits());
    report.leakage = leakage;
    match role {
        Role::Alice => verifier.propose(&key, channel, rng)?,
        Role::Bob => verifier.accept(&key, channel)?,
    }

    report.stage = Stage::Estimating;
    let estimator = QberEstimator::from_config(&config.amplification);
    let qber = estimator.estimate(&log);
    report.qber = Some(qber);
    info!(
        "QBER {:.5} + margin {:.5} (threshold {})",
        qber.estimate, qber.margin, config.amplification.qber_threshold
    );
    estimator.check(&qber)?;

    report.stage = Stage::Amplifying;
    let amplifier = PrivacyAmplifier::from_config(&config.amplification);
    report.breakdown = Some(amplifier.breakdown(key.len(), &qber, &leakage));
    let secret_len = amplifier.secret_length(key.len(), &qber, &leakage)?;
    report.secret_len = secret_len;
    match role {
        Role::Alice => amplifier.propose(&key, secret_len, channel, rng),
        Role::Bob => amplifier.accept(&key, secret_len, channel),
    }
}

/// Alice announces an abort both parties reached; Bob consumes the announcement.
fn exchange_abort_notice<T: Transport>(role: Role, channel: &mut AuthenticatedChannel<'_, T>, error: &Error) {
    let exchanged = match role {
        Role::Alice => channel.send_abort(error.abort_reason()),
        Role::Bob => match channel.recv() {
            Err(Error::PeerAbort(_)) => Ok(()),
            Ok(other) => Err(unexpected("AbortNotice", &other)),
            Err(e) => Err(e),
        },
    };
    if let Err(e) = exchanged {
        debug!("abort notice not exchanged: {e}");
    }
}
