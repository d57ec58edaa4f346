//! Privacy amplification by Toeplitz hashing.
//!
//! The output length follows the leftover hash lemma:
//!
//! ```text
//! ℓ_sec = ⌊ ℓ_ver · (1 - h2(q + ν)) - leak_EC - leak_ver - 2·log2(1/ε_pa) ⌋
//! ```
//!
//! Alice draws the `ℓ_ver + ℓ_sec - 1` bit Toeplitz seed and sends it; both parties
//! then compute `K_sec = T(seed) · K_ver`.

use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bits::BitString;
use crate::channel::{AuthenticatedChannel, Transport};
use crate::config::AmplificationConfig;
use crate::estimate::{QberEstimate, secrecy_capacity};
use crate::leakage::LeakageCounter;
use crate::message::{Message, unexpected};
use crate::toeplitz;
use crate::{Error, Result};

/// Every term of the secret-length bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyLengthBreakdown {
    pub verified_len: usize,
    /// `q + ν`.
    pub qber_bound: f64,
    /// `ℓ_ver · (1 - h2(q + ν))`.
    pub entropy_bits: f64,
    pub leak_ec: u64,
    pub leak_ver: u64,
    /// `2·log2(1/ε_pa)`.
    pub pa_penalty: f64,
    /// Unrounded bound, may be negative.
    pub raw: f64,
    /// `max(⌊raw⌋, 0)`.
    pub secret_len: usize,
}

impl KeyLengthBreakdown {
    pub fn compute(verified_len: usize, qber_bound: f64, leak_ec: u64, leak_ver: u64, epsilon_pa: f64) -> Self {
        let entropy_bits = verified_len as f64 * secrecy_capacity(qber_bound);
        let pa_penalty = 2.0 * (1.0 / epsilon_pa).log2();
        let raw = entropy_bits - leak_ec as f64 - leak_ver as f64 - pa_penalty;
        let secret_len = if raw >= 1.0 { raw.floor() as usize } else { 0 };
        Self {
            verified_len,
            qber_bound,
            entropy_bits,
            leak_ec,
            leak_ver,
            pa_penalty,
            raw,
            secret_len,
        }
    }
}

impl std::fmt::Display for KeyLengthBreakdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} · (1 - h2({:.5})) = {:.1}, - leak_EC {} - leak_ver {} - {:.1} = {:.1} → ℓ_sec = {}",
            self.verified_len,
            self.qber_bound,
            self.entropy_bits,
            self.leak_ec,
            self.leak_ver,
            self.pa_penalty,
            self.raw,
            self.secret_len
        )
    }
}

#[derive(Debug, Clone)]
pub struct PrivacyAmplifier {
    epsilon_pa: f64,
    fft_threshold: usize,
}

impl PrivacyAmplifier {
    pub fn new(epsilon_pa: f64, fft_threshold: usize) -> Self {
        Self {
            epsilon_pa,
            fft_threshold,
        }
    }

    pub fn from_config(config: &AmplificationConfig) -> Self {
        Self::new(config.epsilon_pa, config.fft_threshold)
    }

    pub fn breakdown(&self, verified_len: usize, qber: &QberEstimate, leakage: &LeakageCounter) -> KeyLengthBreakdown {
        KeyLengthBreakdown::compute(
            verified_len,
            qber.bound(),
            leakage.reconciliation(),
            leakage.verification(),
            self.epsilon_pa,
        )
    }

    /// `ℓ_sec`, or `SecurityAbort` when nothing can be extracted.
    pub fn secret_length(&self, verified_len: usize, qber: &QberEstimate, leakage: &LeakageCounter) -> Result<usize> {
        let breakdown = self.breakdown(verified_len, qber, leakage);
        debug!("secret length: {breakdown}");
        if breakdown.secret_len == 0 {
            return Err(Error::SecurityAbort(format!(
                "no extractable key: {breakdown}"
            )));
        }
        Ok(breakdown.secret_len)
    }

    /// `T(seed) · key` with `out_len` output bits.
    pub fn compress(&self, key: &BitString, seed: &BitString, out_len: usize) -> Result<BitString> {
        toeplitz::multiply(seed, key, out_len, self.fft_threshold).ok_or_else(|| {
            Error::Channel(format!(
                "Toeplitz seed of {} bits for a {}×{} matrix",
                seed.len(),
                out_len,
                key.len()
            ))
        })
    }

    /// Alice: draw and send the seed, then compress.
    pub fn propose<T: Transport, R: Rng + ?Sized>(
        &self,
        key: &BitString,
        out_len: usize,
        channel: &mut AuthenticatedChannel<'_, T>,
        rng: &mut R,
    ) -> Result<BitString> {
        let seed = BitString::random(toeplitz::seed_len(key.len(), out_len), rng);
        channel.send(&Message::ToeplitzSeed { seed: seed.clone() })?;
        let secret = self.compress(key, &seed, out_len)?;
        info!("amplified {} verified bits to {} secret bits", key.len(), secret.len());
        Ok(secret)
    }

    /// Bob: receive the seed, check its length, then compress.
    pub fn accept<T: Transport>(
        &self,
        key: &BitString,
        out_len: usize,
        channel: &mut AuthenticatedChannel<'_, T>,
    ) -> Result<BitString> {
        let seed = match channel.recv()? {
            Message::ToeplitzSeed { seed } => seed,
            other => return Err(unexpected("ToeplitzSeed", &other)),
        };
        let expected = toeplitz::seed_len(key.len(), out_len);
        if seed.len() != expected {
            return Err(Error::Channel(format!(
                "Toeplitz seed of {} bits, expected {expected}",
                seed.len()
            )));
        }
        let secret = self.compress(key, &seed, out_len)?;
        info!("amplified {} verified bits to {} secret bits", key.len(), secret.len());
        Ok(secret)
    }
}
