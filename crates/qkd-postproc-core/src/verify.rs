//! Post-reconciliation key verification with a polynomial universal hash.
//!
//! The key is cut into field elements `m_1 … m_t` (the last zero-padded), the bit length
//! is appended as `m_{t+1}`, and the hash is the Horner evaluation
//! `h(x) = m_1·x^t ⊕ … ⊕ m_t·x ⊕ m_{t+1}` at a non-zero point chosen by Alice. Two
//! different keys of length `L` collide for at most `t` points, so a false accept has
//! probability at most `⌈L / field_bits + 1⌉ / 2^field_bits`.

use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bits::BitString;
use crate::channel::{AuthenticatedChannel, Transport};
use crate::message::{Message, unexpected};
use crate::{Error, Result};

/// Hash field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashField {
    /// GF(2^64) modulo `x^64 + x^4 + x^3 + x + 1`.
    #[default]
    Gf64,
    /// GF(2^128) modulo `x^128 + x^7 + x^2 + x + 1`.
    Gf128,
}

impl HashField {
    pub fn bits(self) -> usize {
        match self {
            Self::Gf64 => 64,
            Self::Gf128 => 128,
        }
    }

    fn mask(self) -> u128 {
        match self {
            Self::Gf64 => u64::MAX as u128,
            Self::Gf128 => u128::MAX,
        }
    }

    /// Product in this field; operands must fit the field width.
    pub fn mul(self, a: u128, b: u128) -> u128 {
        match self {
            Self::Gf64 => gf64_mul(a as u64, b as u64) as u128,
            Self::Gf128 => gf128_mul(a, b),
        }
    }
}

fn gf64_mul(mut a: u64, mut b: u64) -> u64 {
    let mut r = 0u64;
    while b != 0 {
        if b & 1 == 1 {
            r ^= a;
        }
        let carry = a >> 63;
        a <<= 1;
        if carry == 1 {
            a ^= 0x1B;
        }
        b >>= 1;
    }
    r
}

fn gf128_mul(mut a: u128, mut b: u128) -> u128 {
    let mut r = 0u128;
    while b != 0 {
        if b & 1 == 1 {
            r ^= a;
        }
        let carry = a >> 127;
        a <<= 1;
        if carry == 1 {
            a ^= 0x87;
        }
        b >>= 1;
    }
    r
}

#[derive(Debug, Clone, Copy)]
pub struct KeyVerifier {
    field: HashField,
}

impl KeyVerifier {
    pub fn new(field: HashField) -> Self {
        Self { field }
    }

    /// Bits disclosed by one verification (the tag).
    pub fn tag_bits(&self) -> usize {
        self.field.bits()
    }

    /// Upper bound on the false-accept probability for keys of `len` bits.
    pub fn collision_bound(&self, len: usize) -> f64 {
        let elements = (len / self.field.bits() + 1) as f64;
        elements / 2f64.powi(self.field.bits() as i32)
    }

    /// Uniform non-zero field element.
    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> u128 {
        loop {
            let point = rng.random::<u128>() & self.field.mask();
            if point != 0 {
                return point;
            }
        }
    }

    /// Polynomial hash of `key` at `point`.
    pub fn hash(&self, key: &BitString, point: u128) -> u128 {
        let width = self.field.bits();
        let mut h = 0u128;
        for chunk in key.as_slice().chunks(width) {
            let element = chunk
                .iter()
                .fold(0u128, |acc, &bit| (acc << 1) | bit as u128)
                << (width - chunk.len());
            h = self.field.mul(h, point) ^ element;
        }
        self.field.mul(h, point) ^ (key.len() as u128 & self.field.mask())
    }

    /// Alice: send `VerifyHash`, wait for Bob's verdict.
    pub fn propose<T: Transport, R: Rng + ?Sized>(
        &self,
        key: &BitString,
        channel: &mut AuthenticatedChannel<'_, T>,
        rng: &mut R,
    ) -> Result<()> {
        let point = self.random_point(rng);
        channel.send(&Message::VerifyHash {
            point,
            tag: self.hash(key, point),
        })?;
        match channel.recv()? {
            Message::VerifyResult { matched: true } => {
                info!("key verified ({} bits)", key.len());
                Ok(())
            }
            Message::VerifyResult { matched: false } => {
                warn!("peer reports verification hash mismatch");
                Err(Error::VerificationFailure)
            }
            other => Err(unexpected("VerifyResult", &other)),
        }
    }

    /// Bob: recompute the hash at Alice's point and report the verdict.
    pub fn accept<T: Transport>(&self, key: &BitString, channel: &mut AuthenticatedChannel<'_, T>) -> Result<()> {
        let (point, tag) = match channel.recv()? {
            Message::VerifyHash { point, tag } => (point, tag),
            other => return Err(unexpected("VerifyHash", &other)),
        };
        if point == 0 || point & !self.field.mask() != 0 {
            return Err(Error::Channel(format!(
                "evaluation point outside {:?}",
                self.field
            )));
        }
        let matched = self.hash(key, point) == tag;
        channel.send(&Message::VerifyResult { matched })?;
        if matched {
            info!("key verified ({} bits)", key.len());
            Ok(())
        } else {
            warn!("verification hash mismatch");
            Err(Error::VerificationFailure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_field_identities() {
        for field in [HashField::Gf64, HashField::Gf128] {
            let mut rng = StdRng::seed_from_u64(1);
            let a = rng.random::<u128>() & field.mask();
            let b = rng.random::<u128>() & field.mask();
            let c = rng.random::<u128>() & field.mask();
            assert_eq!(field.mul(a, 1), a);
            assert_eq!(field.mul(a, 0), 0);
            assert_eq!(field.mul(a, b), field.mul(b, a));
            assert_eq!(field.mul(a, b ^ c), field.mul(a, b) ^ field.mul(a, c));
            assert_eq!(field.mul(field.mul(a, b), c), field.mul(a, field.mul(b, c)));
        }
    }

    #[test]
    fn test_reduction_polynomials() {
        // x^63 · x = x^64 ≡ x^4 + x^3 + x + 1
        assert_eq!(HashField::Gf64.mul(1 << 63, 2), 0x1B);
        // x^127 · x = x^128 ≡ x^7 + x^2 + x + 1
        assert_eq!(HashField::Gf128.mul(1 << 127, 2), 0x87);
    }

    #[test]
    fn test_equal_keys_equal_hash() {
        let mut rng = StdRng::seed_from_u64(2);
        let key = BitString::random(1000, &mut rng);
        let v = KeyVerifier::new(HashField::Gf64);
        let point = v.random_point(&mut rng);
        assert_eq!(v.hash(&key, point), v.hash(&key.clone(), point));
    }

    #[test]
    fn test_single_flip_detected() {
        let mut rng = StdRng::seed_from_u64(3);
        for field in [HashField::Gf64, HashField::Gf128] {
            let v = KeyVerifier::new(field);
            let key = BitString::random(4096, &mut rng);
            let mut other = key.clone();
            other.flip(1234);
            for _ in 0..20 {
                let point = v.random_point(&mut rng);
                assert_ne!(v.hash(&key, point), v.hash(&other, point));
            }
        }
    }

    #[test]
    fn test_length_is_hashed() {
        let v = KeyVerifier::new(HashField::Gf64);
        let short = BitString::zeros(10);
        let long = BitString::zeros(11);
        assert_ne!(v.hash(&short, 12345), v.hash(&long, 12345));
    }

    #[test]
    fn test_collision_bound() {
        let v = KeyVerifier::new(HashField::Gf64);
        let bound = v.collision_bound(4096);
        assert!((bound - 65.0 / 2f64.powi(64)).abs() < 1e-30);
        assert!(KeyVerifier::new(HashField::Gf128).collision_bound(4096) < bound);
    }

    #[test]
    fn test_random_point_fits_field() {
        let mut rng = StdRng::seed_from_u64(4);
        let v = KeyVerifier::new(HashField::Gf64);
        for _ in 0..100 {
            let p = v.random_point(&mut rng);
            assert!(p != 0 && p <= u64::MAX as u128);
        }
    }

    #[test]
    fn test_field_serde_names() {
        assert_eq!(serde_json::to_string(&HashField::Gf128).unwrap(), "\"gf128\"");
    }
}
