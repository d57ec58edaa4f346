//! Wegman–Carter authentication keyed from a depleting secret-bit buffer.
//!
//! The buffer is pop-only: a bit range handed out once is gone, and every pop reports
//! the absolute offset it came from so peers can confirm they are in lockstep. Tags are
//! `Toeplitz(S) · m ⊕ r`, where the matrix seed `S` is expanded from
//! [`MATRIX_SEED_BITS`] secret bits popped once per session and `r` is a fresh pad
//! popped per message.

use std::collections::VecDeque;
use std::ops::Range;

use crate::bits::BitString;
use crate::seed_stream::{SeedStream, domain};
use crate::toeplitz;
use crate::{Error, Result};

/// Secret bits consumed per session for the Toeplitz matrix seed.
pub const MATRIX_SEED_BITS: usize = 256;

// ---------------------------------------------------------------------------
// Key buffer
// ---------------------------------------------------------------------------

/// Ordered, depletable pool of pre-shared secret bits.
#[derive(Debug, Clone, Default)]
pub struct AuthKeyBuffer {
    bits: VecDeque<bool>,
    consumed: u64,
}

/// Bits popped from an [`AuthKeyBuffer`], with their absolute position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pad {
    pub offset: u64,
    pub bits: BitString,
}

impl Pad {
    /// Absolute buffer range this pad was taken from.
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.bits.len() as u64
    }
}

impl AuthKeyBuffer {
    pub fn new(initial: &BitString) -> Self {
        Self {
            bits: initial.iter().collect(),
            consumed: 0,
        }
    }

    /// Fresh buffer of `len` bits from the OS CSPRNG, for out-of-band pre-sharing.
    pub fn generate(len: usize) -> Result<Self> {
        let mut bytes = vec![0u8; len.div_ceil(8)];
        getrandom::fill(&mut bytes)
            .map_err(|e| Error::Io(std::io::Error::other(format!("OS CSPRNG failed: {e}"))))?;
        let bits = BitString::from_bytes(&bytes, len).unwrap_or_default();
        Ok(Self::new(&bits))
    }

    /// Bits still available.
    pub fn available(&self) -> usize {
        self.bits.len()
    }

    /// Total bits popped so far; the offset of the next pop.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Remove the next `n` bits. Fails without consuming anything if fewer remain.
    pub fn pop(&mut self, n: usize) -> Result<Pad> {
        if n > self.bits.len() {
            return Err(Error::KeyExhaustion {
                requested: n,
                available: self.bits.len(),
            });
        }
        let offset = self.consumed;
        let bits: BitString = self.bits.drain(..n).collect();
        self.consumed += n as u64;
        Ok(Pad { offset, bits })
    }

    /// Append fresh secret bits at the end.
    pub fn replenish(&mut self, bits: &BitString) {
        self.bits.extend(bits.iter());
    }
}

// ---------------------------------------------------------------------------
// Tagging
// ---------------------------------------------------------------------------

/// Per-session Wegman–Carter MAC.
#[derive(Debug, Clone)]
pub struct WegmanCarter {
    matrix_key: Vec<u8>,
    tag_bits: usize,
}

impl WegmanCarter {
    /// Pop the session's matrix seed `S` from `buffer`.
    pub fn from_buffer(buffer: &mut AuthKeyBuffer, tag_bits: usize) -> Result<Self> {
        let seed = buffer.pop(MATRIX_SEED_BITS)?;
        Ok(Self {
            matrix_key: seed.bits.to_bytes(),
            tag_bits,
        })
    }

    pub fn tag_bits(&self) -> usize {
        self.tag_bits
    }

    /// Tag over `len32 ‖ seq ‖ pad_offset ‖ payload`, masked with `pad`.
    pub fn tag(&self, seq: u64, pad: &Pad, payload: &[u8]) -> Result<BitString> {
        if pad.bits.len() != self.tag_bits {
            return Err(Error::Authentication(format!(
                "pad of {} bits for a {}-bit tag",
                pad.bits.len(),
                self.tag_bits
            )));
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| Error::Channel(format!("payload of {} bytes too large", payload.len())))?;
        let mut input = BitString::from_u64(len as u64, 32);
        input.extend_from(&BitString::from_u64(seq, 64));
        input.extend_from(&BitString::from_u64(pad.offset, 64));
        input.extend_from(&BitString::from_all_bytes(payload));

        let mut stream = SeedStream::from_key(&self.matrix_key, domain::AUTH_MATRIX);
        let seed = stream.next_bits(toeplitz::seed_len(input.len(), self.tag_bits));
        toeplitz::multiply_naive(&seed, &input, self.tag_bits)
            .and_then(|hash| hash.xor(&pad.bits))
            .ok_or_else(|| Error::Authentication("tag dimensions inconsistent".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn buffer(len: usize, seed: u64) -> AuthKeyBuffer {
        let mut rng = StdRng::seed_from_u64(seed);
        AuthKeyBuffer::new(&BitString::random(len, &mut rng))
    }

    #[test]
    fn test_pops_are_disjoint_and_contiguous() {
        let mut buf = buffer(1000, 1);
        let mut ranges = Vec::new();
        for n in [40, 256, 40, 1, 40] {
            ranges.push(buf.pop(n).unwrap().range());
        }
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(buf.consumed(), 377);
        assert_eq!(buf.available(), 623);
    }

    #[test]
    fn test_pop_returns_buffer_order() {
        let bits = BitString::from(vec![true, false, false, true, true]);
        let mut buf = AuthKeyBuffer::new(&bits);
        assert_eq!(buf.pop(2).unwrap().bits.to_string(), "10");
        assert_eq!(buf.pop(3).unwrap().bits.to_string(), "011");
    }

    #[test]
    fn test_exhaustion_consumes_nothing() {
        let mut buf = buffer(50, 2);
        buf.pop(20).unwrap();
        let err = buf.pop(40).unwrap_err();
        assert!(matches!(
            err,
            Error::KeyExhaustion {
                requested: 40,
                available: 30
            }
        ));
        assert_eq!(buf.available(), 30);
        assert_eq!(buf.consumed(), 20);
    }

    #[test]
    fn test_replenish_appends() {
        let mut buf = AuthKeyBuffer::new(&BitString::from(vec![true]));
        buf.replenish(&BitString::from(vec![false, true]));
        assert_eq!(buf.available(), 3);
        assert_eq!(buf.pop(3).unwrap().bits.to_string(), "101");
        assert_eq!(buf.consumed(), 3);
    }

    #[test]
    fn test_generate_has_requested_length() {
        let buf = AuthKeyBuffer::generate(1001).unwrap();
        assert_eq!(buf.available(), 1001);
    }

    #[test]
    fn test_peers_compute_same_tag() {
        let mut a = buffer(2000, 3);
        let mut b = a.clone();
        let mac_a = WegmanCarter::from_buffer(&mut a, 40).unwrap();
        let mac_b = WegmanCarter::from_buffer(&mut b, 40).unwrap();
        let pad_a = a.pop(40).unwrap();
        let pad_b = b.pop(40).unwrap();
        assert_eq!(pad_a, pad_b);
        let payload = b"parity report";
        assert_eq!(
            mac_a.tag(0, &pad_a, payload).unwrap(),
            mac_b.tag(0, &pad_b, payload).unwrap()
        );
    }

    #[test]
    fn test_tag_depends_on_every_field() {
        let mut buf = buffer(2000, 4);
        let mac = WegmanCarter::from_buffer(&mut buf, 40).unwrap();
        let pad = buf.pop(40).unwrap();
        let base = mac.tag(5, &pad, b"payload").unwrap();
        assert_eq!(base.len(), 40);
        assert_ne!(base, mac.tag(6, &pad, b"payload").unwrap());
        assert_eq!(base, mac.tag(5, &pad, b"payload").unwrap());
        assert_ne!(base, mac.tag(5, &pad, b"paylaod").unwrap());
        assert_ne!(base, mac.tag(5, &pad, b"payload\0").unwrap());
        let other = buf.pop(40).unwrap();
        assert_ne!(base, mac.tag(5, &other, b"payload").unwrap());
    }

    #[test]
    fn test_pad_length_must_match() {
        let mut buf = buffer(1000, 5);
        let mac = WegmanCarter::from_buffer(&mut buf, 40).unwrap();
        let short = buf.pop(39).unwrap();
        assert!(matches!(mac.tag(0, &short, b"x"), Err(Error::Authentication(_))));
    }
}
