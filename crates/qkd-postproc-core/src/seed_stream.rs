//! Deterministic expansion of shared seeds.
//!
//! Both parties must derive bit-identical permutations, parity-check matrices and
//! authentication matrix seeds from a short value they agreed on over the channel.
//! [`SeedStream`] is the single gateway for that: a SHA-256 chained counter-mode
//! stream, domain-separated by label.
//!
//! ```text
//! state_0 = SHA-256(label || 0x00 || key)
//! block_i = state_{i+1} = SHA-256(state_i || key || i)
//! ```

use sha2::{Digest, Sha256};

use crate::bits::BitString;

/// Domain labels. Distinct labels never share output.
pub mod domain {
    pub const PERMUTATION: &str = "qkd-postproc/cascade-permutation";
    pub const LDPC_MATRIX: &str = "qkd-postproc/ldpc-matrix";
    pub const AUTH_MATRIX: &str = "qkd-postproc/auth-toeplitz-seed";
}

/// SHA-256 chained counter-mode byte stream.
#[derive(Debug, Clone)]
pub struct SeedStream {
    key: Vec<u8>,
    state: [u8; 32],
    counter: u64,
    offset: usize,
}

impl SeedStream {
    /// Stream keyed by a 64-bit public seed.
    pub fn new(seed: u64, label: &str) -> Self {
        Self::from_key(&seed.to_le_bytes(), label)
    }

    /// Stream keyed by arbitrary key material (e.g. secret pad bits).
    pub fn from_key(key: &[u8], label: &str) -> Self {
        let mut h = Sha256::new();
        h.update(label.as_bytes());
        h.update([0u8]);
        h.update(key);
        let state: [u8; 32] = h.finalize().into();
        let mut stream = Self {
            key: key.to_vec(),
            state,
            counter: 0,
            offset: 0,
        };
        stream.advance();
        stream
    }

    fn advance(&mut self) {
        let mut h = Sha256::new();
        h.update(self.state);
        h.update(&self.key);
        h.update(self.counter.to_le_bytes());
        self.state = h.finalize().into();
        self.counter += 1;
        self.offset = 0;
    }

    pub fn next_byte(&mut self) -> u8 {
        if self.offset == self.state.len() {
            self.advance();
        }
        let b = self.state[self.offset];
        self.offset += 1;
        b
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        for b in &mut buf {
            *b = self.next_byte();
        }
        u64::from_le_bytes(buf)
    }

    /// Uniform integer in `[0, bound)` by rejection sampling. `bound` must be > 0.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        debug_assert!(bound > 0);
        // Largest multiple of `bound` representable; values at or above it are redrawn.
        let zone = u64::MAX - (u64::MAX % bound);
        loop {
            let v = self.next_u64();
            if v < zone {
                return v % bound;
            }
        }
    }

    /// Next `n` bits, MSB first per byte.
    pub fn next_bits(&mut self, n: usize) -> BitString {
        let bytes: Vec<u8> = (0..n.div_ceil(8)).map(|_| self.next_byte()).collect();
        BitString::from_all_bytes(&bytes).slice(0..n)
    }
}

/// Fisher–Yates permutation of `[0, n)` drawn from `stream`.
///
/// `perm[position]` is the key index placed at `position`.
pub fn permutation(n: usize, stream: &mut SeedStream) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = stream.next_below(i as u64 + 1) as usize;
        perm.swap(i, j);
    }
    perm
}
