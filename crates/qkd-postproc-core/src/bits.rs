//! Ordered bit strings.
//!
//! [`BitString`] is the one representation used for raw, working, reconciled and
//! secret keys, Toeplitz seeds and one-time pads. On the wire it travels packed
//! MSB-first (`len` + bytes), see [`PackedBits`].

use std::ops::Range;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// An ordered, fixed-length sequence of bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "PackedBits", try_from = "PackedBits")]
pub struct BitString {
    bits: Vec<bool>,
}

impl BitString {
    /// Empty bit string.
    pub fn new() -> Self {
        Self::default()
    }

    /// `len` zero bits.
    pub fn zeros(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    /// Uniformly random bits drawn from `rng`.
    pub fn random<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Self {
        Self {
            bits: (0..len).map(|_| rng.random::<bool>()).collect(),
        }
    }

    /// Unpack the first `len` bits of `bytes`, MSB first per byte.
    ///
    /// Returns `None` if `bytes` holds fewer than `len` bits.
    pub fn from_bytes(bytes: &[u8], len: usize) -> Option<Self> {
        if bytes.len() * 8 < len {
            return None;
        }
        let bits = (0..len)
            .map(|i| (bytes[i / 8] >> (7 - (i % 8))) & 1 == 1)
            .collect();
        Some(Self { bits })
    }

    /// All bits of `bytes`, MSB first per byte.
    pub fn from_all_bytes(bytes: &[u8]) -> Self {
        let mut bits = Vec::with_capacity(bytes.len() * 8);
        for &byte in bytes {
            for shift in (0..8).rev() {
                bits.push((byte >> shift) & 1 == 1);
            }
        }
        Self { bits }
    }

    /// Big-endian encoding of the low `width` bits of `value`.
    pub fn from_u64(value: u64, width: usize) -> Self {
        let bits = (0..width)
            .rev()
            .map(|shift| shift < 64 && (value >> shift) & 1 == 1)
            .collect();
        Self { bits }
    }

    /// Pack into bytes, MSB first; the final byte is zero-padded.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bits.len().div_ceil(8));
        for chunk in self.bits.chunks(8) {
            let mut byte = 0u8;
            for (i, &bit) in chunk.iter().enumerate() {
                byte |= (bit as u8) << (7 - i);
            }
            out.push(byte);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Bit at `index`. Panics if out of range, like slice indexing.
    pub fn get(&self, index: usize) -> bool {
        self.bits[index]
    }

    pub fn set(&mut self, index: usize, value: bool) {
        self.bits[index] = value;
    }

    /// Toggle the bit at `index`.
    pub fn flip(&mut self, index: usize) {
        self.bits[index] = !self.bits[index];
    }

    pub fn push(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    pub fn extend_from(&mut self, other: &BitString) {
        self.bits.extend_from_slice(&other.bits);
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().copied()
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// XOR of every bit.
    pub fn parity(&self) -> bool {
        self.count_ones() % 2 == 1
    }

    /// XOR of the bits at `indices`. O(|indices|).
    pub fn parity_of(&self, indices: &[usize]) -> bool {
        indices.iter().fold(false, |acc, &i| acc ^ self.bits[i])
    }

    /// XOR of the bits in `range`.
    pub fn parity_range(&self, range: Range<usize>) -> bool {
        self.bits[range].iter().fold(false, |acc, &b| acc ^ b)
    }

    /// Number of positions where `self` and `other` differ.
    ///
    /// Extra bits of the longer string count as differences.
    pub fn hamming_distance(&self, other: &BitString) -> usize {
        let common = self.bits.len().min(other.bits.len());
        let differing = self.bits[..common]
            .iter()
            .zip(&other.bits[..common])
            .filter(|(a, b)| a != b)
            .count();
        differing + self.bits.len().max(other.bits.len()) - common
    }

    /// Copy of the bits in `range`.
    pub fn slice(&self, range: Range<usize>) -> BitString {
        Self {
            bits: self.bits[range].to_vec(),
        }
    }

    /// Split into `[0, at)` and `[at, len)`.
    pub fn split_at(&self, at: usize) -> (BitString, BitString) {
        let (head, tail) = self.bits.split_at(at);
        (
            Self {
                bits: head.to_vec(),
            },
            Self {
                bits: tail.to_vec(),
            },
        )
    }

    /// Bitwise XOR of two equal-length strings.
    pub fn xor(&self, other: &BitString) -> Option<BitString> {
        if self.len() != other.len() {
            return None;
        }
        Some(
            self.bits
                .iter()
                .zip(&other.bits)
                .map(|(a, b)| a ^ b)
                .collect(),
        )
    }
}

impl From<Vec<bool>> for BitString {
    fn from(bits: Vec<bool>) -> Self {
        Self { bits }
    }
}

impl FromIterator<bool> for BitString {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        Self {
            bits: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for BitString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &bit in &self.bits {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Wire form of a [`BitString`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedBits {
    pub len: u64,
    pub bytes: Vec<u8>,
}

impl From<BitString> for PackedBits {
    fn from(bits: BitString) -> Self {
        Self {
            len: bits.len() as u64,
            bytes: bits.to_bytes(),
        }
    }
}

impl TryFrom<PackedBits> for BitString {
    type Error = String;

    fn try_from(packed: PackedBits) -> Result<Self, Self::Error> {
        let len = usize::try_from(packed.len).map_err(|e| e.to_string())?;
        if packed.bytes.len() != len.div_ceil(8) {
            return Err(format!(
                "packed bit string of {len} bits carries {} bytes",
                packed.bytes.len()
            ));
        }
        BitString::from_bytes(&packed.bytes, len)
            .ok_or_else(|| format!("packed bit string too short for {len} bits"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_bytes_msb_first() {
        let bits = BitString::from(vec![true, false, true, true, false, false, false, false, true]);
        assert_eq!(bits.to_bytes(), vec![0b1011_0000, 0b1000_0000]);
        assert_eq!(BitString::from_bytes(&bits.to_bytes(), 9), Some(bits));
    }

    #[test]
    fn test_from_bytes_too_short() {
        assert!(BitString::from_bytes(&[0xFF], 9).is_none());
    }

    #[test]
    fn test_from_u64_big_endian() {
        assert_eq!(BitString::from_u64(0b1011, 4).to_string(), "1011");
        assert_eq!(BitString::from_u64(1, 8).to_string(), "00000001");
    }

    #[test]
    fn test_parity_helpers_agree() {
        let mut rng = StdRng::seed_from_u64(7);
        let bits = BitString::random(257, &mut rng);
        let all: Vec<usize> = (0..bits.len()).collect();
        assert_eq!(bits.parity(), bits.parity_of(&all));
        assert_eq!(bits.parity(), bits.parity_range(0..bits.len()));
        let evens: Vec<usize> = (0..bits.len()).step_by(2).collect();
        let expected = evens.iter().filter(|&&i| bits.get(i)).count() % 2 == 1;
        assert_eq!(bits.parity_of(&evens), expected);
    }

    #[test]
    fn test_flip_and_hamming() {
        let a = BitString::zeros(16);
        let mut b = a.clone();
        b.flip(3);
        b.flip(15);
        assert_eq!(a.hamming_distance(&b), 2);
        b.flip(3);
        assert_eq!(a.hamming_distance(&b), 1);
        assert_eq!(a.hamming_distance(&BitString::zeros(20)), 4);
    }

    #[test]
    fn test_serde_packed() {
        let mut rng = StdRng::seed_from_u64(1);
        let bits = BitString::random(77, &mut rng);
        let json = serde_json::to_string(&bits).unwrap();
        assert!(json.contains("\"len\":77"));
        let back: BitString = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bits);
    }

    #[test]
    fn test_packed_rejects_wrong_byte_count() {
        let packed = PackedBits {
            len: 9,
            bytes: vec![0xFF],
        };
        assert!(BitString::try_from(packed).is_err());
    }

    #[test]
    fn test_split_and_xor() {
        let bits = BitString::from(vec![true, true, false, true]);
        let (head, tail) = bits.split_at(1);
        assert_eq!(head.to_string(), "1");
        assert_eq!(tail.to_string(), "101");
        let x = bits.xor(&BitString::from(vec![true, false, false, true])).unwrap();
        assert_eq!(x.to_string(), "0100");
        assert!(bits.xor(&head).is_none());
    }
}
