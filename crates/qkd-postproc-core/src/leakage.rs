//! Public-channel disclosure accounting.

use serde::{Deserialize, Serialize};

/// Monotonic count of key bits disclosed over the public channel.
///
/// Reconciliation disclosures (block parities, bisection replies, LDPC syndromes) and
/// verification disclosures (hash tags) are kept apart because the secret-length bound
/// subtracts them as separate terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakageCounter {
    reconciliation: u64,
    verification: u64,
}

impl LeakageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reconciliation(&mut self, bits: usize) {
        self.reconciliation += bits as u64;
    }

    pub fn add_verification(&mut self, bits: usize) {
        self.verification += bits as u64;
    }

    /// `leak_EC`.
    pub fn reconciliation(&self) -> u64 {
        self.reconciliation
    }

    /// `leak_ver`.
    pub fn verification(&self) -> u64 {
        self.verification
    }

    pub fn total(&self) -> u64 {
        self.reconciliation + self.verification
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_accumulate_separately() {
        let mut leak = LeakageCounter::new();
        leak.add_reconciliation(10);
        leak.add_reconciliation(3);
        leak.add_verification(64);
        assert_eq!(leak.reconciliation(), 13);
        assert_eq!(leak.verification(), 64);
        assert_eq!(leak.total(), 77);
    }

    #[test]
    fn test_never_decreases() {
        let mut leak = LeakageCounter::new();
        let mut last = 0;
        for bits in [0, 1, 5, 0, 7] {
            leak.add_reconciliation(bits);
            assert!(leak.total() >= last);
            last = leak.total();
        }
    }
}
