//! In-process two-party simulation.
//!
//! Raw key pairs come from a binary symmetric channel (or with an exact error count);
//! a [`SimulatedLink`] runs Alice and Bob on two threads over a [`MemoryTransport`] and
//! keeps their auth buffers across consecutive sessions.

use std::thread;

use log::debug;
use rand::Rng;

use crate::auth::AuthKeyBuffer;
use crate::bits::BitString;
use crate::channel::MemoryTransport;
use crate::config::SessionConfig;
use crate::session::{PostProcessingController, Role, SessionOutcome};
use crate::{Error, Result};

/// Alice's uniform key and Bob's copy with each bit flipped with probability `qber`.
pub fn binary_symmetric_pair<R: Rng + ?Sized>(len: usize, qber: f64, rng: &mut R) -> (BitString, BitString) {
    let alice = BitString::random(len, rng);
    let bob = alice.iter().map(|bit| bit ^ rng.random_bool(qber.clamp(0.0, 1.0))).collect();
    (alice, bob)
}

/// Alice's uniform key and Bob's copy with exactly `errors` distinct flipped positions.
pub fn exact_error_pair<R: Rng + ?Sized>(len: usize, errors: usize, rng: &mut R) -> (BitString, BitString) {
    let alice = BitString::random(len, rng);
    let mut bob = alice.clone();
    for index in rand::seq::index::sample(rng, len, errors.min(len)).iter() {
        bob.flip(index);
    }
    (alice, bob)
}

/// Both parties' outcomes for one session.
#[derive(Debug, Clone)]
pub struct PairOutcome {
    pub alice: SessionOutcome,
    pub bob: SessionOutcome,
}

impl PairOutcome {
    /// Both produced a key and the keys are equal.
    pub fn keys_match(&self) -> bool {
        match (self.alice.key(), self.bob.key()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Two parties sharing an initial authentication secret.
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    alice_config: SessionConfig,
    bob_config: SessionConfig,
    alice_auth: AuthKeyBuffer,
    bob_auth: AuthKeyBuffer,
}

impl SimulatedLink {
    /// Both parties get `config`; with a seed set, Bob's randomness is derived from it.
    pub fn new(config: &SessionConfig, initial_auth: &BitString) -> Result<Self> {
        config.validate()?;
        let mut bob_config = config.clone();
        bob_config.rng_seed = config.rng_seed.map(|s| s.wrapping_add(0x9E37_79B9_7F4A_7C15));
        let auth = AuthKeyBuffer::new(initial_auth);
        Ok(Self {
            alice_config: config.clone(),
            bob_config,
            alice_auth: auth.clone(),
            bob_auth: auth,
        })
    }

    pub fn alice_auth(&self) -> &AuthKeyBuffer {
        &self.alice_auth
    }

    pub fn bob_auth(&self) -> &AuthKeyBuffer {
        &self.bob_auth
    }

    /// Run one session on the given raw keys.
    ///
    /// Each party's transport end is dropped when its session ends, so a party that
    /// aborts early never leaves the other blocked.
    pub fn run(&mut self, alice_key: &BitString, bob_key: &BitString) -> Result<PairOutcome> {
        let (ta, tb) = MemoryTransport::pair();
        let alice = PostProcessingController::new(
            Role::Alice,
            self.alice_config.clone(),
            ta,
            std::mem::take(&mut self.alice_auth),
        )?;
        let bob = match PostProcessingController::new(
            Role::Bob,
            self.bob_config.clone(),
            tb,
            std::mem::take(&mut self.bob_auth),
        ) {
            Ok(bob) => bob,
            Err(e) => {
                self.alice_auth = alice.into_parts().1;
                return Err(e);
            }
        };

        let (alice, bob) = thread::scope(|s| {
            let a = s.spawn(move || run_party(alice, alice_key));
            let b = s.spawn(move || run_party(bob, bob_key));
            (a.join(), b.join())
        });
        let (alice, alice_auth) = alice.map_err(|_| Error::Channel("alice thread panicked".into()))?;
        let (bob, bob_auth) = bob.map_err(|_| Error::Channel("bob thread panicked".into()))?;
        self.alice_auth = alice_auth;
        self.bob_auth = bob_auth;
        debug!(
            "auth buffers after session: alice {} / bob {} bits",
            self.alice_auth.available(),
            self.bob_auth.available()
        );
        Ok(PairOutcome { alice, bob })
    }
}

fn run_party(
    mut controller: PostProcessingController<MemoryTransport>,
    raw_key: &BitString,
) -> (SessionOutcome, AuthKeyBuffer) {
    let outcome = controller.run(raw_key);
    let (_transport, auth) = controller.into_parts();
    (outcome, auth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_binary_symmetric_pair_rate() {
        let mut rng = StdRng::seed_from_u64(1);
        let (a, b) = binary_symmetric_pair(100_000, 0.05, &mut rng);
        let rate = a.hamming_distance(&b) as f64 / 100_000.0;
        assert!((rate - 0.05).abs() < 0.005, "rate {rate}");
    }

    #[test]
    fn test_exact_error_pair() {
        let mut rng = StdRng::seed_from_u64(2);
        let (a, b) = exact_error_pair(4096, 50, &mut rng);
        assert_eq!(a.hamming_distance(&b), 50);
        let (a, b) = exact_error_pair(10, 99, &mut rng);
        assert_eq!(a.hamming_distance(&b), 10);
    }

    #[test]
    fn test_link_rejects_invalid_config() {
        let mut config = SessionConfig::default();
        config.prior_qber = 0.7;
        assert!(SimulatedLink::new(&config, &BitString::zeros(1024)).is_err());
    }
}
