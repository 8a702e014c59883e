// zkChannels Core Library implementing anonymous bitcoin payment channels
// Written in 2020-2022 by
//     zkChannels contributors
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! Revocation material: secrets, locks and lock commitments.
//!
//! Every channel state carries a revocation lock `SHA256(secret)`. When the
//! customer moves to the next state it first commits to the lock of the
//! current state (`SHA256(lock || t)` with random blinding factor `t`) and,
//! once it holds merchant signatures for the new state, reveals the secret
//! together with the opening of the commitment. Revealed secrets allow the
//! merchant to spend the revocation branch of stale customer-close
//! transactions.

use bitcoin::hashes::{sha256, Hash, HashEngine};
use rand::{CryptoRng, RngCore};
use tx::RevLock;

use crate::random_bytes;
use crate::state::Nonce;

slice32_wrapper!(
    /// Preimage of a revocation lock
    RevSecret
);

impl RevSecret {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> RevSecret {
        RevSecret::from_bytes(random_bytes(rng))
    }

    #[inline]
    pub fn rev_lock(&self) -> RevLock {
        RevLock::from_bytes(sha256::Hash::hash(&self.to_bytes()).into_inner())
    }
}

slice32_wrapper!(
    /// Randomness hiding the revocation lock inside [`RevLockCom`]
    BlindingFactor
);

impl BlindingFactor {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> BlindingFactor {
        BlindingFactor::from_bytes(random_bytes(rng))
    }
}

slice32_wrapper!(
    /// Hiding commitment to a revocation lock
    RevLockCom
);

impl RevLockCom {
    pub fn with(rev_lock: RevLock, t: BlindingFactor) -> RevLockCom {
        let mut engine = sha256::Hash::engine();
        engine.input(&rev_lock.to_bytes());
        engine.input(&t.to_bytes());
        RevLockCom::from_bytes(sha256::Hash::from_engine(engine).into_inner())
    }

    #[inline]
    pub fn opens_with(&self, rev_lock: RevLock, t: BlindingFactor) -> bool {
        RevLockCom::with(rev_lock, t) == *self
    }
}

/// Revocation of a channel state sent by the customer to the merchant
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct RevokedState {
    /// Nonce of the revoked state
    pub nonce: Nonce,
    pub rev_lock_com: RevLockCom,
    pub rev_lock: RevLock,
    pub rev_secret: RevSecret,
    pub t: BlindingFactor,
}

impl RevokedState {
    /// Checks that the secret is the preimage of the lock and the lock opens
    /// the commitment
    pub fn verify(&self) -> bool {
        self.rev_secret.rev_lock() == self.rev_lock
            && self.rev_lock_com.opens_with(self.rev_lock, self.t)
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn revoked(rng: &mut StdRng) -> RevokedState {
        let rev_secret = RevSecret::random(rng);
        let rev_lock = rev_secret.rev_lock();
        let t = BlindingFactor::random(rng);
        RevokedState {
            nonce: Nonce::random(rng),
            rev_lock_com: RevLockCom::with(rev_lock, t),
            rev_lock,
            rev_secret,
            t,
        }
    }

    #[test]
    fn valid_revocation() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(revoked(&mut rng).verify());
    }

    #[test]
    fn wrong_secret() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut revoked = revoked(&mut rng);
        revoked.rev_secret = RevSecret::random(&mut rng);
        assert!(!revoked.verify());
    }

    #[test]
    fn wrong_blinding_factor() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut revoked = revoked(&mut rng);
        revoked.t = BlindingFactor::random(&mut rng);
        assert!(!revoked.verify());
    }

    #[test]
    fn commitment_hides_lock() {
        let mut rng = StdRng::seed_from_u64(10);
        let lock = RevSecret::random(&mut rng).rev_lock();
        let com1 = RevLockCom::with(lock, BlindingFactor::random(&mut rng));
        let com2 = RevLockCom::with(lock, BlindingFactor::random(&mut rng));
        assert_ne!(com1, com2);
    }

    #[test]
    fn secret_hex_roundtrip() {
        let mut rng = StdRng::seed_from_u64(11);
        let secret = RevSecret::random(&mut rng);
        let parsed: RevSecret = secret.to_string().parse().unwrap();
        assert_eq!(parsed, secret);
    }
}
