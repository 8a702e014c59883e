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

//! Channel state signed by the merchant through the pay token, and the
//! status types tracked by both parties.

use std::fmt::{self, Display, Formatter};

use amplify::hex::ToHex;
use bitcoin::hashes::hmac::{Hmac, HmacEngine};
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::Txid;
use rand::{CryptoRng, RngCore};
use secp256k1::PublicKey;
use tx::{CloseBalances, Prevout, RevLock};

use crate::random_bytes;

/// Per-state nonce: random per-channel salt followed by a big-endian round
/// counter. Nonces are unique across channels and strictly increasing within
/// a channel.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct Nonce([u8; 16]);

impl Nonce {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Nonce {
        let mut nonce = [0u8; 16];
        nonce[..8].copy_from_slice(&random_bytes::<R, 8>(rng));
        Nonce(nonce)
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Nonce { Nonce(bytes) }

    #[inline]
    pub fn to_bytes(&self) -> [u8; 16] { self.0 }

    pub fn counter(&self) -> u64 {
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&self.0[8..]);
        u64::from_be_bytes(counter)
    }

    /// Nonce for the next channel state. The counter saturates, so an
    /// exhausted channel repeats its last nonce, which is then rejected by
    /// the merchant as reused.
    pub fn next(&self) -> Nonce {
        let mut nonce = self.0;
        let counter = self.counter().saturating_add(1);
        nonce[8..].copy_from_slice(&counter.to_be_bytes());
        Nonce(nonce)
    }
}

impl Display for Nonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_hex())
    }
}

/// Identifier of a merchant-side payment session, chosen by the customer
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct SessionId([u8; 16]);

impl SessionId {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> SessionId {
        SessionId(random_bytes(rng))
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_hex())
    }
}

slice32_wrapper!(
    /// Merchant key for pay token authentication
    HmacKey
);

impl HmacKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> HmacKey {
        HmacKey::from_bytes(random_bytes(rng))
    }
}

slice32_wrapper!(
    /// SHA256 commitment to the full channel state
    StateHash
);

slice32_wrapper!(
    /// Merchant authentication of a channel state: HMAC-SHA256 of the state
    /// hash under the merchant key. Holding a valid pay token for the
    /// current state is required to make the next payment.
    PayToken
);

impl PayToken {
    pub fn compute(key: &HmacKey, state: &State) -> PayToken {
        let mut engine = HmacEngine::<sha256::Hash>::new(&key.to_bytes());
        engine.input(&state.hash().to_bytes());
        let hmac = Hmac::<sha256::Hash>::from_engine(engine);
        PayToken::from_bytes(hmac.into_inner())
    }
}

/// Channel state: balances and revocation lock of one payment round
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct State {
    pub nonce: Nonce,
    pub rev_lock: RevLock,
    pub pk_c: PublicKey,
    pub pk_m: PublicKey,
    /// Customer balance
    pub bc: i64,
    /// Merchant balance
    pub bm: i64,
    pub escrow_txid: Txid,
    pub merch_txid: Txid,
    pub escrow_prevout: Prevout,
    pub merch_prevout: Prevout,
}

impl State {
    pub fn hash(&self) -> StateHash {
        let mut engine = sha256::Hash::engine();
        engine.input(&self.nonce.to_bytes());
        engine.input(&self.rev_lock.to_bytes());
        engine.input(&self.pk_c.serialize());
        engine.input(&self.pk_m.serialize());
        engine.input(&self.bc.to_be_bytes());
        engine.input(&self.bm.to_be_bytes());
        engine.input(&self.escrow_txid.into_inner());
        engine.input(&self.merch_txid.into_inner());
        engine.input(&self.escrow_prevout.to_bytes());
        engine.input(&self.merch_prevout.to_bytes());
        StateHash::from_bytes(sha256::Hash::from_engine(engine).into_inner())
    }

    #[inline]
    pub fn balances(&self) -> Result<CloseBalances, tx::Error> {
        CloseBalances::with(self.bc, self.bm)
    }

    /// Next channel state after transferring `amount` from the customer to
    /// the merchant. Negative amounts denote refunds.
    pub fn with_payment(&self, amount: i64, rev_lock: RevLock) -> State {
        State {
            nonce: self.nonce.next(),
            rev_lock,
            bc: self.bc - amount,
            bm: self.bm + amount,
            ..*self
        }
    }
}

/// Stage of the channel protocol on the customer side
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum Lifecycle {
    /// Keys and initial balances are generated
    #[display("INIT")]
    Initialized,

    /// Escrow and merch-close transactions are formed and the initial
    /// customer-close transactions are signed by the merchant
    #[display("FUNDED")]
    Funded,

    /// Activation is requested from the merchant
    #[display("ACTIVATED")]
    Activated,

    /// Customer holds a pay token and can make payments
    #[display("OPEN")]
    Open,

    /// Close transaction is signed and handed for broadcast
    #[display("CLOSING")]
    Closing,

    /// Channel funds are claimed
    #[display("CLOSED")]
    Closed,

    /// Stale state was broadcast and punished
    #[display("DISPUTED")]
    Disputed,
}

impl Default for Lifecycle {
    fn default() -> Self { Lifecycle::Initialized }
}

/// On-chain status of the channel
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum ChannelStatus {
    #[display("none")]
    None,

    /// Escrow transaction is formed but not confirmed
    #[display("pending-open")]
    PendingOpen,

    #[display("open")]
    Open,

    #[display("merchant-init-close")]
    MerchantInitClose,

    #[display("customer-init-close")]
    CustomerInitClose,

    #[display("disputed")]
    Disputed,

    #[display("pending-close")]
    PendingClose,

    #[display("confirmed-close")]
    ConfirmedClose,
}

impl Default for ChannelStatus {
    fn default() -> Self { ChannelStatus::None }
}

/// Status of a merchant payment session
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum PaymentStatus {
    /// Pay mask commitment is issued
    #[display("prepare")]
    Prepare,

    /// Masking inputs are handed to the payment token service
    #[display("update")]
    Update,

    /// Masking succeeded and transaction masks are released
    #[display("confirmed")]
    Confirmed,

    /// Previous state is revoked and the pay token mask is released
    #[display("revoked")]
    Revoked,

    #[display("error")]
    Error,
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use secp256k1::SecretKey;

    use super::*;

    pub(crate) fn sample_state(rng: &mut StdRng) -> State {
        let sk = SecretKey::new(rng);
        State {
            nonce: Nonce::random(rng),
            rev_lock: RevLock::from_bytes([1u8; 32]),
            pk_c: pk!(sk),
            pk_m: pk!(sk),
            bc: 1000,
            bm: 2000,
            escrow_txid: Txid::all_zeros(),
            merch_txid: Txid::all_zeros(),
            escrow_prevout: default!(),
            merch_prevout: default!(),
        }
    }

    #[test]
    fn nonce_sequence() {
        let mut rng = StdRng::seed_from_u64(1);
        let nonce = Nonce::random(&mut rng);
        assert_eq!(nonce.counter(), 0);
        let next = nonce.next();
        assert_eq!(next.counter(), 1);
        assert!(next > nonce);
        assert_eq!(nonce.to_bytes()[..8], next.to_bytes()[..8]);
        assert_ne!(nonce, Nonce::random(&mut rng));
    }

    #[test]
    fn nonce_saturates() {
        let mut bytes = [0u8; 16];
        bytes[8..].copy_from_slice(&u64::MAX.to_be_bytes());
        let nonce = Nonce::from_bytes(bytes);
        assert_eq!(nonce.next(), nonce);
    }

    #[test]
    fn state_hash_binds_balances() {
        let mut rng = StdRng::seed_from_u64(2);
        let state = sample_state(&mut rng);
        let next = state.with_payment(10, RevLock::from_bytes([2u8; 32]));
        assert_eq!(next.bc, 990);
        assert_eq!(next.bm, 2010);
        assert_eq!(next.bc + next.bm, state.bc + state.bm);
        assert_eq!(next.nonce, state.nonce.next());
        assert_ne!(state.hash(), next.hash());
        assert_eq!(state.hash(), state.hash());
    }

    #[test]
    fn pay_token_depends_on_key() {
        let mut rng = StdRng::seed_from_u64(3);
        let state = sample_state(&mut rng);
        let key1 = HmacKey::random(&mut rng);
        let key2 = HmacKey::random(&mut rng);
        assert_eq!(
            PayToken::compute(&key1, &state),
            PayToken::compute(&key1, &state)
        );
        assert_ne!(
            PayToken::compute(&key1, &state),
            PayToken::compute(&key2, &state)
        );
    }
}
