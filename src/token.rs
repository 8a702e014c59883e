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

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::{OutPoint, Txid};
use secp256k1::PublicKey;
use tx::transactions::{cust_close_tx, merch_close_tx};
use tx::{ClosingKeys, CloseSource, Prevout, SignableTx, TxidBytes};

use crate::params::ChannelParams;
use crate::state::State;
use crate::Error;

slice32_wrapper!(
    /// Channel identifier: hash of all channel token fields
    ChannelId
);

/// Long-term public keys of the merchant
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct MerchantPublicKeys {
    /// Escrow key
    pub pk_m: PublicKey,
    /// Key receiving merchant funds on close
    pub payout_pk: PublicKey,
    /// Key spending revocation branch of stale customer-close outputs
    pub dispute_pk: PublicKey,
}

/// Identifiers of the escrow and merch-close transactions and the initial
/// channel balances
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct FundingTxInfo {
    pub escrow_txid: Txid,
    pub escrow_prevout: Prevout,
    pub merch_txid: Txid,
    pub merch_prevout: Prevout,
    pub init_cust_bal: i64,
    pub init_merch_bal: i64,
    pub fee_mc: u64,
    pub min_fee: u64,
    pub max_fee: u64,
}

impl FundingTxInfo {
    /// Escrow output is always the first output of the escrow transaction
    #[inline]
    pub fn escrow_outpoint(&self) -> OutPoint {
        OutPoint::new(self.escrow_txid, 0)
    }

    /// Merch-close output is always the first output of the merch-close
    /// transaction
    #[inline]
    pub fn merch_outpoint(&self) -> OutPoint {
        OutPoint::new(self.merch_txid, 0)
    }

    /// Total value of the escrow output
    #[inline]
    pub fn escrow_value(&self) -> Result<u64, Error> {
        escrow_value(self.init_cust_bal, self.init_merch_bal)
    }
}

/// Sums initial balances into the escrow output value, failing on overflow
pub(crate) fn escrow_value(
    cust_bal: i64,
    merch_bal: i64,
) -> Result<u64, Error> {
    cust_bal
        .checked_add(merch_bal)
        .and_then(|value| u64::try_from(value).ok())
        .ok_or(Error::InvalidBalance {
            balance: cust_bal.saturating_add(merch_bal),
            minimum: 0,
        })
}

/// Public immutable commitment binding the keys of both parties and the
/// funding transactions into a channel identity
#[derive(Getters, Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ChannelToken {
    /// Customer escrow key
    #[getter(as_copy)]
    pk_c: PublicKey,

    /// Merchant escrow key
    #[getter(as_copy)]
    pk_m: PublicKey,

    #[getter(as_copy)]
    merch_payout_pk: PublicKey,

    #[getter(as_copy)]
    merch_dispute_pk: PublicKey,

    #[getter(as_copy)]
    escrow_txid: Txid,

    #[getter(as_copy)]
    escrow_prevout: Prevout,

    #[getter(as_copy)]
    merch_txid: Txid,

    #[getter(as_copy)]
    merch_prevout: Prevout,
}

impl ChannelToken {
    pub fn with(
        pk_c: PublicKey,
        merchant: &MerchantPublicKeys,
        funding: &FundingTxInfo,
    ) -> ChannelToken {
        ChannelToken {
            pk_c,
            pk_m: merchant.pk_m,
            merch_payout_pk: merchant.payout_pk,
            merch_dispute_pk: merchant.dispute_pk,
            escrow_txid: funding.escrow_txid,
            escrow_prevout: funding.escrow_prevout,
            merch_txid: funding.merch_txid,
            merch_prevout: funding.merch_prevout,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        let mut engine = sha256::Hash::engine();
        engine.input(&self.pk_c.serialize());
        engine.input(&self.pk_m.serialize());
        engine.input(&self.merch_payout_pk.serialize());
        engine.input(&self.merch_dispute_pk.serialize());
        engine.input(&self.escrow_txid.to_le_bytes());
        engine.input(&self.escrow_prevout.to_bytes());
        engine.input(&self.merch_txid.to_le_bytes());
        engine.input(&self.merch_prevout.to_bytes());
        ChannelId::from_bytes(sha256::Hash::from_engine(engine).into_inner())
    }

    #[inline]
    pub fn escrow_txid_be(&self) -> [u8; 32] { self.escrow_txid.to_be_bytes() }

    #[inline]
    pub fn escrow_txid_le(&self) -> [u8; 32] { self.escrow_txid.to_le_bytes() }

    #[inline]
    pub fn merch_txid_be(&self) -> [u8; 32] { self.merch_txid.to_be_bytes() }

    #[inline]
    pub fn merch_txid_le(&self) -> [u8; 32] { self.merch_txid.to_le_bytes() }

    #[inline]
    pub fn escrow_outpoint(&self) -> OutPoint {
        OutPoint::new(self.escrow_txid, 0)
    }

    #[inline]
    pub fn merch_outpoint(&self) -> OutPoint {
        OutPoint::new(self.merch_txid, 0)
    }

    pub fn merchant_keys(&self) -> MerchantPublicKeys {
        MerchantPublicKeys {
            pk_m: self.pk_m,
            payout_pk: self.merch_payout_pk,
            dispute_pk: self.merch_dispute_pk,
        }
    }

    pub fn closing_keys(&self, cust_close_pk: PublicKey) -> ClosingKeys {
        ClosingKeys {
            merch_pk: self.pk_m,
            cust_pk: self.pk_c,
            merch_payout_pk: self.merch_payout_pk,
            merch_dispute_pk: self.merch_dispute_pk,
            cust_close_pk,
        }
    }

    /// Forms customer-close transaction distributing the given channel
    /// state
    pub fn cust_close_tx(
        &self,
        source: CloseSource,
        state: &State,
        cust_close_pk: PublicKey,
        params: &ChannelParams,
    ) -> Result<SignableTx, tx::Error> {
        let prevout = match source {
            CloseSource::Escrow => self.escrow_outpoint(),
            CloseSource::MerchClose => self.merch_outpoint(),
        };
        cust_close_tx(
            source,
            prevout,
            state.balances()?,
            state.rev_lock,
            &self.closing_keys(cust_close_pk),
            params.self_delay,
            &params.fees,
            params.dust_limit,
        )
    }

    /// Forms merch-close transaction spending the escrow output of the given
    /// value
    pub fn merch_close_tx(
        &self,
        escrow_value: u64,
        params: &ChannelParams,
    ) -> Result<SignableTx, tx::Error> {
        // customer close key does not take part in merch-close scripts
        let keys = self.closing_keys(self.pk_c);
        merch_close_tx(
            self.escrow_outpoint(),
            escrow_value,
            &keys,
            params.self_delay,
            &params.fees,
            params.dust_limit,
        )
    }

    /// Verifies that the token was issued for the given merchant keys
    pub fn check_merchant(
        &self,
        keys: &MerchantPublicKeys,
    ) -> Result<(), Error> {
        if self.pk_m != keys.pk_m {
            return Err(Error::ChannelTokenMismatch("merchant escrow key"));
        }
        if self.merch_payout_pk != keys.payout_pk {
            return Err(Error::ChannelTokenMismatch("merchant payout key"));
        }
        if self.merch_dispute_pk != keys.dispute_pk {
            return Err(Error::ChannelTokenMismatch("merchant dispute key"));
        }
        Ok(())
    }

    /// Verifies that the channel state refers to this channel
    pub fn check_state(&self, state: &State) -> Result<(), Error> {
        if state.pk_c != self.pk_c {
            return Err(Error::ChannelTokenMismatch("customer key"));
        }
        if state.pk_m != self.pk_m {
            return Err(Error::ChannelTokenMismatch("merchant escrow key"));
        }
        if state.escrow_txid != self.escrow_txid
            || state.escrow_prevout != self.escrow_prevout
        {
            return Err(Error::ChannelTokenMismatch("escrow transaction"));
        }
        if state.merch_txid != self.merch_txid
            || state.merch_prevout != self.merch_prevout
        {
            return Err(Error::ChannelTokenMismatch("merch-close transaction"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use secp256k1::SecretKey;

    use super::*;
    use crate::state::Nonce;
    use crate::RevLock;

    fn token(rng: &mut StdRng) -> (ChannelToken, State) {
        let pk_c = pk!(SecretKey::new(rng));
        let merchant = MerchantPublicKeys {
            pk_m: pk!(SecretKey::new(rng)),
            payout_pk: pk!(SecretKey::new(rng)),
            dispute_pk: pk!(SecretKey::new(rng)),
        };
        let escrow_txid = Txid::from_inner([1u8; 32]);
        let merch_txid = Txid::from_inner([2u8; 32]);
        let funding = FundingTxInfo {
            escrow_txid,
            escrow_prevout: Prevout::with(OutPoint::new(escrow_txid, 0)),
            merch_txid,
            merch_prevout: Prevout::with(OutPoint::new(merch_txid, 0)),
            init_cust_bal: 1000,
            init_merch_bal: 1000,
            fee_mc: 100,
            min_fee: 0,
            max_fee: 1000,
        };
        let token = ChannelToken::with(pk_c, &merchant, &funding);
        let state = State {
            nonce: Nonce::random(rng),
            rev_lock: RevLock::from_bytes([3u8; 32]),
            pk_c,
            pk_m: merchant.pk_m,
            bc: 1000,
            bm: 1000,
            escrow_txid,
            merch_txid,
            escrow_prevout: funding.escrow_prevout,
            merch_prevout: funding.merch_prevout,
        };
        (token, state)
    }

    #[test]
    fn state_matches_token() {
        let mut rng = StdRng::seed_from_u64(1);
        let (token, state) = token(&mut rng);
        assert_eq!(token.check_state(&state), Ok(()));
        assert_eq!(token.check_merchant(&token.merchant_keys()), Ok(()));
        assert_eq!(token.escrow_txid_be()[0], 1);
    }

    #[test]
    fn token_fields_match_state() {
        let mut rng = StdRng::seed_from_u64(3);
        let (token, state) = token(&mut rng);
        let keys: (PublicKey, PublicKey) = (token.pk_c(), token.pk_m());
        assert_eq!(keys, (state.pk_c, state.pk_m));
        let txids: (Txid, Txid) = (token.escrow_txid(), token.merch_txid());
        assert_eq!(txids, (state.escrow_txid, state.merch_txid));
        let prevouts: (Prevout, Prevout) =
            (token.escrow_prevout(), token.merch_prevout());
        assert_eq!(prevouts, (state.escrow_prevout, state.merch_prevout));
        let outpoint = OutPoint::new(state.escrow_txid, 0);
        assert_eq!(token.escrow_outpoint(), outpoint);
    }

    #[test]
    fn escrow_value_overflow() {
        assert_eq!(escrow_value(1000, 1000), Ok(2000));
        assert_eq!(
            escrow_value(i64::MAX, 1),
            Err(Error::InvalidBalance {
                balance: i64::MAX,
                minimum: 0
            })
        );
    }

    #[test]
    fn state_from_other_channel() {
        let mut rng = StdRng::seed_from_u64(2);
        let (token, mut state) = token(&mut rng);
        state.escrow_txid = Txid::from_inner([9u8; 32]);
        assert_eq!(
            token.check_state(&state),
            Err(Error::ChannelTokenMismatch("escrow transaction"))
        );
        let (_, other) = self::token(&mut rng);
        assert_eq!(
            token.check_state(&other),
            Err(Error::ChannelTokenMismatch("customer key"))
        );
    }

    #[test]
    fn channel_id_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(3);
        let (token1, _) = token(&mut rng);
        let (token2, _) = token(&mut rng);
        assert_eq!(token1.channel_id(), token1.channel_id());
        assert_ne!(token1.channel_id(), token2.channel_id());
    }
}
