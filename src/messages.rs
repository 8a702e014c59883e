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

//! Messages exchanged between the customer and the merchant. Transport and
//! encoding of the messages are out of scope of the library; with `serde`
//! feature all of them may be serialized with any serde format.

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::Txid;
use secp256k1::ecdsa::Signature;
use secp256k1::PublicKey;
use tx::RevLock;

use crate::masking::{PayMaskCom, PayMaskRandomness, PayTokenMask, TxMasks};
use crate::revocation::RevLockCom;
use crate::state::{Nonce, SessionId, State, StateHash};
use crate::token::{ChannelToken, FundingTxInfo};

/// Customer request for the merchant signature on the merch-close
/// transaction, which opens the channel on the merchant side
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct MerchCloseRequest {
    pub token: ChannelToken,
    pub funding: FundingTxInfo,
    /// Customer signature on the merch-close transaction
    pub cust_sig: Signature,
}

/// Initial (zero-payment) customer state announced to the merchant
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct InitCustState {
    pub escrow_txid: Txid,
    pub pk_c: PublicKey,
    pub cust_close_pk: PublicKey,
    pub bc: i64,
    pub bm: i64,
    pub nonce: Nonce,
    pub rev_lock: RevLock,
}

impl InitCustState {
    pub fn hash(&self) -> StateHash {
        let mut engine = sha256::Hash::engine();
        engine.input(&self.escrow_txid.into_inner());
        engine.input(&self.pk_c.serialize());
        engine.input(&self.cust_close_pk.serialize());
        engine.input(&self.bc.to_be_bytes());
        engine.input(&self.bm.to_be_bytes());
        engine.input(&self.nonce.to_bytes());
        engine.input(&self.rev_lock.to_bytes());
        StateHash::from_bytes(sha256::Hash::from_engine(engine).into_inner())
    }

    /// Channel state described by the initial customer state
    pub fn state(&self, token: &ChannelToken) -> State {
        State {
            nonce: self.nonce,
            rev_lock: self.rev_lock,
            pk_c: self.pk_c,
            pk_m: token.pk_m(),
            bc: self.bc,
            bm: self.bm,
            escrow_txid: token.escrow_txid(),
            merch_txid: token.merch_txid(),
            escrow_prevout: token.escrow_prevout(),
            merch_prevout: token.merch_prevout(),
        }
    }
}

/// Merchant signatures on both variants of the customer-close transaction
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct CloseSignatures {
    /// Signature on the customer-close spending the escrow output
    pub escrow_sig: Signature,
    /// Signature on the customer-close spending the merch-close output
    pub merch_sig: Signature,
}

/// First message of a payment round
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct PaymentRequest {
    pub session_id: SessionId,
    /// Nonce of the current state, which is going to be revoked
    pub nonce: Nonce,
    pub rev_lock_com: RevLockCom,
    pub amount: i64,
    /// Reason for a negative payment (refund)
    pub justification: Option<String>,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct PaymentResponse {
    pub session_id: SessionId,
    pub pay_mask_com: PayMaskCom,
}

/// Transaction masks released by the merchant after the masking
/// computation succeeded
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct MaskedTxInputs {
    pub session_id: SessionId,
    pub masks: TxMasks,
}

/// Opening of the pay token mask commitment, released by the merchant in
/// exchange for a valid revocation of the previous state
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct PayTokenMaskOpening {
    pub pt_mask: PayTokenMask,
    pub r: PayMaskRandomness,
}

impl PayTokenMaskOpening {
    #[inline]
    pub fn opens(&self, commitment: PayMaskCom) -> bool {
        PayMaskCom::with(self.pt_mask, self.r) == commitment
    }
}
