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

//! Output scripts used by zkChannels transactions.
//!
//! Script templates follow the same pattern for every output: the raw
//! [`LockScript`] is wrapped into [`WitnessScript`] (used in sighash and
//! witness construction), committed into a P2WSH [`PubkeyScript`] and then
//! into a [`TxOut`] carrying the output amount.

use amplify::{Slice32, Wrapper};
use bitcoin::blockdata::opcodes::all::*;
use bitcoin::blockdata::script::{self, Instruction, Script};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Transaction, TxOut, WPubkeyHash};
use bitcoin_scripts::{LockScript, PubkeyScript, WitnessScript};

use crate::Error;

/// Length of the data pushed into the customer-close `OP_RETURN` output:
/// revocation lock followed by the compressed customer close key.
pub const REVOCATION_OUTPUT_DATA_LEN: usize = 32 + 33;

/// Revocation lock: SHA256 hash of the revocation secret. Each customer-close
/// transaction publishes the lock of the state it closes, so the merchant
/// knowing the preimage for a stale state may take the customer funds.
#[derive(
    Wrapper,
    Copy,
    Clone,
    Ord,
    PartialOrd,
    Eq,
    PartialEq,
    Hash,
    Debug,
    Display,
    Default,
    From
)]
#[display(LowerHex)]
#[wrapper(FromStr, LowerHex, UpperHex)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct RevLock(Slice32);

impl RevLock {
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> RevLock {
        RevLock::from_inner(Slice32::from_inner(bytes))
    }

    #[inline]
    pub fn to_bytes(&self) -> [u8; 32] { self.to_inner().to_inner() }
}

pub trait ScriptGenerators {
    fn zk_escrow(amount: u64, merch_pk: PublicKey, cust_pk: PublicKey) -> Self;

    fn zk_merch_close(
        amount: u64,
        merch_pk: PublicKey,
        cust_pk: PublicKey,
        merch_close_pk: PublicKey,
        to_self_delay: u16,
    ) -> Self;

    fn zk_to_customer(
        amount: u64,
        rev_lock: RevLock,
        merch_dispute_pk: PublicKey,
        cust_close_pk: PublicKey,
        to_self_delay: u16,
    ) -> Self;

    /// For the script types this generates BIP-143 P2WPKH script code
    fn zk_to_merchant(amount: u64, merch_payout_pk: PublicKey) -> Self;
}

impl ScriptGenerators for LockScript {
    fn zk_escrow(_: u64, merch_pk: PublicKey, cust_pk: PublicKey) -> Self {
        // Key order is fixed by the protocol: merchant first
        script::Builder::new()
            .push_int(2)
            .push_key(&bitcoin::PublicKey::new(merch_pk))
            .push_key(&bitcoin::PublicKey::new(cust_pk))
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script()
            .into()
    }

    fn zk_merch_close(
        _: u64,
        merch_pk: PublicKey,
        cust_pk: PublicKey,
        merch_close_pk: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        script::Builder::new()
            .push_opcode(OP_IF)
            .push_int(2)
            .push_key(&bitcoin::PublicKey::new(merch_pk))
            .push_key(&bitcoin::PublicKey::new(cust_pk))
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .push_opcode(OP_ELSE)
            .push_int(to_self_delay as i64)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_key(&bitcoin::PublicKey::new(merch_close_pk))
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ENDIF)
            .into_script()
            .into()
    }

    fn zk_to_customer(
        _: u64,
        rev_lock: RevLock,
        merch_dispute_pk: PublicKey,
        cust_close_pk: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        script::Builder::new()
            .push_opcode(OP_IF)
            .push_opcode(OP_SHA256)
            .push_slice(&rev_lock.to_bytes())
            .push_opcode(OP_EQUALVERIFY)
            .push_key(&bitcoin::PublicKey::new(merch_dispute_pk))
            .push_opcode(OP_ELSE)
            .push_int(to_self_delay as i64)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_key(&bitcoin::PublicKey::new(cust_close_pk))
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_CHECKSIG)
            .into_script()
            .into()
    }

    fn zk_to_merchant(_: u64, merch_payout_pk: PublicKey) -> Self {
        let pk = bitcoin::PublicKey::new(merch_payout_pk);
        Script::new_p2pkh(&pk.pubkey_hash()).into()
    }
}

impl ScriptGenerators for WitnessScript {
    #[inline]
    fn zk_escrow(amount: u64, merch_pk: PublicKey, cust_pk: PublicKey) -> Self {
        LockScript::zk_escrow(amount, merch_pk, cust_pk).into()
    }

    #[inline]
    fn zk_merch_close(
        amount: u64,
        merch_pk: PublicKey,
        cust_pk: PublicKey,
        merch_close_pk: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        LockScript::zk_merch_close(
            amount,
            merch_pk,
            cust_pk,
            merch_close_pk,
            to_self_delay,
        )
        .into()
    }

    #[inline]
    fn zk_to_customer(
        amount: u64,
        rev_lock: RevLock,
        merch_dispute_pk: PublicKey,
        cust_close_pk: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        LockScript::zk_to_customer(
            amount,
            rev_lock,
            merch_dispute_pk,
            cust_close_pk,
            to_self_delay,
        )
        .into()
    }

    #[inline]
    fn zk_to_merchant(amount: u64, merch_payout_pk: PublicKey) -> Self {
        LockScript::zk_to_merchant(amount, merch_payout_pk).into()
    }
}

impl ScriptGenerators for PubkeyScript {
    #[inline]
    fn zk_escrow(amount: u64, merch_pk: PublicKey, cust_pk: PublicKey) -> Self {
        WitnessScript::zk_escrow(amount, merch_pk, cust_pk).to_p2wsh()
    }

    #[inline]
    fn zk_merch_close(
        amount: u64,
        merch_pk: PublicKey,
        cust_pk: PublicKey,
        merch_close_pk: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        WitnessScript::zk_merch_close(
            amount,
            merch_pk,
            cust_pk,
            merch_close_pk,
            to_self_delay,
        )
        .to_p2wsh()
    }

    #[inline]
    fn zk_to_customer(
        amount: u64,
        rev_lock: RevLock,
        merch_dispute_pk: PublicKey,
        cust_close_pk: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        WitnessScript::zk_to_customer(
            amount,
            rev_lock,
            merch_dispute_pk,
            cust_close_pk,
            to_self_delay,
        )
        .to_p2wsh()
    }

    #[inline]
    fn zk_to_merchant(_: u64, merch_payout_pk: PublicKey) -> Self {
        p2wpkh(merch_payout_pk).into()
    }
}

impl ScriptGenerators for TxOut {
    #[inline]
    fn zk_escrow(amount: u64, merch_pk: PublicKey, cust_pk: PublicKey) -> Self {
        TxOut {
            value: amount,
            script_pubkey: PubkeyScript::zk_escrow(amount, merch_pk, cust_pk)
                .into(),
        }
    }

    #[inline]
    fn zk_merch_close(
        amount: u64,
        merch_pk: PublicKey,
        cust_pk: PublicKey,
        merch_close_pk: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        TxOut {
            value: amount,
            script_pubkey: PubkeyScript::zk_merch_close(
                amount,
                merch_pk,
                cust_pk,
                merch_close_pk,
                to_self_delay,
            )
            .into(),
        }
    }

    #[inline]
    fn zk_to_customer(
        amount: u64,
        rev_lock: RevLock,
        merch_dispute_pk: PublicKey,
        cust_close_pk: PublicKey,
        to_self_delay: u16,
    ) -> Self {
        TxOut {
            value: amount,
            script_pubkey: PubkeyScript::zk_to_customer(
                amount,
                rev_lock,
                merch_dispute_pk,
                cust_close_pk,
                to_self_delay,
            )
            .into(),
        }
    }

    #[inline]
    fn zk_to_merchant(amount: u64, merch_payout_pk: PublicKey) -> Self {
        TxOut {
            value: amount,
            script_pubkey: PubkeyScript::zk_to_merchant(
                amount,
                merch_payout_pk,
            )
            .into(),
        }
    }
}

/// Native segwit v0 pay-to-pubkey-hash script
pub fn p2wpkh(pubkey: PublicKey) -> Script {
    Script::new_v0_p2wpkh(&WPubkeyHash::hash(&pubkey.serialize()))
}

/// BIP-143 script code for spending P2WPKH outputs
pub fn p2wpkh_script_code(pubkey: PublicKey) -> Script {
    LockScript::zk_to_merchant(0, pubkey).into_inner()
}

/// Zero-value `OP_RETURN` output of customer-close transactions publishing
/// the revocation lock and the customer close key
pub fn revocation_output(rev_lock: RevLock, cust_close_pk: PublicKey) -> TxOut {
    let mut data = Vec::with_capacity(REVOCATION_OUTPUT_DATA_LEN);
    data.extend_from_slice(&rev_lock.to_bytes());
    data.extend_from_slice(&cust_close_pk.serialize());
    TxOut {
        value: 0,
        script_pubkey: Script::new_op_return(&data),
    }
}

/// Extracts revocation lock and customer close key from the `OP_RETURN`
/// output of a customer-close transaction observed on-chain
pub fn parse_revocation_output(
    tx: &Transaction,
) -> Result<(RevLock, PublicKey), Error> {
    let output = tx
        .output
        .iter()
        .find(|txout| txout.script_pubkey.is_op_return())
        .ok_or(Error::NoRevocationOutput)?;
    let mut instructions = output.script_pubkey.instructions();
    // skipping OP_RETURN itself
    instructions.next();
    let data = match instructions.next() {
        Some(Ok(Instruction::PushBytes(data)))
            if data.len() == REVOCATION_OUTPUT_DATA_LEN =>
        {
            data
        }
        _ => return Err(Error::MalformedRevocationOutput),
    };
    let mut lock = [0u8; 32];
    lock.copy_from_slice(&data[..32]);
    let pubkey = PublicKey::from_slice(&data[32..])
        .map_err(|_| Error::MalformedRevocationOutput)?;
    Ok((RevLock::from_bytes(lock), pubkey))
}
