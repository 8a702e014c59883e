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

//! Constructors of zkChannels transactions. Each constructor validates fees
//! and output values and returns a [`SignableTx`] pre-image; none of them
//! keeps any state.

use amplify::Wrapper;
use bitcoin::blockdata::script::Script;
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::{
    OutPoint, PackedLockTime, Sequence, Transaction, TxIn, TxOut, Witness,
};
use bitcoin_scripts::LockScript;

use crate::scripts::{p2wpkh, p2wpkh_script_code, revocation_output};
use crate::{
    ClosingTx, Error, RevLock, ScriptGenerators, SignableTx,
    TransactionFeeInfo, TxKind,
};

/// Version 2 is required for `OP_CHECKSEQUENCEVERIFY` relative timelocks
pub const TX_VERSION: i32 = 2;

/// Customer-owned UTXO funding the escrow transaction
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct FundingUtxo {
    pub outpoint: OutPoint,
    pub value: u64,
    /// Key controlling P2WPKH output being spent
    pub pubkey: PublicKey,
}

/// Public keys of both parties taking part in close transaction scripts
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ClosingKeys {
    /// Merchant escrow key
    pub merch_pk: PublicKey,
    /// Customer escrow key
    pub cust_pk: PublicKey,
    /// Merchant key receiving funds from merch-close and to-merchant outputs
    pub merch_payout_pk: PublicKey,
    /// Merchant key used in the revocation branch of to-customer output
    pub merch_dispute_pk: PublicKey,
    /// Customer key receiving funds from to-customer output
    pub cust_close_pk: PublicKey,
}

/// Channel balances distributed by customer-close transactions
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct CloseBalances {
    pub cust: u64,
    pub merch: u64,
}

impl CloseBalances {
    /// Converts signed channel balances into output values
    pub fn with(cust: i64, merch: i64) -> Result<CloseBalances, Error> {
        if cust < 0 {
            return Err(Error::NegativeValue(cust));
        }
        if merch < 0 {
            return Err(Error::NegativeValue(merch));
        }
        Ok(CloseBalances {
            cust: cust as u64,
            merch: merch as u64,
        })
    }

    #[inline]
    pub fn total(&self) -> u64 { self.cust + self.merch }
}

/// Output spent by a customer-close transaction
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "kebab-case")
)]
pub enum CloseSource {
    #[display("escrow")]
    Escrow,

    #[display("merch-close")]
    MerchClose,
}

impl CloseSource {
    #[inline]
    pub fn tx_kind(self) -> TxKind {
        match self {
            CloseSource::Escrow => TxKind::CustCloseFromEscrow,
            CloseSource::MerchClose => TxKind::CustCloseFromMerchClose,
        }
    }
}

/// Escrow transaction spending customer funding UTXO
#[derive(Getters, Clone, PartialEq, Eq, Debug)]
pub struct EscrowTx {
    signable: SignableTx,
    #[getter(as_copy)]
    escrow_value: u64,
    #[getter(as_copy)]
    funding_pubkey: PublicKey,
}

impl EscrowTx {
    /// Escrow output is always the first one
    #[inline]
    pub fn escrow_outpoint(&self) -> OutPoint {
        OutPoint::new(self.signable.txid(), 0)
    }

    /// Change returned to the customer, if any
    pub fn change(&self) -> Option<u64> {
        self.signable.tx().output.get(1).map(|txout| txout.value)
    }

    /// Signs the funding input with the key controlling the funding UTXO
    pub fn sign(self, funding_sk: &SecretKey) -> Result<ClosingTx, Error> {
        let signature = self.signable.sign(funding_sk)?;
        self.signable.verify(&signature, &self.funding_pubkey)?;
        Ok(self
            .signable
            .finalize_p2wpkh(&signature, &self.funding_pubkey))
    }
}

fn check_dust(kind: TxKind, value: u64, dust_limit: u64) -> Result<u64, Error> {
    if value < dust_limit {
        return Err(Error::OutputBelowDust {
            kind,
            value,
            dust_limit,
        });
    }
    Ok(value)
}

fn deduct(kind: TxKind, available: u64, deduction: u64) -> Result<u64, Error> {
    available
        .checked_sub(deduction)
        .ok_or(Error::InsufficientValue {
            kind,
            available,
            required: deduction,
        })
}

fn single_input_tx(
    previous_output: OutPoint,
    sequence: Sequence,
    output: Vec<TxOut>,
) -> Transaction {
    Transaction {
        version: TX_VERSION,
        lock_time: PackedLockTime(0),
        input: vec![TxIn {
            previous_output,
            script_sig: Script::new(),
            sequence,
            witness: Witness::default(),
        }],
        output,
    }
}

/// Forms escrow transaction locking `escrow_value` into the 2-of-2 output and
/// returning the remaining funds, minus `fee`, to the customer change key
pub fn escrow_tx(
    utxo: FundingUtxo,
    merch_pk: PublicKey,
    cust_pk: PublicKey,
    escrow_value: u64,
    change_pk: PublicKey,
    fee: u64,
    fees: &TransactionFeeInfo,
    dust_limit: u64,
) -> Result<EscrowTx, Error> {
    let kind = TxKind::Escrow;
    fees.check_fee(kind, fee)?;
    check_dust(kind, escrow_value, dust_limit)?;
    let change = deduct(kind, utxo.value, escrow_value + fee)?;

    let mut output = vec![TxOut::zk_escrow(escrow_value, merch_pk, cust_pk)];
    if change > 0 {
        check_dust(kind, change, dust_limit)?;
        output.push(TxOut {
            value: change,
            script_pubkey: p2wpkh(change_pk),
        });
    }

    let tx = single_input_tx(utxo.outpoint, Sequence::MAX, output);
    debug!(
        "formed escrow transaction {} locking {} sat",
        tx.txid(),
        escrow_value
    );
    Ok(EscrowTx {
        signable: SignableTx::with(
            kind,
            tx,
            p2wpkh_script_code(utxo.pubkey),
            utxo.value,
        ),
        escrow_value,
        funding_pubkey: utxo.pubkey,
    })
}

/// Forms merch-close transaction spending the escrow output
pub fn merch_close_tx(
    escrow: OutPoint,
    escrow_value: u64,
    keys: &ClosingKeys,
    to_self_delay: u16,
    fees: &TransactionFeeInfo,
    dust_limit: u64,
) -> Result<SignableTx, Error> {
    let kind = TxKind::MerchClose;
    fees.check_fee(kind, fees.fee_mc)?;
    let value = deduct(kind, escrow_value, fees.merch_close_deduction())?;
    check_dust(kind, value, dust_limit)?;

    let mut output = vec![TxOut::zk_merch_close(
        value,
        keys.merch_pk,
        keys.cust_pk,
        keys.merch_payout_pk,
        to_self_delay,
    )];
    if fees.val_cpfp > 0 {
        output.push(TxOut {
            value: fees.val_cpfp,
            script_pubkey: p2wpkh(keys.merch_payout_pk),
        });
    }

    let tx = single_input_tx(escrow, Sequence::MAX, output);
    let script_code = LockScript::zk_escrow(0, keys.merch_pk, keys.cust_pk);
    Ok(SignableTx::with(
        kind,
        tx,
        script_code.into_inner(),
        escrow_value,
    ))
}

/// Value of the merch-close output created from the escrow of a given value
pub fn merch_close_value(
    escrow_value: u64,
    fees: &TransactionFeeInfo,
) -> Result<u64, Error> {
    deduct(TxKind::MerchClose, escrow_value, fees.merch_close_deduction())
}

/// Forms customer-close transaction spending either escrow or merch-close
/// output. The transaction pays the merchant immediately, locks customer
/// funds under the revocation lock of the closed state and publishes the lock
/// in an `OP_RETURN` output.
pub fn cust_close_tx(
    source: CloseSource,
    prevout: OutPoint,
    balances: CloseBalances,
    rev_lock: RevLock,
    keys: &ClosingKeys,
    to_self_delay: u16,
    fees: &TransactionFeeInfo,
    dust_limit: u64,
) -> Result<SignableTx, Error> {
    let kind = source.tx_kind();
    fees.check_fee(kind, fees.fee_cc)?;

    let escrow_value = balances.total();
    let (input_value, to_merchant, script_code) = match source {
        CloseSource::Escrow => (
            escrow_value,
            balances.merch,
            LockScript::zk_escrow(0, keys.merch_pk, keys.cust_pk),
        ),
        CloseSource::MerchClose => (
            merch_close_value(escrow_value, fees)?,
            deduct(kind, balances.merch, fees.merch_close_deduction())?,
            LockScript::zk_merch_close(
                0,
                keys.merch_pk,
                keys.cust_pk,
                keys.merch_payout_pk,
                to_self_delay,
            ),
        ),
    };
    let to_customer = deduct(kind, balances.cust, fees.cust_close_deduction())?;
    check_dust(kind, to_customer, dust_limit)?;
    check_dust(kind, to_merchant, dust_limit)?;

    let mut output = vec![
        TxOut::zk_to_customer(
            to_customer,
            rev_lock,
            keys.merch_dispute_pk,
            keys.cust_close_pk,
            to_self_delay,
        ),
        TxOut::zk_to_merchant(to_merchant, keys.merch_payout_pk),
        revocation_output(rev_lock, keys.cust_close_pk),
    ];
    if fees.val_cpfp > 0 {
        output.push(TxOut {
            value: fees.val_cpfp,
            script_pubkey: p2wpkh(keys.cust_close_pk),
        });
    }

    let tx = single_input_tx(prevout, Sequence::MAX, output);
    Ok(SignableTx::with(
        kind,
        tx,
        script_code.into_inner(),
        input_value,
    ))
}

fn claim_output(
    kind: TxKind,
    value: u64,
    output_pk: PublicKey,
    fee: u64,
    fees: &TransactionFeeInfo,
    dust_limit: u64,
) -> Result<TxOut, Error> {
    fees.check_fee(kind, fee)?;
    let value = check_dust(kind, deduct(kind, value, fee)?, dust_limit)?;
    Ok(TxOut {
        value,
        script_pubkey: p2wpkh(output_pk),
    })
}

/// Forms customer claim of the to-customer output after the self-delay
/// timelock matures. `close_output` must be the first output of a
/// customer-close transaction holding `value` sats.
pub fn cust_claim_tx(
    close_output: OutPoint,
    value: u64,
    rev_lock: RevLock,
    keys: &ClosingKeys,
    to_self_delay: u16,
    output_pk: PublicKey,
    fee: u64,
    fees: &TransactionFeeInfo,
    dust_limit: u64,
) -> Result<SignableTx, Error> {
    let kind = TxKind::CustClaim;
    let output = claim_output(kind, value, output_pk, fee, fees, dust_limit)?;
    let tx = single_input_tx(
        close_output,
        Sequence::from_height(to_self_delay),
        vec![output],
    );
    let script_code = LockScript::zk_to_customer(
        value,
        rev_lock,
        keys.merch_dispute_pk,
        keys.cust_close_pk,
        to_self_delay,
    );
    Ok(SignableTx::with(kind, tx, script_code.into_inner(), value))
}

/// Forms merchant claim of the merch-close output after the self-delay
/// timelock matures
pub fn merch_claim_tx(
    merch_close_output: OutPoint,
    value: u64,
    keys: &ClosingKeys,
    to_self_delay: u16,
    output_pk: PublicKey,
    fee: u64,
    fees: &TransactionFeeInfo,
    dust_limit: u64,
) -> Result<SignableTx, Error> {
    let kind = TxKind::MerchClaim;
    let output = claim_output(kind, value, output_pk, fee, fees, dust_limit)?;
    let tx = single_input_tx(
        merch_close_output,
        Sequence::from_height(to_self_delay),
        vec![output],
    );
    let script_code = LockScript::zk_merch_close(
        value,
        keys.merch_pk,
        keys.cust_pk,
        keys.merch_payout_pk,
        to_self_delay,
    );
    Ok(SignableTx::with(kind, tx, script_code.into_inner(), value))
}

/// Forms merchant claim of the immediately spendable to-merchant output of
/// a customer-close transaction
pub fn merch_claim_to_merchant_tx(
    to_merchant_output: OutPoint,
    value: u64,
    merch_payout_pk: PublicKey,
    output_pk: PublicKey,
    fee: u64,
    fees: &TransactionFeeInfo,
    dust_limit: u64,
) -> Result<SignableTx, Error> {
    let kind = TxKind::MerchClaimToMerchant;
    let output = claim_output(kind, value, output_pk, fee, fees, dust_limit)?;
    let tx = single_input_tx(to_merchant_output, Sequence::MAX, vec![output]);
    Ok(SignableTx::with(
        kind,
        tx,
        p2wpkh_script_code(merch_payout_pk),
        value,
    ))
}

/// Forms dispute transaction spending the revocation branch of the
/// to-customer output before its timelock matures
pub fn dispute_tx(
    close_output: OutPoint,
    value: u64,
    rev_lock: RevLock,
    keys: &ClosingKeys,
    to_self_delay: u16,
    output_pk: PublicKey,
    fee: u64,
    fees: &TransactionFeeInfo,
    dust_limit: u64,
) -> Result<SignableTx, Error> {
    let kind = TxKind::Dispute;
    let output = claim_output(kind, value, output_pk, fee, fees, dust_limit)?;
    let tx = single_input_tx(close_output, Sequence::MAX, vec![output]);
    let script_code = LockScript::zk_to_customer(
        value,
        rev_lock,
        keys.merch_dispute_pk,
        keys.cust_close_pk,
        to_self_delay,
    );
    Ok(SignableTx::with(kind, tx, script_code.into_inner(), value))
}
