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

use bitcoin::blockdata::script::Script;
use bitcoin::consensus::serialize;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use bitcoin::util::sighash::SighashCache;
use bitcoin::{EcdsaSighashType, Transaction, Txid, Witness};

use crate::{Error, TxKind, TxidBytes};

/// Unsigned single-input transaction together with the data required for
/// computing its BIP-143 signature hash
#[derive(Getters, Clone, PartialEq, Eq, Debug)]
pub struct SignableTx {
    #[getter(as_copy)]
    kind: TxKind,

    tx: Transaction,

    /// BIP-143 script code of the spent output: witness script for P2WSH
    /// outputs and P2PKH-style script for P2WPKH outputs
    script_code: Script,

    #[getter(as_copy)]
    input_value: u64,
}

impl SignableTx {
    pub(crate) fn with(
        kind: TxKind,
        tx: Transaction,
        script_code: Script,
        input_value: u64,
    ) -> SignableTx {
        SignableTx {
            kind,
            tx,
            script_code,
            input_value,
        }
    }

    #[inline]
    pub fn txid(&self) -> Txid { self.tx.txid() }

    /// Sum of all output values
    #[inline]
    pub fn output_value(&self) -> u64 {
        self.tx.output.iter().map(|txout| txout.value).sum()
    }

    pub fn sighash(&self) -> Result<Message, Error> {
        let mut cache = SighashCache::new(&self.tx);
        let sighash = cache
            .segwit_signature_hash(
                0,
                &self.script_code,
                self.input_value,
                EcdsaSighashType::All,
            )
            .map_err(|_| Error::Sighash(0))?;
        Ok(Message::from_slice(&sighash[..])?)
    }

    pub fn sign(&self, secret_key: &SecretKey) -> Result<Signature, Error> {
        let msg = self.sighash()?;
        trace!("signing {} transaction {}", self.kind, self.txid());
        Ok(SECP256K1.sign_ecdsa(&msg, secret_key))
    }

    pub fn verify(
        &self,
        signature: &Signature,
        pubkey: &PublicKey,
    ) -> Result<(), Error> {
        let msg = self.sighash()?;
        SECP256K1
            .verify_ecdsa(&msg, signature, pubkey)
            .map_err(|_| Error::InvalidSignature(self.kind))
    }

    /// Finalizes spending of a P2WPKH output
    pub fn finalize_p2wpkh(
        self,
        signature: &Signature,
        pubkey: &PublicKey,
    ) -> ClosingTx {
        let witness =
            vec![sig_with_sighash(signature), pubkey.serialize().to_vec()];
        self.finalize(witness)
    }

    /// Finalizes spending of the 2-of-2 branch of the escrow or merch-close
    /// output. The branch selector is added for merch-close outputs.
    pub fn finalize_multisig(
        self,
        merch_sig: &Signature,
        cust_sig: &Signature,
    ) -> ClosingTx {
        let mut witness = vec![
            vec![],
            sig_with_sighash(merch_sig),
            sig_with_sighash(cust_sig),
        ];
        if self.kind == TxKind::CustCloseFromMerchClose {
            witness.push(vec![0x01]);
        }
        witness.push(self.script_code.to_bytes());
        self.finalize(witness)
    }

    /// Finalizes spending of the timelocked branch of a merch-close or
    /// to-customer output
    pub fn finalize_delayed(self, signature: &Signature) -> ClosingTx {
        let witness = vec![
            sig_with_sighash(signature),
            vec![],
            self.script_code.to_bytes(),
        ];
        self.finalize(witness)
    }

    /// Finalizes spending of the revocation branch of the to-customer output
    pub fn finalize_dispute(
        self,
        signature: &Signature,
        rev_secret: [u8; 32],
    ) -> ClosingTx {
        let witness = vec![
            sig_with_sighash(signature),
            rev_secret.to_vec(),
            vec![0x01],
            self.script_code.to_bytes(),
        ];
        self.finalize(witness)
    }

    fn finalize(mut self, witness: Vec<Vec<u8>>) -> ClosingTx {
        self.tx.input[0].witness = Witness::from_vec(witness);
        ClosingTx::with(self.kind, self.tx)
    }
}

/// Fully signed transaction ready for broadcast
#[derive(Getters, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ClosingTx {
    #[getter(as_copy)]
    kind: TxKind,

    tx: Transaction,

    #[getter(as_copy)]
    txid: Txid,
}

impl ClosingTx {
    pub fn with(kind: TxKind, tx: Transaction) -> ClosingTx {
        let txid = tx.txid();
        debug!("{} transaction {} is finalized", kind, txid);
        ClosingTx { kind, tx, txid }
    }

    #[inline]
    pub fn txid_le(&self) -> [u8; 32] { self.txid.to_le_bytes() }

    #[inline]
    pub fn txid_be(&self) -> [u8; 32] { self.txid.to_be_bytes() }

    /// Consensus-serialized transaction
    #[inline]
    pub fn serialize(&self) -> Vec<u8> { serialize(&self.tx) }

    #[inline]
    pub fn into_tx(self) -> Transaction { self.tx }
}

fn sig_with_sighash(signature: &Signature) -> Vec<u8> {
    let mut data = signature.serialize_der().to_vec();
    data.push(EcdsaSighashType::All as u8);
    data
}
