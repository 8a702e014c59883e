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

//! Merchant side of the protocol. A single merchant state serves many
//! channels and payment sessions; it does not learn which channel a payment
//! belongs to.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitcoin::{OutPoint, Transaction, TxOut, Txid};
use rand::{CryptoRng, RngCore};
use secp256k1::ecdsa::Signature;
use secp256k1::{PublicKey, SecretKey};
use tx::scripts::parse_revocation_output;
use tx::transactions::{dispute_tx, merch_claim_to_merchant_tx, merch_claim_tx};
use tx::{ClosingTx, CloseSource, ScriptGenerators, TxKind};

use crate::ledger::RevocationLedger;
use crate::masking::{PayMaskCom, PayMaskRandomness, PayTokenMask, TxMasks};
use crate::messages::{
    CloseSignatures, InitCustState, MaskedTxInputs, MerchCloseRequest,
    PayTokenMaskOpening, PaymentRequest, PaymentResponse,
};
use crate::params::{ChannelParams, NegativePaymentPolicy};
use crate::revocation::{RevLockCom, RevSecret, RevokedState};
use crate::service::{MerchantMaskingInput, ServiceError};
use crate::state::{
    ChannelStatus, HmacKey, Nonce, PayToken, PaymentStatus, SessionId, State,
    StateHash,
};
use crate::token::{ChannelToken, FundingTxInfo, MerchantPublicKeys};
use crate::{keypair, Error, RevLock};

#[derive(Clone, PartialEq, Eq, Debug)]
struct MerchantChannel {
    token: ChannelToken,
    funding: FundingTxInfo,
    /// Fully signed merch-close transaction
    merch_close: ClosingTx,
    init: Option<InitCustState>,
    status: ChannelStatus,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct Session {
    nonce: Nonce,
    rev_lock_com: RevLockCom,
    amount: i64,
    tx_masks: TxMasks,
    pt_mask: PayTokenMask,
    pt_mask_r: PayMaskRandomness,
    status: PaymentStatus,
}

/// Record of a nonce which can't be used in any further payment
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct SpentNonce {
    session_id: SessionId,
    /// Revocation revealed for the nonce; `None` if it was invalid
    revocation: Option<(RevLock, RevSecret)>,
    opening: PayTokenMaskOpening,
}

/// Merchant state machine
#[derive(Getters, Debug)]
pub struct MerchantState {
    params: ChannelParams,

    #[getter(as_copy)]
    policy: NegativePaymentPolicy,

    #[getter(skip)]
    sk_m: SecretKey,

    #[getter(skip)]
    payout_sk: SecretKey,

    #[getter(skip)]
    dispute_sk: SecretKey,

    #[getter(as_copy)]
    keys: MerchantPublicKeys,

    #[getter(skip)]
    hmac_key: HmacKey,

    #[getter(skip)]
    channels: BTreeMap<Txid, MerchantChannel>,

    /// Sessions which are not yet revoked or failed
    #[getter(skip)]
    sessions: BTreeMap<SessionId, Session>,

    /// Nonces of the live sessions
    #[getter(skip)]
    live_nonces: BTreeMap<Nonce, SessionId>,

    #[getter(skip)]
    spent_nonces: BTreeMap<Nonce, SpentNonce>,

    #[getter(skip)]
    ledger: Arc<dyn RevocationLedger>,
}

impl MerchantState {
    pub fn init<R: RngCore + CryptoRng>(
        rng: &mut R,
        params: ChannelParams,
        policy: NegativePaymentPolicy,
        ledger: Arc<dyn RevocationLedger>,
    ) -> Result<MerchantState, Error> {
        params.validate()?;
        let (sk_m, pk_m) = keypair(rng)?;
        let (payout_sk, payout_pk) = keypair(rng)?;
        let (dispute_sk, dispute_pk) = keypair(rng)?;
        info!("merchant initialized with escrow key {}", pk_m);
        Ok(MerchantState {
            params,
            policy,
            sk_m,
            payout_sk,
            dispute_sk,
            keys: MerchantPublicKeys {
                pk_m,
                payout_pk,
                dispute_pk,
            },
            hmac_key: HmacKey::random(rng),
            channels: empty!(),
            sessions: empty!(),
            live_nonces: empty!(),
            spent_nonces: empty!(),
            ledger,
        })
    }

    fn channel(&self, escrow_txid: Txid) -> Result<&MerchantChannel, Error> {
        self.channels
            .get(&escrow_txid)
            .ok_or(Error::UnknownChannel(escrow_txid))
    }

    fn channel_mut(
        &mut self,
        escrow_txid: Txid,
    ) -> Result<&mut MerchantChannel, Error> {
        self.channels
            .get_mut(&escrow_txid)
            .ok_or(Error::UnknownChannel(escrow_txid))
    }

    fn session_mut(
        &mut self,
        session_id: SessionId,
    ) -> Result<&mut Session, Error> {
        self.sessions
            .get_mut(&session_id)
            .ok_or(Error::UnknownSession(session_id))
    }

    fn close_session(&mut self, session_id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&session_id)?;
        self.live_nonces.remove(&session.nonce);
        Some(session)
    }

    /// Finds the channel whose escrow or merch-close output is spent by the
    /// transaction
    fn channel_spent_by(&self, tx: &Transaction) -> Result<Txid, Error> {
        let prevout = tx
            .input
            .first()
            .ok_or(Error::UnrecognizedCloseTx)?
            .previous_output;
        self.channels
            .iter()
            .find(|(_, channel)| {
                channel.token.escrow_outpoint() == prevout
                    || channel.token.merch_outpoint() == prevout
            })
            .map(|(escrow_txid, _)| *escrow_txid)
            .ok_or(Error::UnknownChannel(prevout.txid))
    }

    /// Verifies customer signature on the merch-close transaction and
    /// countersigns it, registering a new channel
    pub fn verify_merch_close(
        &mut self,
        request: &MerchCloseRequest,
    ) -> Result<ClosingTx, Error> {
        let MerchCloseRequest {
            token,
            funding,
            cust_sig,
        } = *request;
        token.check_merchant(&self.keys)?;
        if ChannelToken::with(token.pk_c(), &self.keys, &funding) != token {
            return Err(Error::ChannelTokenMismatch("funding transactions"));
        }
        let fees = &self.params.fees;
        if funding.fee_mc != fees.fee_mc
            || funding.min_fee != fees.min_fee
            || funding.max_fee != fees.max_fee
        {
            return Err(Error::ChannelTokenMismatch("fee parameters"));
        }
        let min_cust = fees.bal_min_cust as i64;
        if funding.init_cust_bal < min_cust {
            return Err(Error::InvalidBalance {
                balance: funding.init_cust_bal,
                minimum: min_cust,
            });
        }
        let min_merch = self.params.min_merch_funding() as i64;
        if funding.init_merch_bal < min_merch {
            return Err(Error::InvalidBalance {
                balance: funding.init_merch_bal,
                minimum: min_merch,
            });
        }
        if let Some(channel) = self.channels.get(&token.escrow_txid()) {
            if channel.status != ChannelStatus::None {
                return Err(Error::ChannelStatusMismatch {
                    current: channel.status,
                    required: ChannelStatus::None,
                });
            }
        }

        let merch_close =
            token.merch_close_tx(funding.escrow_value()?, &self.params)?;
        if merch_close.txid() != token.merch_txid() {
            return Err(Error::ChannelTokenMismatch("merch-close transaction"));
        }
        merch_close
            .verify(&cust_sig, &token.pk_c())
            .map_err(|_| Error::SignatureVerification(TxKind::MerchClose))?;
        let merch_sig = merch_close.sign(&self.sk_m)?;
        let merch_close = merch_close.finalize_multisig(&merch_sig, &cust_sig);

        self.channels.insert(token.escrow_txid(), MerchantChannel {
            token,
            funding,
            merch_close: merch_close.clone(),
            init: None,
            status: ChannelStatus::None,
        });
        info!(
            "merchant accepted channel {} with escrow {}",
            token.channel_id(),
            token.escrow_txid()
        );
        Ok(merch_close)
    }

    /// Signs the customer-close transactions for the initial channel state
    pub fn sign_initial_closing_txs(
        &mut self,
        init: &InitCustState,
    ) -> Result<CloseSignatures, Error> {
        let channel = self
            .channels
            .get_mut(&init.escrow_txid)
            .ok_or(Error::UnknownChannel(init.escrow_txid))?;
        if channel.status != ChannelStatus::None {
            return Err(Error::ChannelStatusMismatch {
                current: channel.status,
                required: ChannelStatus::None,
            });
        }
        if init.pk_c != channel.token.pk_c() {
            return Err(Error::ChannelTokenMismatch("customer key"));
        }
        if init.bc != channel.funding.init_cust_bal
            || init.bm != channel.funding.init_merch_bal
        {
            return Err(Error::InitialStateMismatch);
        }

        let state = init.state(&channel.token);
        let sign = |source| {
            sign_cust_close(
                &channel.token,
                source,
                &state,
                init.cust_close_pk,
                &self.params,
                &self.sk_m,
            )
        };
        let sigs = CloseSignatures {
            escrow_sig: sign(CloseSource::Escrow)?,
            merch_sig: sign(CloseSource::MerchClose)?,
        };
        channel.init = Some(*init);
        Ok(sigs)
    }

    /// Validates initial customer state against its hash. The channel is
    /// considered funded only after a successful validation.
    pub fn validate_initial_state(
        &mut self,
        init: &InitCustState,
        hash: StateHash,
    ) -> Result<(), Error> {
        let channel = self.channel_mut(init.escrow_txid)?;
        if channel.status != ChannelStatus::None {
            return Err(Error::ChannelStatusMismatch {
                current: channel.status,
                required: ChannelStatus::None,
            });
        }
        if channel.init != Some(*init) || init.hash() != hash {
            warn!(
                "initial state for channel {} does not match",
                init.escrow_txid
            );
            return Err(Error::InitialStateMismatch);
        }
        channel.status = ChannelStatus::PendingOpen;
        debug!("initial state of channel {} is validated", init.escrow_txid);
        Ok(())
    }

    /// Registers confirmation of the escrow transaction
    pub fn mark_open(&mut self, escrow_txid: Txid) -> Result<(), Error> {
        let channel = self.channel_mut(escrow_txid)?;
        if channel.status != ChannelStatus::PendingOpen {
            return Err(Error::ChannelStatusMismatch {
                current: channel.status,
                required: ChannelStatus::PendingOpen,
            });
        }
        channel.status = ChannelStatus::Open;
        info!("merchant channel {} is open", escrow_txid);
        Ok(())
    }

    /// Issues the first pay token for the initial state of an open channel
    pub fn activate(
        &self,
        escrow_txid: Txid,
        state: &State,
    ) -> Result<PayToken, Error> {
        let channel = self.channel(escrow_txid)?;
        if channel.status != ChannelStatus::Open {
            return Err(Error::ChannelStatusMismatch {
                current: channel.status,
                required: ChannelStatus::Open,
            });
        }
        channel.token.check_state(state)?;
        match channel.init {
            Some(init) if init.state(&channel.token) == *state => {}
            _ => return Err(Error::InitialStateMismatch),
        }
        if self.spent_nonces.contains_key(&state.nonce) {
            return Err(Error::NonceReused(state.nonce));
        }
        debug!("merchant activates channel {}", escrow_txid);
        Ok(PayToken::compute(&self.hmac_key, state))
    }

    /// Opens a payment session and commits to the pay token mask for it
    pub fn prepare_payment<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        request: &PaymentRequest,
    ) -> Result<PaymentResponse, Error> {
        let nonce = request.nonce;
        if self.spent_nonces.contains_key(&nonce)
            || self.live_nonces.contains_key(&nonce)
        {
            warn!("payment request reuses nonce {}", nonce);
            return Err(Error::NonceReused(nonce));
        }
        if self.sessions.contains_key(&request.session_id) {
            return Err(Error::RoundInProgress);
        }
        if request.amount < 0 {
            let justified = request
                .justification
                .as_deref()
                .map(|reason| !reason.trim().is_empty())
                .unwrap_or(false);
            if self.policy == NegativePaymentPolicy::Reject || !justified {
                return Err(Error::NegativePaymentRejected(request.amount));
            }
        }

        let pt_mask = PayTokenMask::random(rng);
        let pt_mask_r = PayMaskRandomness::random(rng);
        self.sessions.insert(request.session_id, Session {
            nonce,
            rev_lock_com: request.rev_lock_com,
            amount: request.amount,
            tx_masks: TxMasks::random(rng),
            pt_mask,
            pt_mask_r,
            status: PaymentStatus::Prepare,
        });
        self.live_nonces.insert(nonce, request.session_id);
        debug!(
            "merchant opened payment session {} for {} sat",
            request.session_id, request.amount
        );
        Ok(PaymentResponse {
            session_id: request.session_id,
            pay_mask_com: PayMaskCom::with(pt_mask, pt_mask_r),
        })
    }

    /// Merchant input to the payment token service
    pub fn masking_input(
        &mut self,
        session_id: SessionId,
    ) -> Result<MerchantMaskingInput, Error> {
        let keys = self.keys;
        let sk_m = self.sk_m;
        let hmac_key = self.hmac_key;
        let params = self.params.clone();
        let session = self.session_mut(session_id)?;
        if session.status != PaymentStatus::Prepare {
            return Err(Error::SessionStatusMismatch {
                current: session.status,
                required: PaymentStatus::Prepare,
            });
        }
        session.status = PaymentStatus::Update;
        Ok(MerchantMaskingInput {
            session_id,
            nonce: session.nonce,
            rev_lock_com: session.rev_lock_com,
            amount: session.amount,
            keys,
            sk_m,
            hmac_key,
            tx_masks: session.tx_masks,
            pt_mask: session.pt_mask,
            pt_mask_r: session.pt_mask_r,
            params,
        })
    }

    /// Processes the confirmation flag returned by the payment token service
    /// and releases the transaction masks on success
    pub fn confirm_masking(
        &mut self,
        session_id: SessionId,
        confirmed: bool,
    ) -> Result<MaskedTxInputs, Error> {
        let session = self.session_mut(session_id)?;
        if session.status != PaymentStatus::Update {
            return Err(Error::SessionStatusMismatch {
                current: session.status,
                required: PaymentStatus::Update,
            });
        }
        if !confirmed {
            self.close_session(session_id);
            warn!("masking for session {} is not confirmed", session_id);
            return Err(ServiceError::Rejected(s!(
                "masking result is not confirmed"
            ))
            .into());
        }
        session.status = PaymentStatus::Confirmed;
        Ok(MaskedTxInputs {
            session_id,
            masks: session.tx_masks,
        })
    }

    /// Drops the session failed before any masks were released, allowing a
    /// new session with the same nonce
    pub fn fail_session(&mut self, session_id: SessionId) -> Result<(), Error> {
        let status = self.session_mut(session_id)?.status;
        match status {
            PaymentStatus::Prepare | PaymentStatus::Update => {
                self.close_session(session_id);
                debug!("payment session {} has failed", session_id);
                Ok(())
            }
            current => Err(Error::SessionStatusMismatch {
                current,
                required: PaymentStatus::Update,
            }),
        }
    }

    /// Checks revocation of the previous state, durably records the
    /// revealed secret and only then releases the pay token mask.
    ///
    /// Repeating the call for an already revoked session returns the same
    /// opening.
    pub fn validate_revoked_state(
        &mut self,
        session_id: SessionId,
        revoked: &RevokedState,
    ) -> Result<PayTokenMaskOpening, Error> {
        let session = match self.sessions.get(&session_id) {
            Some(session) => *session,
            None => return self.revoked_opening(session_id, revoked),
        };
        let opening = PayTokenMaskOpening {
            pt_mask: session.pt_mask,
            r: session.pt_mask_r,
        };
        if session.status != PaymentStatus::Confirmed {
            return Err(Error::SessionStatusMismatch {
                current: session.status,
                required: PaymentStatus::Confirmed,
            });
        }

        if revoked.nonce != session.nonce
            || revoked.rev_lock_com != session.rev_lock_com
            || !revoked.verify()
        {
            warn!(
                "invalid revocation for nonce {} in session {}",
                session.nonce, session_id
            );
            self.spent_nonces.insert(session.nonce, SpentNonce {
                session_id,
                revocation: None,
                opening,
            });
            self.close_session(session_id);
            return Err(Error::InvalidRevocationProof);
        }

        self.ledger.put(revoked.rev_lock, revoked.rev_secret)?;
        self.spent_nonces.insert(session.nonce, SpentNonce {
            session_id,
            revocation: Some((revoked.rev_lock, revoked.rev_secret)),
            opening,
        });
        self.close_session(session_id);
        debug!(
            "state with nonce {} is revoked in session {}",
            session.nonce, session_id
        );
        Ok(opening)
    }

    fn revoked_opening(
        &self,
        session_id: SessionId,
        revoked: &RevokedState,
    ) -> Result<PayTokenMaskOpening, Error> {
        let spent = self
            .spent_nonces
            .get(&revoked.nonce)
            .filter(|spent| spent.session_id == session_id)
            .ok_or(Error::UnknownSession(session_id))?;
        match spent.revocation {
            Some(pair) if pair == (revoked.rev_lock, revoked.rev_secret) => {
                Ok(spent.opening)
            }
            _ => Err(Error::InvalidRevocationProof),
        }
    }

    /// Looks up the revocation secret for a lock observed on-chain
    pub fn check_rev_lock(
        &self,
        rev_lock: &RevLock,
    ) -> Result<Option<RevSecret>, Error> {
        Ok(self.ledger.get(rev_lock)?)
    }

    /// Forms the dispute transaction for a customer-close transaction
    /// publishing a revoked state. Returns `None` if the state is not
    /// revoked.
    pub fn dispute(
        &mut self,
        close_tx: &Transaction,
        fee: u64,
    ) -> Result<Option<ClosingTx>, Error> {
        let (rev_lock, cust_close_pk) = parse_revocation_output(close_tx)
            .map_err(|_| Error::UnrecognizedCloseTx)?;
        let rev_secret = match self.ledger.get(&rev_lock)? {
            Some(rev_secret) => rev_secret,
            None => return Ok(None),
        };
        let escrow_txid = self.channel_spent_by(close_tx)?;
        let token = self.channel(escrow_txid)?.token;

        let to_customer =
            close_tx.output.first().ok_or(Error::UnrecognizedCloseTx)?;
        let expected = TxOut::zk_to_customer(
            to_customer.value,
            rev_lock,
            self.keys.dispute_pk,
            cust_close_pk,
            self.params.self_delay,
        );
        if expected.script_pubkey != to_customer.script_pubkey {
            return Err(Error::UnrecognizedCloseTx);
        }

        let signable = dispute_tx(
            OutPoint::new(close_tx.txid(), 0),
            to_customer.value,
            rev_lock,
            &token.closing_keys(cust_close_pk),
            self.params.self_delay,
            self.keys.payout_pk,
            fee,
            &self.params.fees,
            self.params.dust_limit,
        )?;
        let signature = signable.sign(&self.dispute_sk)?;
        let dispute =
            signable.finalize_dispute(&signature, rev_secret.to_bytes());

        self.channel_mut(escrow_txid)?.status = ChannelStatus::Disputed;
        warn!(
            "revoked state {} was published in {}; disputing with {}",
            rev_lock,
            close_tx.txid(),
            dispute.txid()
        );
        Ok(Some(dispute))
    }

    /// Provides the signed merch-close transaction for a unilateral close
    pub fn force_close(
        &mut self,
        escrow_txid: Txid,
    ) -> Result<ClosingTx, Error> {
        let channel = self.channel_mut(escrow_txid)?;
        match channel.status {
            ChannelStatus::PendingOpen
            | ChannelStatus::Open
            | ChannelStatus::MerchantInitClose => {}
            current => {
                return Err(Error::ChannelStatusMismatch {
                    current,
                    required: ChannelStatus::Open,
                })
            }
        }
        channel.status = ChannelStatus::MerchantInitClose;
        info!("merchant closes channel {}", escrow_txid);
        Ok(channel.merch_close.clone())
    }

    /// Claims the merch-close output after the self-delay timelock matures
    pub fn claim_merch_close(
        &self,
        escrow_txid: Txid,
        fee: u64,
    ) -> Result<ClosingTx, Error> {
        let channel = self.channel(escrow_txid)?;
        if channel.status != ChannelStatus::MerchantInitClose {
            return Err(Error::ChannelStatusMismatch {
                current: channel.status,
                required: ChannelStatus::MerchantInitClose,
            });
        }
        let token = channel.token;
        let value = channel
            .merch_close
            .tx()
            .output
            .first()
            .map(|txout| txout.value)
            .ok_or(Error::UnrecognizedCloseTx)?;
        let signable = merch_claim_tx(
            token.merch_outpoint(),
            value,
            &token.closing_keys(token.pk_c()),
            self.params.self_delay,
            self.keys.payout_pk,
            fee,
            &self.params.fees,
            self.params.dust_limit,
        )?;
        let signature = signable.sign(&self.payout_sk)?;
        Ok(signable.finalize_delayed(&signature))
    }

    /// Claims the to-merchant output of a customer-close transaction
    pub fn claim_to_merchant(
        &mut self,
        close_tx: &Transaction,
        fee: u64,
    ) -> Result<ClosingTx, Error> {
        let escrow_txid = self.channel_spent_by(close_tx)?;
        let payout_pk = self.keys.payout_pk;
        let to_merchant =
            close_tx.output.get(1).ok_or(Error::UnrecognizedCloseTx)?;
        if to_merchant.script_pubkey
            != TxOut::zk_to_merchant(to_merchant.value, payout_pk).script_pubkey
        {
            return Err(Error::UnrecognizedCloseTx);
        }

        let signable = merch_claim_to_merchant_tx(
            OutPoint::new(close_tx.txid(), 1),
            to_merchant.value,
            payout_pk,
            payout_pk,
            fee,
            &self.params.fees,
            self.params.dust_limit,
        )?;
        let signature = signable.sign(&self.payout_sk)?;
        let claim = signable.finalize_p2wpkh(&signature, &payout_pk);

        let channel = self.channel_mut(escrow_txid)?;
        if matches!(
            channel.status,
            ChannelStatus::PendingOpen
                | ChannelStatus::Open
                | ChannelStatus::MerchantInitClose
        ) {
            channel.status = ChannelStatus::CustomerInitClose;
        }
        Ok(claim)
    }

    /// Registers confirmation of the final channel transactions
    pub fn mark_closed(&mut self, escrow_txid: Txid) -> Result<(), Error> {
        let channel = self.channel_mut(escrow_txid)?;
        match channel.status {
            ChannelStatus::MerchantInitClose
            | ChannelStatus::CustomerInitClose
            | ChannelStatus::Disputed
            | ChannelStatus::PendingClose => {}
            current => {
                return Err(Error::ChannelStatusMismatch {
                    current,
                    required: ChannelStatus::PendingClose,
                })
            }
        }
        channel.status = ChannelStatus::ConfirmedClose;
        info!("merchant channel {} is closed", escrow_txid);
        Ok(())
    }

    #[inline]
    pub fn channel_status(&self, escrow_txid: Txid) -> Option<ChannelStatus> {
        self.channels.get(&escrow_txid).map(|channel| channel.status)
    }

    #[inline]
    pub fn channel_token(&self, escrow_txid: Txid) -> Option<&ChannelToken> {
        self.channels.get(&escrow_txid).map(|channel| &channel.token)
    }

    #[inline]
    /// Status of a live session; `None` once the session is revoked, failed
    /// or was never opened
    pub fn session_status(
        &self,
        session_id: SessionId,
    ) -> Option<PaymentStatus> {
        self.sessions.get(&session_id).map(|session| session.status)
    }

    #[inline]
    pub fn live_sessions(&self) -> usize { self.sessions.len() }

    /// Status of the payment made with the nonce
    pub fn nonce_status(&self, nonce: &Nonce) -> Option<PaymentStatus> {
        if let Some(spent) = self.spent_nonces.get(nonce) {
            return Some(match spent.revocation {
                Some(_) => PaymentStatus::Revoked,
                None => PaymentStatus::Error,
            });
        }
        let session_id = self.live_nonces.get(nonce)?;
        self.session_status(*session_id)
    }

    #[inline]
    pub fn is_nonce_spent(&self, nonce: &Nonce) -> bool {
        self.spent_nonces.contains_key(nonce)
    }

    #[inline]
    pub fn ledger(&self) -> &Arc<dyn RevocationLedger> { &self.ledger }
}

fn sign_cust_close(
    token: &ChannelToken,
    source: CloseSource,
    state: &State,
    cust_close_pk: PublicKey,
    params: &ChannelParams,
    sk_m: &SecretKey,
) -> Result<Signature, Error> {
    let signature = token
        .cust_close_tx(source, state, cust_close_pk, params)?
        .sign(sk_m)?;
    Ok(signature)
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::atomic::{AtomicBool, Ordering};

    use bitcoin::hashes::Hash;
    use bitcoin::Sequence;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use secp256k1::{Message, SECP256K1};
    use tx::FundingUtxo;

    use super::*;
    use crate::customer::{CustomerState, FundingSource};
    use crate::ledger::{LedgerError, MemoryLedger};
    use crate::service::{
        LocalTokenService, MaskingRequest, PaymentTokenService,
    };
    use crate::state::Lifecycle;

    pub(crate) fn merchant_with(
        rng: &mut StdRng,
        policy: NegativePaymentPolicy,
        ledger: Arc<dyn RevocationLedger>,
    ) -> MerchantState {
        MerchantState::init(rng, ChannelParams::default(), policy, ledger)
            .unwrap()
    }

    pub(crate) fn merchant(rng: &mut StdRng) -> MerchantState {
        merchant_with(rng, default!(), Arc::new(MemoryLedger::new()))
    }

    fn fund_request(
        rng: &mut StdRng,
        customer: &mut CustomerState,
    ) -> MerchCloseRequest {
        let funding_sk = SecretKey::new(rng);
        let mut txid = [0u8; 32];
        rng.fill_bytes(&mut txid);
        let value = (customer.cust_balance() + customer.merch_balance()) as u64;
        customer
            .fund(FundingSource::Utxo {
                utxo: FundingUtxo {
                    outpoint: OutPoint::new(Txid::from_inner(txid), 0),
                    value: value + 1000,
                    pubkey: pk!(funding_sk),
                },
                funding_sk,
                change_pk: pk!(funding_sk),
                fee: 1000,
            })
            .unwrap()
    }

    /// Runs the channel through funding and activation
    pub(crate) fn open_channel(
        rng: &mut StdRng,
        merchant: &mut MerchantState,
        cust_bal: i64,
        merch_bal: i64,
    ) -> CustomerState {
        let mut customer = CustomerState::init(
            rng,
            merchant.params().clone(),
            merchant.keys(),
            cust_bal,
            merch_bal,
            "customer",
        )
        .unwrap();
        let request = fund_request(rng, &mut customer);
        let escrow_txid = request.token.escrow_txid();
        merchant.verify_merch_close(&request).unwrap();
        let (init, hash) = customer.initial_state().unwrap();
        let sigs = merchant.sign_initial_closing_txs(&init).unwrap();
        customer.store_initial_closing_sigs(&sigs).unwrap();
        merchant.validate_initial_state(&init, hash).unwrap();
        customer.mark_open().unwrap();
        merchant.mark_open(escrow_txid).unwrap();
        let state = customer.activation_request().unwrap();
        let pay_token = merchant.activate(escrow_txid, &state).unwrap();
        customer.activate_finalize(pay_token).unwrap();
        customer
    }

    /// Runs the payment round up to the revocation of the previous state
    fn masked_round(
        rng: &mut StdRng,
        customer: &mut CustomerState,
        merchant: &mut MerchantState,
        amount: i64,
        justification: Option<String>,
    ) -> Result<(SessionId, RevokedState), Error> {
        let request = customer.prepare_payment(rng, amount, justification)?;
        let response = merchant.prepare_payment(rng, &request)?;
        let request = MaskingRequest {
            customer: customer.masking_input(&response)?,
            merchant: merchant.masking_input(response.session_id)?,
        };
        let outcome = LocalTokenService.compute_masks(request)?;
        let masks = merchant
            .confirm_masking(response.session_id, outcome.merchant_confirmed)?;
        customer.unmask_close_signatures(&outcome.customer, &masks)?;
        let revoked = customer.revoke_previous_state()?;
        Ok((response.session_id, revoked))
    }

    pub(crate) fn pay(
        rng: &mut StdRng,
        customer: &mut CustomerState,
        merchant: &mut MerchantState,
        amount: i64,
        justification: Option<String>,
    ) -> Result<PayToken, Error> {
        let (session_id, revoked) =
            masked_round(rng, customer, merchant, amount, justification)?;
        let opening = merchant.validate_revoked_state(session_id, &revoked)?;
        customer.unmask_pay_token(&opening)
    }

    #[derive(Debug, Default)]
    pub(crate) struct FlakyLedger {
        pub(crate) failing: AtomicBool,
        inner: MemoryLedger,
    }

    impl RevocationLedger for FlakyLedger {
        fn put(
            &self,
            rev_lock: RevLock,
            rev_secret: RevSecret,
        ) -> Result<(), LedgerError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LedgerError::Database(s!("disk unavailable")));
            }
            self.inner.put(rev_lock, rev_secret)
        }

        fn get(
            &self,
            rev_lock: &RevLock,
        ) -> Result<Option<RevSecret>, LedgerError> {
            self.inner.get(rev_lock)
        }
    }

    #[test]
    fn payment_updates_balances() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        assert_eq!(customer.stage(), Lifecycle::Open);
        let nonce = customer.nonce();

        let pay_token =
            pay(&mut rng, &mut customer, &mut merchant, 10, None).unwrap();
        assert_eq!(customer.cust_balance(), 999_990);
        assert_eq!(customer.merch_balance(), 1_000_010);
        assert_eq!(customer.nonce(), nonce.next());
        assert_eq!(customer.pay_token(), Some(pay_token));
        assert_eq!(
            PayToken::compute(&merchant.hmac_key, customer.state().unwrap()),
            pay_token
        );
        assert!(merchant.is_nonce_spent(&nonce));
        assert!(!customer.has_pending_round());

        pay(&mut rng, &mut customer, &mut merchant, 1000, None).unwrap();
        assert_eq!(customer.cust_balance(), 998_990);
        assert_eq!(customer.nonce().counter(), 2);

        let close = customer.force_close(CloseSource::Escrow).unwrap();
        let tx = close.tx();
        assert_eq!(tx.output[0].value, 998_990 - 2000);
        assert_eq!(tx.output[1].value, 1_001_010);
        assert_eq!(tx.output[3].value, 1000);
        assert_eq!(customer.status(), ChannelStatus::CustomerInitClose);
    }

    #[test]
    fn nonce_reuse_is_rejected() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);

        let request = customer.prepare_payment(&mut rng, 10, None).unwrap();
        merchant.prepare_payment(&mut rng, &request).unwrap();
        let mut replay = request.clone();
        replay.session_id = SessionId::random(&mut rng);
        assert_eq!(
            merchant.prepare_payment(&mut rng, &replay),
            Err(Error::NonceReused(request.nonce))
        );
        assert_eq!(
            customer.prepare_payment(&mut rng, 10, None),
            Err(Error::RoundInProgress)
        );
    }

    #[test]
    fn spent_nonce_is_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let stale = customer.clone();
        pay(&mut rng, &mut customer, &mut merchant, 10, None).unwrap();

        let mut stale = stale;
        let request = stale.prepare_payment(&mut rng, 10, None).unwrap();
        assert_eq!(
            merchant.prepare_payment(&mut rng, &request),
            Err(Error::NonceReused(request.nonce))
        );
        assert_eq!(
            Error::NonceReused(request.nonce).kind(),
            crate::ErrorKind::ProtocolViolation
        );
    }

    #[test]
    fn invalid_revocation_keeps_mask() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let nonce = customer.nonce();

        let (session_id, revoked) =
            masked_round(&mut rng, &mut customer, &mut merchant, 10, None)
                .unwrap();
        let mut forged = revoked;
        forged.rev_secret = RevSecret::random(&mut rng);
        assert_eq!(
            merchant.validate_revoked_state(session_id, &forged),
            Err(Error::InvalidRevocationProof)
        );
        assert_eq!(merchant.session_status(session_id), None);
        assert_eq!(merchant.nonce_status(&nonce), Some(PaymentStatus::Error));
        assert!(merchant.is_nonce_spent(&nonce));
        assert_eq!(merchant.check_rev_lock(&revoked.rev_lock), Ok(None));
        assert_eq!(
            merchant.validate_revoked_state(session_id, &revoked),
            Err(Error::InvalidRevocationProof)
        );
        assert_eq!(customer.pay_token(), None);
    }

    #[test]
    fn revocation_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);

        let (session_id, revoked) =
            masked_round(&mut rng, &mut customer, &mut merchant, 10, None)
                .unwrap();
        assert_eq!(customer.revoke_previous_state(), Ok(revoked));
        assert_eq!(customer.abort_payment(), Err(Error::RoundCommitted));
        let opening =
            merchant.validate_revoked_state(session_id, &revoked).unwrap();
        assert_eq!(
            merchant.validate_revoked_state(session_id, &revoked),
            Ok(opening)
        );
        assert_eq!(
            merchant.check_rev_lock(&revoked.rev_lock),
            Ok(Some(revoked.rev_secret))
        );
        let mut forged = revoked;
        forged.rev_secret = RevSecret::random(&mut rng);
        assert_eq!(
            merchant.validate_revoked_state(session_id, &forged),
            Err(Error::InvalidRevocationProof)
        );
        let unknown = SessionId::random(&mut rng);
        assert_eq!(
            merchant.validate_revoked_state(unknown, &revoked),
            Err(Error::UnknownSession(unknown))
        );
        customer.unmask_pay_token(&opening).unwrap();
        assert_eq!(customer.cust_balance(), 999_990);
    }

    #[test]
    fn ledger_failure_withholds_mask() {
        let mut rng = StdRng::seed_from_u64(6);
        let ledger = Arc::new(FlakyLedger::default());
        ledger.failing.store(true, Ordering::SeqCst);
        let mut merchant =
            merchant_with(&mut rng, default!(), ledger.clone());
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let nonce = customer.nonce();

        let (session_id, revoked) =
            masked_round(&mut rng, &mut customer, &mut merchant, 10, None)
                .unwrap();
        let err = merchant
            .validate_revoked_state(session_id, &revoked)
            .unwrap_err();
        assert!(matches!(err, Error::Ledger(LedgerError::Database(_))));
        assert!(err.is_recoverable());
        assert_eq!(
            merchant.session_status(session_id),
            Some(PaymentStatus::Confirmed)
        );
        assert!(!merchant.is_nonce_spent(&nonce));

        ledger.failing.store(false, Ordering::SeqCst);
        let opening =
            merchant.validate_revoked_state(session_id, &revoked).unwrap();
        customer.unmask_pay_token(&opening).unwrap();
        assert!(merchant.is_nonce_spent(&nonce));
        assert_eq!(merchant.nonce_status(&nonce), Some(PaymentStatus::Revoked));
    }

    #[test]
    fn failed_masking_allows_retry() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let nonce = customer.nonce();

        let request = customer.prepare_payment(&mut rng, 10, None).unwrap();
        let response = merchant.prepare_payment(&mut rng, &request).unwrap();
        customer.masking_input(&response).unwrap();
        merchant.masking_input(response.session_id).unwrap();
        assert!(matches!(
            merchant.confirm_masking(response.session_id, false),
            Err(Error::Service(ServiceError::Rejected(_)))
        ));
        assert_eq!(merchant.session_status(response.session_id), None);
        assert_eq!(merchant.nonce_status(&nonce), None);
        assert_eq!(merchant.live_sessions(), 0);
        customer.abort_payment().unwrap();
        assert_eq!(customer.nonce(), nonce);

        pay(&mut rng, &mut customer, &mut merchant, 10, None).unwrap();
        assert_eq!(customer.nonce(), nonce.next());
        assert_eq!(customer.cust_balance(), 999_990);
    }

    #[test]
    fn negative_payment_policy() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut strict = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut strict, 1_000_000, 1_000_000);
        let request = customer
            .prepare_payment(&mut rng, -10, Some(s!("refund")))
            .unwrap();
        assert_eq!(
            strict.prepare_payment(&mut rng, &request),
            Err(Error::NegativePaymentRejected(-10))
        );
        customer.abort_payment().unwrap();

        let mut lenient = merchant_with(
            &mut rng,
            NegativePaymentPolicy::CheckJustification,
            Arc::new(MemoryLedger::new()),
        );
        let mut customer =
            open_channel(&mut rng, &mut lenient, 1_000_000, 1_000_000);
        assert_eq!(
            pay(&mut rng, &mut customer, &mut lenient, -10, None),
            Err(Error::NegativePaymentRejected(-10))
        );
        customer.abort_payment().unwrap();
        pay(&mut rng, &mut customer, &mut lenient, -10, Some(s!("refund")))
            .unwrap();
        assert_eq!(customer.cust_balance(), 1_000_010);
        assert_eq!(customer.merch_balance(), 999_990);
    }

    #[test]
    fn stale_close_is_disputed() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let escrow_txid = customer.channel_token().unwrap().escrow_txid();
        let old_lock = customer.state().unwrap().rev_lock;
        let stale = customer.clone().force_close(CloseSource::Escrow).unwrap();

        pay(&mut rng, &mut customer, &mut merchant, 10, None).unwrap();
        let secret = merchant.check_rev_lock(&old_lock).unwrap().unwrap();
        assert_eq!(secret.rev_lock(), old_lock);

        let dispute = merchant.dispute(stale.tx(), 1000).unwrap().unwrap();
        assert_eq!(dispute.kind(), TxKind::Dispute);
        let input = &dispute.tx().input[0];
        assert_eq!(input.previous_output, OutPoint::new(stale.txid(), 0));
        assert_eq!(input.witness.to_vec()[1], secret.to_bytes().to_vec());
        assert_eq!(
            dispute.tx().output[0].value,
            stale.tx().output[0].value - 1000
        );
        assert_eq!(
            merchant.channel_status(escrow_txid),
            Some(ChannelStatus::Disputed)
        );

        let current = customer.force_close(CloseSource::Escrow).unwrap();
        assert_eq!(merchant.dispute(current.tx(), 1000), Ok(None));
    }

    #[test]
    fn merchant_close_and_claims() {
        let mut rng = StdRng::seed_from_u64(10);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        pay(&mut rng, &mut customer, &mut merchant, 10, None).unwrap();
        let token = *customer.channel_token().unwrap();
        let escrow_txid = token.escrow_txid();

        let merch_close = merchant.force_close(escrow_txid).unwrap();
        assert_eq!(merch_close.kind(), TxKind::MerchClose);
        assert_eq!(merch_close.txid(), token.merch_txid());
        let claim = merchant.claim_merch_close(escrow_txid, 1000).unwrap();
        assert_eq!(
            claim.tx().input[0].sequence,
            Sequence::from_height(merchant.params().self_delay)
        );

        let cust_close = customer.force_close(CloseSource::MerchClose).unwrap();
        assert_eq!(cust_close.kind(), TxKind::CustCloseFromMerchClose);
        assert_eq!(
            cust_close.tx().input[0].previous_output,
            token.merch_outpoint()
        );
        assert_eq!(cust_close.tx().output[1].value, 1_000_010 - 2000);

        let to_merchant =
            merchant.claim_to_merchant(cust_close.tx(), 1000).unwrap();
        assert_eq!(
            to_merchant.tx().output[0].value,
            cust_close.tx().output[1].value - 1000
        );
        assert_eq!(
            merchant.channel_status(escrow_txid),
            Some(ChannelStatus::CustomerInitClose)
        );

        let cust_claim = customer.claim(cust_close.tx(), 1000).unwrap();
        assert_eq!(cust_claim.kind(), TxKind::CustClaim);
        assert_eq!(
            cust_claim.tx().output[0].value,
            cust_close.tx().output[0].value - 1000
        );

        customer.mark_closed().unwrap();
        merchant.mark_closed(escrow_txid).unwrap();
        assert_eq!(customer.stage(), Lifecycle::Closed);
        assert_eq!(
            merchant.channel_status(escrow_txid),
            Some(ChannelStatus::ConfirmedClose)
        );
    }

    #[test]
    fn initial_state_must_match() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut merchant = merchant(&mut rng);
        let mut customer = CustomerState::init(
            &mut rng,
            merchant.params().clone(),
            merchant.keys(),
            1_000_000,
            1_000_000,
            "customer",
        )
        .unwrap();
        let request = fund_request(&mut rng, &mut customer);
        let escrow_txid = request.token.escrow_txid();

        let mut forged_request = request;
        forged_request.cust_sig = SECP256K1.sign_ecdsa(
            &Message::from_slice(&[1u8; 32]).unwrap(),
            &SecretKey::new(&mut rng),
        );
        assert_eq!(
            merchant.verify_merch_close(&forged_request),
            Err(Error::SignatureVerification(TxKind::MerchClose))
        );
        merchant.verify_merch_close(&request).unwrap();

        let (init, hash) = customer.initial_state().unwrap();
        let sigs = merchant.sign_initial_closing_txs(&init).unwrap();
        let mut forged = init;
        forged.rev_lock = RevLock::from_bytes([1u8; 32]);
        assert_eq!(
            merchant.validate_initial_state(&forged, forged.hash()),
            Err(Error::InitialStateMismatch)
        );
        assert_eq!(
            merchant.validate_initial_state(&init, forged.hash()),
            Err(Error::InitialStateMismatch)
        );
        assert_eq!(
            merchant.mark_open(escrow_txid),
            Err(Error::ChannelStatusMismatch {
                current: ChannelStatus::None,
                required: ChannelStatus::PendingOpen
            })
        );

        customer.store_initial_closing_sigs(&sigs).unwrap();
        merchant.validate_initial_state(&init, hash).unwrap();
        assert_eq!(
            merchant.channel_status(escrow_txid),
            Some(ChannelStatus::PendingOpen)
        );
        let state = *customer.state().unwrap();
        assert!(matches!(
            merchant.activate(escrow_txid, &state),
            Err(Error::ChannelStatusMismatch { .. })
        ));
    }

    #[test]
    fn overflowing_funding_is_rejected() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut merchant = merchant(&mut rng);
        let mut customer = CustomerState::init(
            &mut rng,
            merchant.params().clone(),
            merchant.keys(),
            1_000_000,
            1_000_000,
            "customer",
        )
        .unwrap();
        let mut request = fund_request(&mut rng, &mut customer);
        request.funding.init_cust_bal = i64::MAX;
        request.funding.init_merch_bal = i64::MAX;
        assert_eq!(
            merchant.verify_merch_close(&request),
            Err(Error::InvalidBalance {
                balance: i64::MAX,
                minimum: 0
            })
        );
        assert_eq!(merchant.channel_status(request.token.escrow_txid()), None);
    }

    #[test]
    fn payment_keeps_minimum_balance() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let nonce = customer.nonce();

        assert_eq!(
            customer.prepare_payment(&mut rng, 997_271, None),
            Err(Error::InsufficientBalance {
                amount: 997_271,
                balance: 1_000_000,
                minimum: 2730
            })
        );
        assert!(!customer.has_pending_round());
        assert_eq!(customer.nonce(), nonce);

        pay(&mut rng, &mut customer, &mut merchant, 997_270, None).unwrap();
        assert_eq!(customer.cust_balance(), 2730);
        assert_eq!(customer.merch_balance(), 1_997_270);
        assert_eq!(customer.nonce(), nonce.next());
        assert_eq!(
            customer.prepare_payment(&mut rng, 1, None),
            Err(Error::InsufficientBalance {
                amount: 1,
                balance: 2730,
                minimum: 2730
            })
        );

        let close = customer.force_close(CloseSource::Escrow).unwrap();
        assert_eq!(close.tx().output[0].value, 730);
        assert_eq!(close.tx().output[1].value, 1_997_270);
    }

    #[test]
    fn zero_payment_advances_state() {
        let mut rng = StdRng::seed_from_u64(14);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let nonce = customer.nonce();
        let old_lock = customer.state().unwrap().rev_lock;

        let pay_token =
            pay(&mut rng, &mut customer, &mut merchant, 0, None).unwrap();
        assert_eq!(customer.cust_balance(), 1_000_000);
        assert_eq!(customer.merch_balance(), 1_000_000);
        assert_eq!(customer.nonce(), nonce.next());
        assert_ne!(customer.state().unwrap().rev_lock, old_lock);
        assert_eq!(
            PayToken::compute(&merchant.hmac_key, customer.state().unwrap()),
            pay_token
        );
        assert!(merchant.is_nonce_spent(&nonce));
        let secret = merchant.check_rev_lock(&old_lock).unwrap().unwrap();
        assert_eq!(secret.rev_lock(), old_lock);
    }

    #[test]
    fn pay_token_mask_mismatch_distrusts_merchant() {
        let mut rng = StdRng::seed_from_u64(15);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);

        let (session_id, revoked) =
            masked_round(&mut rng, &mut customer, &mut merchant, 10, None)
                .unwrap();
        let mut opening =
            merchant.validate_revoked_state(session_id, &revoked).unwrap();
        opening.pt_mask = PayTokenMask::random(&mut rng);
        assert_eq!(
            customer.unmask_pay_token(&opening),
            Err(Error::PayTokenMaskMismatch)
        );
        assert!(!customer.is_merchant_trusted());
        assert_eq!(customer.pay_token(), None);
        assert!(!customer.has_pending_round());
        assert_eq!(
            customer.prepare_payment(&mut rng, 10, None),
            Err(Error::MerchantUntrusted)
        );

        // the revoked state is replaced by the new one signed in the round
        let close = customer.force_close(CloseSource::Escrow).unwrap();
        assert_eq!(close.tx().output[0].value, 999_990 - 2000);
        assert_eq!(merchant.dispute(close.tx(), 1000), Ok(None));
    }

    #[test]
    fn finished_sessions_are_dropped() {
        let mut rng = StdRng::seed_from_u64(16);
        let mut merchant = merchant(&mut rng);
        let mut customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);

        for _ in 0..5 {
            pay(&mut rng, &mut customer, &mut merchant, 10, None).unwrap();
        }
        assert_eq!(merchant.live_sessions(), 0);

        let request = customer.prepare_payment(&mut rng, 10, None).unwrap();
        let response = merchant.prepare_payment(&mut rng, &request).unwrap();
        assert_eq!(merchant.live_sessions(), 1);
        assert_eq!(
            merchant.nonce_status(&request.nonce),
            Some(PaymentStatus::Prepare)
        );
        merchant.fail_session(response.session_id).unwrap();
        assert_eq!(merchant.live_sessions(), 0);
        assert_eq!(
            merchant.fail_session(response.session_id),
            Err(Error::UnknownSession(response.session_id))
        );
        customer.abort_payment().unwrap();

        pay(&mut rng, &mut customer, &mut merchant, 10, None).unwrap();
        assert_eq!(customer.cust_balance(), 999_940);
        assert_eq!(merchant.live_sessions(), 0);
    }
}
