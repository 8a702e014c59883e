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

//! Customer side of the channel: funding, activation, payments and closing.

use bitcoin::{OutPoint, Transaction, TxOut};
use rand::{CryptoRng, RngCore};
use secp256k1::{PublicKey, SecretKey};
use tx::scripts::parse_revocation_output;
use tx::transactions::{cust_claim_tx, escrow_tx, merch_close_tx};
use tx::{
    ClosingKeys, ClosingTx, CloseSource, FundingUtxo, Prevout,
    ScriptGenerators, TxKind,
};

use crate::masking::{MaskedOutputs, MaskedPayToken, PayMaskCom, TxMasks};
use crate::messages::{
    CloseSignatures, InitCustState, MaskedTxInputs, MerchCloseRequest,
    PayTokenMaskOpening, PaymentRequest, PaymentResponse,
};
use crate::params::ChannelParams;
use crate::revocation::{BlindingFactor, RevLockCom, RevSecret, RevokedState};
use crate::service::CustomerMaskingInput;
use crate::state::{
    ChannelStatus, Lifecycle, Nonce, PayToken, SessionId, State, StateHash,
};
use crate::token::{self, ChannelToken, FundingTxInfo, MerchantPublicKeys};
use crate::{keypair, Error};

/// Source of the escrow transaction funding the channel
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FundingSource {
    /// Escrow transaction is formed and signed from a customer-owned UTXO
    Utxo {
        utxo: FundingUtxo,
        funding_sk: SecretKey,
        change_pk: PublicKey,
        fee: u64,
    },

    /// Escrow and merch-close transactions were formed externally
    Formed(FundingTxInfo),
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
struct FundedChannel {
    token: ChannelToken,
    funding: FundingTxInfo,
    state: State,
    escrow_tx: Option<ClosingTx>,
    /// Merchant signatures on the customer-close transactions for `state`
    close_sigs: Option<CloseSignatures>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
struct PendingRound {
    session_id: SessionId,
    amount: i64,
    new_state: State,
    new_secret: RevSecret,
    t: BlindingFactor,
    rev_lock_com: RevLockCom,
    pay_mask_com: Option<PayMaskCom>,
    unmasked: Option<(CloseSignatures, MaskedPayToken)>,
    revoked: Option<RevokedState>,
}

/// Customer channel state machine
#[derive(Getters, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct CustomerState {
    name: String,

    params: ChannelParams,

    #[getter(as_copy)]
    stage: Lifecycle,

    #[getter(as_copy)]
    status: ChannelStatus,

    #[getter(skip)]
    sk_c: SecretKey,

    /// Customer escrow key
    #[getter(as_copy)]
    pk_c: PublicKey,

    #[getter(skip)]
    payout_sk: SecretKey,

    /// Customer key receiving funds from customer-close transactions
    #[getter(as_copy)]
    cust_close_pk: PublicKey,

    #[getter(as_copy)]
    merch_keys: MerchantPublicKeys,

    #[getter(skip)]
    init_balances: (i64, i64),

    #[getter(skip)]
    init_nonce: Nonce,

    /// Secret of the current state revocation lock
    #[getter(skip)]
    rev_secret: RevSecret,

    #[getter(skip)]
    channel: Option<FundedChannel>,

    #[getter(skip)]
    pay_token: Option<PayToken>,

    #[getter(skip)]
    pending: Option<PendingRound>,

    #[getter(skip)]
    merchant_trusted: bool,
}

impl CustomerState {
    /// Generates customer keys and the initial channel balances. Zero
    /// merchant balance is replaced with the minimum which keeps the
    /// merch-close transaction fundable, taken from the customer side.
    pub fn init<R: RngCore + CryptoRng>(
        rng: &mut R,
        params: ChannelParams,
        merch_keys: MerchantPublicKeys,
        cust_bal: i64,
        merch_bal: i64,
        name: impl ToString,
    ) -> Result<CustomerState, Error> {
        params.validate()?;

        let min_cust = params.fees.bal_min_cust as i64;
        let min_merch = params.min_merch_funding() as i64;
        let (cust_bal, merch_bal) = match merch_bal {
            0 => (cust_bal.saturating_sub(min_merch), min_merch),
            _ => (cust_bal, merch_bal),
        };
        if cust_bal < min_cust {
            return Err(Error::InvalidBalance {
                balance: cust_bal,
                minimum: min_cust,
            });
        }
        if merch_bal < min_merch {
            return Err(Error::InvalidBalance {
                balance: merch_bal,
                minimum: min_merch,
            });
        }
        token::escrow_value(cust_bal, merch_bal)?;

        let (sk_c, pk_c) = keypair(rng)?;
        let (payout_sk, cust_close_pk) = keypair(rng)?;
        let customer = CustomerState {
            name: name.to_string(),
            params,
            stage: Lifecycle::Initialized,
            status: ChannelStatus::None,
            sk_c,
            pk_c,
            payout_sk,
            cust_close_pk,
            merch_keys,
            init_balances: (cust_bal, merch_bal),
            init_nonce: Nonce::random(rng),
            rev_secret: RevSecret::random(rng),
            channel: None,
            pay_token: None,
            pending: None,
            merchant_trusted: true,
        };
        info!(
            "customer {} initialized channel with balances {}/{} sat",
            customer.name, cust_bal, merch_bal
        );
        Ok(customer)
    }

    fn require_stage(
        &self,
        required: &'static [Lifecycle],
    ) -> Result<(), Error> {
        if !required.contains(&self.stage) {
            return Err(Error::LifecycleMismatch {
                current: self.stage,
                required,
            });
        }
        Ok(())
    }

    fn require_status(&self, required: ChannelStatus) -> Result<(), Error> {
        if self.status != required {
            return Err(Error::ChannelStatusMismatch {
                current: self.status,
                required,
            });
        }
        Ok(())
    }

    fn channel(&self) -> Result<&FundedChannel, Error> {
        self.channel.as_ref().ok_or(Error::ChannelStatusMismatch {
            current: self.status,
            required: ChannelStatus::PendingOpen,
        })
    }

    /// Forms the funding transactions and signs the merch-close transaction
    /// for the merchant
    pub fn fund(
        &mut self,
        source: FundingSource,
    ) -> Result<MerchCloseRequest, Error> {
        self.require_stage(&[Lifecycle::Initialized])?;
        self.require_status(ChannelStatus::None)?;

        let (init_cust_bal, init_merch_bal) = self.init_balances;
        let escrow_value = token::escrow_value(init_cust_bal, init_merch_bal)?;
        let fees = self.params.fees;

        let (funding, escrow) = match source {
            FundingSource::Utxo {
                utxo,
                funding_sk,
                change_pk,
                fee,
            } => {
                let escrow = escrow_tx(
                    utxo,
                    self.merch_keys.pk_m,
                    self.pk_c,
                    escrow_value,
                    change_pk,
                    fee,
                    &fees,
                    self.params.dust_limit,
                )?
                .sign(&funding_sk)?;
                let escrow_outpoint = OutPoint::new(escrow.txid(), 0);
                let keys = ClosingKeys {
                    merch_pk: self.merch_keys.pk_m,
                    cust_pk: self.pk_c,
                    merch_payout_pk: self.merch_keys.payout_pk,
                    merch_dispute_pk: self.merch_keys.dispute_pk,
                    cust_close_pk: self.cust_close_pk,
                };
                let merch_txid = merch_close_tx(
                    escrow_outpoint,
                    escrow_value,
                    &keys,
                    self.params.self_delay,
                    &fees,
                    self.params.dust_limit,
                )?
                .txid();
                let funding = FundingTxInfo {
                    escrow_txid: escrow.txid(),
                    escrow_prevout: Prevout::with(escrow_outpoint),
                    merch_txid,
                    merch_prevout: Prevout::with(OutPoint::new(merch_txid, 0)),
                    init_cust_bal,
                    init_merch_bal,
                    fee_mc: fees.fee_mc,
                    min_fee: fees.min_fee,
                    max_fee: fees.max_fee,
                };
                (funding, Some(escrow))
            }
            FundingSource::Formed(funding) => {
                if funding.init_cust_bal != init_cust_bal
                    || funding.init_merch_bal != init_merch_bal
                {
                    return Err(Error::ChannelTokenMismatch(
                        "initial balances",
                    ));
                }
                (funding, None)
            }
        };

        let token = ChannelToken::with(self.pk_c, &self.merch_keys, &funding);
        let merch_close = token.merch_close_tx(escrow_value, &self.params)?;
        if merch_close.txid() != funding.merch_txid {
            return Err(Error::ChannelTokenMismatch("merch-close transaction"));
        }
        let cust_sig = merch_close.sign(&self.sk_c)?;

        let state = State {
            nonce: self.init_nonce,
            rev_lock: self.rev_secret.rev_lock(),
            pk_c: self.pk_c,
            pk_m: self.merch_keys.pk_m,
            bc: init_cust_bal,
            bm: init_merch_bal,
            escrow_txid: funding.escrow_txid,
            merch_txid: funding.merch_txid,
            escrow_prevout: funding.escrow_prevout,
            merch_prevout: funding.merch_prevout,
        };
        self.channel = Some(FundedChannel {
            token,
            funding,
            state,
            escrow_tx: escrow,
            close_sigs: None,
        });
        self.status = ChannelStatus::PendingOpen;
        debug!(
            "customer {} formed escrow {} and merch-close {}",
            self.name, funding.escrow_txid, funding.merch_txid
        );

        Ok(MerchCloseRequest {
            token,
            funding,
            cust_sig,
        })
    }

    /// Initial state of the channel together with its hash, which the
    /// merchant validates before treating the channel as funded
    pub fn initial_state(&self) -> Result<(InitCustState, StateHash), Error> {
        self.require_stage(&[Lifecycle::Initialized, Lifecycle::Funded])?;
        let channel = self.channel()?;
        let init = InitCustState {
            escrow_txid: channel.funding.escrow_txid,
            pk_c: self.pk_c,
            cust_close_pk: self.cust_close_pk,
            bc: channel.state.bc,
            bm: channel.state.bm,
            nonce: channel.state.nonce,
            rev_lock: channel.state.rev_lock,
        };
        Ok((init, init.hash()))
    }

    /// Verifies and stores merchant signatures on the initial customer-close
    /// transactions
    pub fn store_initial_closing_sigs(
        &mut self,
        sigs: &CloseSignatures,
    ) -> Result<(), Error> {
        self.require_stage(&[Lifecycle::Initialized])?;
        let channel = self.channel()?;
        verify_close_signatures(
            &channel.token,
            &channel.state,
            self.cust_close_pk,
            &self.params,
            sigs,
        )?;
        if let Some(channel) = self.channel.as_mut() {
            channel.close_sigs = Some(*sigs);
        }
        self.stage = Lifecycle::Funded;
        info!("customer {} channel is funded", self.name);
        Ok(())
    }

    /// Registers confirmation of the escrow transaction
    pub fn mark_open(&mut self) -> Result<(), Error> {
        self.require_stage(&[Lifecycle::Funded])?;
        self.require_status(ChannelStatus::PendingOpen)?;
        self.status = ChannelStatus::Open;
        info!("customer {} channel is open", self.name);
        Ok(())
    }

    /// Provides the initial state for which the merchant issues the first
    /// pay token
    pub fn activation_request(&mut self) -> Result<State, Error> {
        self.require_stage(&[Lifecycle::Funded])?;
        self.require_status(ChannelStatus::Open)?;
        let state = self.channel()?.state;
        self.stage = Lifecycle::Activated;
        Ok(state)
    }

    pub fn activate_finalize(
        &mut self,
        pay_token: PayToken,
    ) -> Result<(), Error> {
        self.require_stage(&[Lifecycle::Activated])?;
        self.pay_token = Some(pay_token);
        self.stage = Lifecycle::Open;
        info!("customer {} channel is activated", self.name);
        Ok(())
    }

    /// Starts a new payment round transferring `amount` to the merchant;
    /// negative amount requests a refund
    pub fn prepare_payment<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        amount: i64,
        justification: Option<String>,
    ) -> Result<PaymentRequest, Error> {
        self.require_stage(&[Lifecycle::Open])?;
        if !self.merchant_trusted {
            return Err(Error::MerchantUntrusted);
        }
        if self.pending.is_some() {
            return Err(Error::RoundInProgress);
        }
        if self.pay_token.is_none() {
            return Err(Error::MissingPayToken);
        }

        let state = self.channel()?.state;
        let fees = &self.params.fees;
        let min_cust = fees.bal_min_cust as i64;
        let min_merch = fees.bal_min_merch as i64;
        match state.bc.checked_sub(amount) {
            Some(bc) if bc >= min_cust => {}
            _ => {
                return Err(Error::InsufficientBalance {
                    amount,
                    balance: state.bc,
                    minimum: min_cust,
                })
            }
        }
        match state.bm.checked_add(amount) {
            Some(bm) if bm >= min_merch => {}
            Some(bm) => {
                return Err(Error::InvalidBalance {
                    balance: bm,
                    minimum: min_merch,
                })
            }
            None => {
                return Err(Error::InvalidBalance {
                    balance: i64::MAX,
                    minimum: min_merch,
                })
            }
        }

        let new_secret = RevSecret::random(rng);
        let new_state = state.with_payment(amount, new_secret.rev_lock());
        if new_state.nonce == state.nonce {
            return Err(Error::NonceReused(state.nonce));
        }
        let t = BlindingFactor::random(rng);
        let rev_lock_com = RevLockCom::with(state.rev_lock, t);
        let session_id = SessionId::random(rng);

        self.pending = Some(PendingRound {
            session_id,
            amount,
            new_state,
            new_secret,
            t,
            rev_lock_com,
            pay_mask_com: None,
            unmasked: None,
            revoked: None,
        });
        debug!(
            "customer {} prepared payment of {} sat in session {}",
            self.name, amount, session_id
        );

        Ok(PaymentRequest {
            session_id,
            nonce: state.nonce,
            rev_lock_com,
            amount,
            justification,
        })
    }

    /// Customer input to the payment token service
    pub fn masking_input(
        &mut self,
        response: &PaymentResponse,
    ) -> Result<CustomerMaskingInput, Error> {
        self.require_stage(&[Lifecycle::Open])?;
        let old_pay_token = self.pay_token.ok_or(Error::MissingPayToken)?;
        let channel = self.channel()?;
        let (token, state) = (channel.token, channel.state);
        let cust_close_pk = self.cust_close_pk;

        let pending = self.pending.as_mut().ok_or(Error::NoPendingRound)?;
        if pending.session_id != response.session_id {
            return Err(Error::UnknownSession(response.session_id));
        }
        if pending.unmasked.is_some() {
            return Err(Error::NoPendingRound);
        }
        pending.pay_mask_com = Some(response.pay_mask_com);

        Ok(CustomerMaskingInput {
            token,
            cust_close_pk,
            old_state: state,
            new_state: pending.new_state,
            old_pay_token,
            t: pending.t,
            amount: pending.amount,
            pay_mask_com: response.pay_mask_com,
        })
    }

    /// Unmasks and verifies merchant signatures on the new customer-close
    /// transactions. Invalid signatures mark the merchant as untrusted.
    pub fn unmask_close_signatures(
        &mut self,
        outputs: &MaskedOutputs,
        inputs: &MaskedTxInputs,
    ) -> Result<(), Error> {
        self.require_stage(&[Lifecycle::Open])?;
        let token = self.channel()?.token;
        let pending = self.pending.as_ref().ok_or(Error::NoPendingRound)?;
        if pending.session_id != inputs.session_id {
            return Err(Error::UnknownSession(inputs.session_id));
        }
        if pending.pay_mask_com.is_none() || pending.revoked.is_some() {
            return Err(Error::NoPendingRound);
        }
        let new_state = pending.new_state;

        let result = unmask_signatures(outputs, &inputs.masks).and_then(|sigs| {
            verify_close_signatures(
                &token,
                &new_state,
                self.cust_close_pk,
                &self.params,
                &sigs,
            )
            .map(|_| sigs)
        });
        match result {
            Ok(sigs) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.unmasked = Some((sigs, outputs.pay_token));
                }
                debug!(
                    "customer {} received close signatures for session {}",
                    self.name, inputs.session_id
                );
                Ok(())
            }
            Err(err) => {
                warn!("merchant provided invalid close signatures: {}", err);
                self.merchant_trusted = false;
                Err(err)
            }
        }
    }

    /// Switches to the new channel state and reveals the revocation secret
    /// of the previous one. Repeated calls return the same revocation.
    pub fn revoke_previous_state(&mut self) -> Result<RevokedState, Error> {
        self.require_stage(&[Lifecycle::Open])?;
        let pending = self.pending.as_mut().ok_or(Error::NoPendingRound)?;
        if let Some(revoked) = pending.revoked {
            return Ok(revoked);
        }
        let (sigs, _) = pending.unmasked.ok_or(Error::NoPendingRound)?;
        let channel = match self.channel.as_mut() {
            Some(channel) => channel,
            None => return Err(Error::NoPendingRound),
        };

        let revoked = RevokedState {
            nonce: channel.state.nonce,
            rev_lock_com: pending.rev_lock_com,
            rev_lock: channel.state.rev_lock,
            rev_secret: self.rev_secret,
            t: pending.t,
        };
        channel.state = pending.new_state;
        channel.close_sigs = Some(sigs);
        self.rev_secret = pending.new_secret;
        self.pay_token = None;
        pending.revoked = Some(revoked);
        debug!(
            "customer {} revoked state with nonce {}",
            self.name, revoked.nonce
        );
        Ok(revoked)
    }

    /// Completes the payment round by unmasking the new pay token. If the
    /// mask does not match the commitment received at the start of the
    /// round, the merchant is marked as untrusted and the channel is left
    /// without a pay token.
    pub fn unmask_pay_token(
        &mut self,
        opening: &PayTokenMaskOpening,
    ) -> Result<PayToken, Error> {
        self.require_stage(&[Lifecycle::Open])?;
        let pending = self.pending.as_ref().ok_or(Error::NoPendingRound)?;
        let (pay_mask_com, masked) =
            match (pending.revoked, pending.pay_mask_com, pending.unmasked) {
                (Some(_), Some(com), Some((_, masked))) => (com, masked),
                _ => return Err(Error::NoPendingRound),
            };
        self.pending = None;

        if !opening.opens(pay_mask_com) {
            warn!(
                "merchant revealed pay token mask not matching its commitment"
            );
            self.merchant_trusted = false;
            return Err(Error::PayTokenMaskMismatch);
        }
        let pay_token = masked.unmask(opening.pt_mask);
        self.pay_token = Some(pay_token);
        info!(
            "customer {} completed payment; balances are {}/{} sat",
            self.name,
            self.cust_balance(),
            self.merch_balance()
        );
        Ok(pay_token)
    }

    /// Drops the pending payment round. Possible only until the previous
    /// state is revoked.
    pub fn abort_payment(&mut self) -> Result<(), Error> {
        match self.pending {
            None => Err(Error::NoPendingRound),
            Some(PendingRound {
                revoked: Some(_), ..
            }) => Err(Error::RoundCommitted),
            Some(PendingRound { session_id, .. }) => {
                debug!(
                    "customer {} aborted payment session {}",
                    self.name, session_id
                );
                self.pending = None;
                Ok(())
            }
        }
    }

    /// Signs the customer-close transaction for the latest channel state,
    /// spending either escrow or merch-close output
    pub fn force_close(
        &mut self,
        source: CloseSource,
    ) -> Result<ClosingTx, Error> {
        self.require_stage(&[
            Lifecycle::Funded,
            Lifecycle::Activated,
            Lifecycle::Open,
            Lifecycle::Closing,
        ])?;
        let channel = self.channel()?;
        let sigs = channel.close_sigs.ok_or(Error::LifecycleMismatch {
            current: self.stage,
            required: &[Lifecycle::Funded],
        })?;
        let merch_sig = match source {
            CloseSource::Escrow => sigs.escrow_sig,
            CloseSource::MerchClose => sigs.merch_sig,
        };
        let signable = channel.token.cust_close_tx(
            source,
            &channel.state,
            self.cust_close_pk,
            &self.params,
        )?;
        let cust_sig = signable.sign(&self.sk_c)?;
        let close_tx = signable.finalize_multisig(&merch_sig, &cust_sig);

        self.pending = None;
        self.stage = Lifecycle::Closing;
        self.status = ChannelStatus::CustomerInitClose;
        info!(
            "customer {} closes channel with {} transaction {}",
            self.name,
            close_tx.kind(),
            close_tx.txid()
        );
        Ok(close_tx)
    }

    /// Claims the to-customer output of a confirmed customer-close
    /// transaction after the self-delay timelock matures
    pub fn claim(
        &self,
        close_tx: &Transaction,
        fee: u64,
    ) -> Result<ClosingTx, Error> {
        self.require_stage(&[Lifecycle::Closing])?;
        let token = self.channel()?.token;
        let (rev_lock, cust_close_pk) = parse_revocation_output(close_tx)
            .map_err(|_| Error::UnrecognizedCloseTx)?;
        if cust_close_pk != self.cust_close_pk {
            return Err(Error::UnrecognizedCloseTx);
        }
        let to_customer =
            close_tx.output.first().ok_or(Error::UnrecognizedCloseTx)?;
        let expected = TxOut::zk_to_customer(
            to_customer.value,
            rev_lock,
            self.merch_keys.dispute_pk,
            self.cust_close_pk,
            self.params.self_delay,
        );
        if expected.script_pubkey != to_customer.script_pubkey {
            return Err(Error::UnrecognizedCloseTx);
        }

        let signable = cust_claim_tx(
            OutPoint::new(close_tx.txid(), 0),
            to_customer.value,
            rev_lock,
            &token.closing_keys(self.cust_close_pk),
            self.params.self_delay,
            self.cust_close_pk,
            fee,
            &self.params.fees,
            self.params.dust_limit,
        )?;
        let signature = signable.sign(&self.payout_sk)?;
        Ok(signable.finalize_delayed(&signature))
    }

    /// Registers confirmation of the final channel transactions
    pub fn mark_closed(&mut self) -> Result<(), Error> {
        self.require_stage(&[Lifecycle::Closing])?;
        self.stage = Lifecycle::Closed;
        self.status = ChannelStatus::ConfirmedClose;
        info!("customer {} channel is closed", self.name);
        Ok(())
    }

    /// Registers a dispute of the customer-close transaction by the
    /// merchant
    pub fn mark_disputed(&mut self) -> Result<(), Error> {
        self.require_stage(&[Lifecycle::Closing])?;
        self.stage = Lifecycle::Disputed;
        self.status = ChannelStatus::Disputed;
        warn!("customer {} channel close was disputed", self.name);
        Ok(())
    }

    #[inline]
    pub fn channel_token(&self) -> Option<&ChannelToken> {
        self.channel.as_ref().map(|channel| &channel.token)
    }

    #[inline]
    pub fn funding(&self) -> Option<&FundingTxInfo> {
        self.channel.as_ref().map(|channel| &channel.funding)
    }

    /// Current channel state
    #[inline]
    pub fn state(&self) -> Option<&State> {
        self.channel.as_ref().map(|channel| &channel.state)
    }

    /// Signed escrow transaction, if it was formed from a customer UTXO
    #[inline]
    pub fn escrow_tx(&self) -> Option<&ClosingTx> {
        self.channel.as_ref().and_then(|channel| channel.escrow_tx.as_ref())
    }

    #[inline]
    pub fn pay_token(&self) -> Option<PayToken> { self.pay_token }

    #[inline]
    pub fn is_merchant_trusted(&self) -> bool { self.merchant_trusted }

    #[inline]
    pub fn has_pending_round(&self) -> bool { self.pending.is_some() }

    /// Session of the payment round in progress
    pub fn pending_session(&self) -> Option<SessionId> {
        self.pending.as_ref().map(|pending| pending.session_id)
    }

    pub fn cust_balance(&self) -> i64 {
        self.state().map(|state| state.bc).unwrap_or(self.init_balances.0)
    }

    pub fn merch_balance(&self) -> i64 {
        self.state().map(|state| state.bm).unwrap_or(self.init_balances.1)
    }

    pub fn nonce(&self) -> Nonce {
        self.state().map(|state| state.nonce).unwrap_or(self.init_nonce)
    }
}

fn unmask_signatures(
    outputs: &MaskedOutputs,
    masks: &TxMasks,
) -> Result<CloseSignatures, Error> {
    let escrow_sig = outputs.escrow_sig.unmask(masks.escrow_mask).map_err(|_| {
        Error::SignatureVerification(TxKind::CustCloseFromEscrow)
    })?;
    let merch_sig = outputs.merch_sig.unmask(masks.merch_mask).map_err(|_| {
        Error::SignatureVerification(TxKind::CustCloseFromMerchClose)
    })?;
    Ok(CloseSignatures {
        escrow_sig,
        merch_sig,
    })
}

fn verify_close_signatures(
    token: &ChannelToken,
    state: &State,
    cust_close_pk: PublicKey,
    params: &ChannelParams,
    sigs: &CloseSignatures,
) -> Result<(), Error> {
    for (source, sig) in [
        (CloseSource::Escrow, sigs.escrow_sig),
        (CloseSource::MerchClose, sigs.merch_sig),
    ] {
        token
            .cust_close_tx(source, state, cust_close_pk, params)?
            .verify(&sig, &token.pk_m())
            .map_err(|_| Error::SignatureVerification(source.tx_kind()))?;
    }
    Ok(())
}
