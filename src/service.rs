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

//! Payment token service: the blind two-party computation producing masked
//! close-transaction signatures and the masked pay token for the new channel
//! state.
//!
//! The computation is an external collaborator: implementations of
//! [`PaymentTokenService`] may run a secure multi-party computation engine or
//! a zero-knowledge backend. [`LocalTokenService`] is a reference backend
//! evaluating the same function in the clear, which is suitable for tests and
//! single-host deployments where both inputs are available.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use secp256k1::{PublicKey, SecretKey, SECP256K1};
use tx::CloseSource;

use crate::masking::{
    MaskedOutputs, MaskedPayToken, MaskedSignature, PayMaskCom,
    PayMaskRandomness, PayTokenMask, TxMasks,
};
use crate::params::ChannelParams;
use crate::revocation::{BlindingFactor, RevLockCom};
use crate::state::{HmacKey, Nonce, PayToken, SessionId, State};
use crate::token::{ChannelToken, MerchantPublicKeys};

/// Default time given to the payment token service to complete
pub const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// Failures of the payment token service. None of them changes the state of
/// the parties, so the payment round may be retried.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ServiceError {
    /// payment token service did not respond within {0} ms
    Timeout(u64),

    /// payment token service is unavailable: {0}
    Unavailable(String),

    /// payment token service rejected masking inputs: {0}
    Rejected(String),
}

/// Customer inputs to the masking computation
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct CustomerMaskingInput {
    pub token: ChannelToken,
    pub cust_close_pk: PublicKey,
    pub old_state: State,
    pub new_state: State,
    pub old_pay_token: PayToken,
    /// Opening of the revocation lock commitment of the old state
    pub t: BlindingFactor,
    pub amount: i64,
    pub pay_mask_com: PayMaskCom,
}

/// Merchant inputs to the masking computation
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MerchantMaskingInput {
    pub session_id: SessionId,
    pub nonce: Nonce,
    pub rev_lock_com: RevLockCom,
    pub amount: i64,
    pub keys: MerchantPublicKeys,
    pub sk_m: SecretKey,
    pub hmac_key: HmacKey,
    pub tx_masks: TxMasks,
    pub pt_mask: PayTokenMask,
    pub pt_mask_r: PayMaskRandomness,
    pub params: ChannelParams,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MaskingRequest {
    pub customer: CustomerMaskingInput,
    pub merchant: MerchantMaskingInput,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MaskingOutcome {
    /// Masked values delivered to the customer
    pub customer: MaskedOutputs,
    /// Confirmation flag delivered to the merchant
    pub merchant_confirmed: bool,
}

/// Blind computation of the masked signatures and pay token
pub trait PaymentTokenService: Send + Sync {
    fn compute_masks(
        &self,
        request: MaskingRequest,
    ) -> Result<MaskingOutcome, ServiceError>;
}

/// Reference payment token service evaluating the masking function in the
/// clear
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct LocalTokenService;

impl LocalTokenService {
    fn validate(request: &MaskingRequest) -> Result<(), &'static str> {
        let MaskingRequest { customer, merchant } = request;
        let old = &customer.old_state;
        let new = &customer.new_state;
        let fees = &merchant.params.fees;

        if PublicKey::from_secret_key(SECP256K1, &merchant.sk_m)
            != merchant.keys.pk_m
        {
            return Err("merchant escrow key does not match its secret");
        }
        customer
            .token
            .check_merchant(&merchant.keys)
            .map_err(|_| "channel token is issued for a different merchant")?;
        customer
            .token
            .check_state(old)
            .and_then(|_| customer.token.check_state(new))
            .map_err(|_| "channel state does not match channel token")?;
        if PayToken::compute(&merchant.hmac_key, old) != customer.old_pay_token
        {
            return Err("invalid pay token for the old state");
        }
        if old.nonce != merchant.nonce {
            return Err("nonce does not match the old state");
        }
        if !merchant.rev_lock_com.opens_with(old.rev_lock, customer.t) {
            return Err("revocation lock commitment does not match old state");
        }
        if customer.amount != merchant.amount {
            return Err("payment amount mismatch");
        }
        if new.nonce != old.nonce.next() {
            return Err("new state nonce is not the successor of the old one");
        }
        if new.bc != old.bc - customer.amount
            || new.bm != old.bm + customer.amount
        {
            return Err("new state balances do not reflect the payment");
        }
        if new.bc < fees.bal_min_cust as i64
            || new.bm < fees.bal_min_merch as i64
        {
            return Err("new state balances are below channel minimums");
        }
        if PayMaskCom::with(merchant.pt_mask, merchant.pt_mask_r)
            != customer.pay_mask_com
        {
            return Err("pay token mask does not open the commitment");
        }
        Ok(())
    }
}

impl PaymentTokenService for LocalTokenService {
    fn compute_masks(
        &self,
        request: MaskingRequest,
    ) -> Result<MaskingOutcome, ServiceError> {
        LocalTokenService::validate(&request).map_err(|reason| {
            warn!("masking request rejected: {}", reason);
            ServiceError::Rejected(reason.to_owned())
        })?;

        let MaskingRequest { customer, merchant } = request;
        let rejected = |err: tx::Error| ServiceError::Rejected(err.to_string());
        let mut sigs = Vec::with_capacity(2);
        for (source, mask) in [
            (CloseSource::Escrow, merchant.tx_masks.escrow_mask),
            (CloseSource::MerchClose, merchant.tx_masks.merch_mask),
        ] {
            let close_tx = customer
                .token
                .cust_close_tx(
                    source,
                    &customer.new_state,
                    customer.cust_close_pk,
                    &merchant.params,
                )
                .map_err(rejected)?;
            let sig = close_tx.sign(&merchant.sk_m).map_err(rejected)?;
            sigs.push(MaskedSignature::mask(&sig, mask));
        }

        let pay_token =
            PayToken::compute(&merchant.hmac_key, &customer.new_state);
        debug!(
            "masked outputs computed for payment session {}",
            merchant.session_id
        );
        Ok(MaskingOutcome {
            customer: MaskedOutputs {
                escrow_sig: sigs[0],
                merch_sig: sigs[1],
                pay_token: MaskedPayToken::mask(pay_token, merchant.pt_mask),
            },
            merchant_confirmed: true,
        })
    }
}

/// Client invoking payment token service with a bounded timeout.
///
/// Each call runs on a dedicated worker thread; if the service does not
/// answer in time the call fails with [`ServiceError::Timeout`] and the late
/// result is discarded.
#[derive(Debug)]
pub struct TokenServiceClient<S>
where
    S: PaymentTokenService + 'static,
{
    service: Arc<S>,
    timeout: Duration,
}

impl<S> Clone for TokenServiceClient<S>
where
    S: PaymentTokenService + 'static,
{
    fn clone(&self) -> Self {
        TokenServiceClient {
            service: self.service.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S> TokenServiceClient<S>
where
    S: PaymentTokenService + 'static,
{
    pub fn new(service: S) -> Self {
        Self::with_timeout(service, DEFAULT_SERVICE_TIMEOUT)
    }

    pub fn with_timeout(service: S, timeout: Duration) -> Self {
        TokenServiceClient {
            service: Arc::new(service),
            timeout,
        }
    }

    #[inline]
    pub fn timeout(&self) -> Duration { self.timeout }

    pub fn compute_masks(
        &self,
        request: MaskingRequest,
    ) -> Result<MaskingOutcome, ServiceError> {
        let (sender, receiver) = mpsc::channel();
        let service = self.service.clone();
        thread::Builder::new()
            .name(s!("zkchannels-masking"))
            .spawn(move || {
                // receiver is gone after timeout
                let _ = sender.send(service.compute_masks(request));
            })
            .map_err(|err| ServiceError::Unavailable(err.to_string()))?;

        match receiver.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "payment token service timed out after {:?}",
                    self.timeout
                );
                Err(ServiceError::Timeout(self.timeout.as_millis() as u64))
            }
            Err(RecvTimeoutError::Disconnected) => Err(
                ServiceError::Unavailable(s!("service worker has terminated")),
            ),
        }
    }
}
