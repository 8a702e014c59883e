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

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::{CryptoRng, RngCore};

use crate::customer::CustomerState;
use crate::masking::MaskedOutputs;
use crate::merchant::MerchantState;
use crate::messages::{MaskedTxInputs, PaymentRequest};
use crate::service::{MaskingRequest, PaymentTokenService, TokenServiceClient};
use crate::state::{Nonce, SessionId};
use crate::Error;

/// Result of a completed payment round
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct PaymentReceipt {
    pub session_id: SessionId,
    /// Nonce of the new channel state
    pub nonce: Nonce,
    pub cust_balance: i64,
    pub merch_balance: i64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Driver of a single payment round between a customer and a merchant
/// living in the same process.
///
/// The customer is locked for the whole round, serializing rounds on a
/// channel. The merchant is locked only for each of its steps, so rounds of
/// independent channels proceed in parallel, including their calls to the
/// payment token service.
pub struct PaymentRound<'round, S>
where
    S: PaymentTokenService + 'static,
{
    customer: &'round Mutex<CustomerState>,
    merchant: &'round Mutex<MerchantState>,
    client: &'round TokenServiceClient<S>,
}

impl<'round, S> PaymentRound<'round, S>
where
    S: PaymentTokenService + 'static,
{
    pub fn with(
        customer: &'round Mutex<CustomerState>,
        merchant: &'round Mutex<MerchantState>,
        client: &'round TokenServiceClient<S>,
    ) -> Self {
        PaymentRound {
            customer,
            merchant,
            client,
        }
    }

    /// Runs all payment phases. If the round fails before the previous
    /// state is revoked, both parties return to their state before the
    /// round and it may be retried.
    pub fn run<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        amount: i64,
        justification: Option<String>,
    ) -> Result<PaymentReceipt, Error> {
        let mut customer = lock(self.customer);
        let request = customer.prepare_payment(rng, amount, justification)?;
        let session_id = request.session_id;

        let (outputs, masks) = match self.mask(rng, &mut customer, &request) {
            Ok(masked) => masked,
            Err(err) => {
                warn!("payment session {} failed: {}", session_id, err);
                // session is unknown if it was rejected at preparation or
                // already dropped by the merchant
                match lock(self.merchant).fail_session(session_id) {
                    Ok(()) | Err(Error::UnknownSession(_)) => {}
                    Err(fail_err) => warn!(
                        "unable to fail payment session {}: {}",
                        session_id, fail_err
                    ),
                }
                customer.abort_payment()?;
                return Err(err);
            }
        };

        if let Err(err) = customer.unmask_close_signatures(&outputs, &masks) {
            customer.abort_payment()?;
            return Err(err);
        }
        let revoked = customer.revoke_previous_state()?;
        let opening =
            lock(self.merchant).validate_revoked_state(session_id, &revoked)?;
        customer.unmask_pay_token(&opening)?;

        let receipt = PaymentReceipt {
            session_id,
            nonce: customer.nonce(),
            cust_balance: customer.cust_balance(),
            merch_balance: customer.merch_balance(),
        };
        info!(
            "payment of {} sat in session {} is completed",
            amount, session_id
        );
        Ok(receipt)
    }

    fn mask<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        customer: &mut CustomerState,
        request: &PaymentRequest,
    ) -> Result<(MaskedOutputs, MaskedTxInputs), Error> {
        let session_id = request.session_id;
        let response = lock(self.merchant).prepare_payment(rng, request)?;
        let masking = MaskingRequest {
            customer: customer.masking_input(&response)?,
            merchant: lock(self.merchant).masking_input(session_id)?,
        };
        let outcome = self.client.compute_masks(masking)?;
        let masks = lock(self.merchant)
            .confirm_masking(session_id, outcome.merchant_confirmed)?;
        Ok((outcome.customer, masks))
    }

    /// Completes a round interrupted after the revocation of the previous
    /// state, for instance by a revocation ledger failure
    pub fn resume(&self) -> Result<PaymentReceipt, Error> {
        let mut customer = lock(self.customer);
        let session_id =
            customer.pending_session().ok_or(Error::NoPendingRound)?;
        let revoked = customer.revoke_previous_state()?;
        let opening =
            lock(self.merchant).validate_revoked_state(session_id, &revoked)?;
        customer.unmask_pay_token(&opening)?;
        Ok(PaymentReceipt {
            session_id,
            nonce: customer.nonce(),
            cust_balance: customer.cust_balance(),
            merch_balance: customer.merch_balance(),
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::merchant::test::{
        merchant, merchant_with, open_channel, FlakyLedger,
    };
    use crate::service::{LocalTokenService, MaskingOutcome, ServiceError};
    use crate::state::PaymentStatus;

    #[derive(Debug)]
    struct UnavailableService;

    impl PaymentTokenService for UnavailableService {
        fn compute_masks(
            &self,
            _: MaskingRequest,
        ) -> Result<MaskingOutcome, ServiceError> {
            Err(ServiceError::Unavailable(s!("connection refused")))
        }
    }

    #[derive(Debug)]
    struct SlowService;

    impl PaymentTokenService for SlowService {
        fn compute_masks(
            &self,
            request: MaskingRequest,
        ) -> Result<MaskingOutcome, ServiceError> {
            thread::sleep(Duration::from_millis(500));
            LocalTokenService.compute_masks(request)
        }
    }

    #[test]
    fn round_completes() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut merchant = merchant(&mut rng);
        let customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let nonce = customer.nonce();
        let (customer, merchant) = (Mutex::new(customer), Mutex::new(merchant));
        let client = TokenServiceClient::new(LocalTokenService);

        let round = PaymentRound::with(&customer, &merchant, &client);
        let receipt = round.run(&mut rng, 10, None).unwrap();
        assert_eq!(receipt.nonce, nonce.next());
        assert_eq!(receipt.cust_balance, 999_990);
        assert_eq!(receipt.merch_balance, 1_000_010);

        let merchant = merchant.lock().unwrap();
        assert!(merchant.is_nonce_spent(&nonce));
        assert_eq!(merchant.session_status(receipt.session_id), None);
        assert_eq!(merchant.nonce_status(&nonce), Some(PaymentStatus::Revoked));
        assert_eq!(merchant.live_sessions(), 0);
        assert!(!customer.lock().unwrap().has_pending_round());
    }

    #[test]
    fn service_failure_allows_retry() {
        let mut rng = StdRng::seed_from_u64(22);
        let mut merchant = merchant(&mut rng);
        let customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let nonce = customer.nonce();
        let (customer, merchant) = (Mutex::new(customer), Mutex::new(merchant));

        let failing = TokenServiceClient::new(UnavailableService);
        let err = PaymentRound::with(&customer, &merchant, &failing)
            .run(&mut rng, 10, None)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Service(ServiceError::Unavailable(_))
        ));
        assert!(err.is_recoverable());
        {
            let customer = customer.lock().unwrap();
            assert!(!customer.has_pending_round());
            assert_eq!(customer.cust_balance(), 1_000_000);
            assert_eq!(customer.nonce(), nonce);
            assert!(customer.is_merchant_trusted());
        }
        {
            let merchant = merchant.lock().unwrap();
            assert!(!merchant.is_nonce_spent(&nonce));
            assert_eq!(merchant.nonce_status(&nonce), None);
            assert_eq!(merchant.live_sessions(), 0);
        }

        let client = TokenServiceClient::new(LocalTokenService);
        let receipt = PaymentRound::with(&customer, &merchant, &client)
            .run(&mut rng, 10, None)
            .unwrap();
        assert_eq!(receipt.nonce, nonce.next());
        assert_eq!(receipt.cust_balance, 999_990);
    }

    #[test]
    fn rejected_payment_is_aborted() {
        let mut rng = StdRng::seed_from_u64(25);
        let mut merchant = merchant(&mut rng);
        let customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let nonce = customer.nonce();
        let (customer, merchant) = (Mutex::new(customer), Mutex::new(merchant));
        let client = TokenServiceClient::new(LocalTokenService);
        let round = PaymentRound::with(&customer, &merchant, &client);

        assert_eq!(
            round.run(&mut rng, -10, Some(s!("refund"))),
            Err(Error::NegativePaymentRejected(-10))
        );
        assert!(!customer.lock().unwrap().has_pending_round());
        assert_eq!(merchant.lock().unwrap().live_sessions(), 0);

        let receipt = round.run(&mut rng, 10, None).unwrap();
        assert_eq!(receipt.nonce, nonce.next());
    }

    #[test]
    fn service_timeout() {
        let mut rng = StdRng::seed_from_u64(23);
        let mut merchant = merchant(&mut rng);
        let customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let (customer, merchant) = (Mutex::new(customer), Mutex::new(merchant));

        let client = TokenServiceClient::with_timeout(
            SlowService,
            Duration::from_millis(20),
        );
        assert_eq!(
            PaymentRound::with(&customer, &merchant, &client)
                .run(&mut rng, 10, None),
            Err(Error::Service(ServiceError::Timeout(20)))
        );
        let customer = customer.lock().unwrap();
        assert!(!customer.has_pending_round());
        assert_eq!(customer.cust_balance(), 1_000_000);
    }

    #[test]
    fn resume_after_ledger_failure() {
        let mut rng = StdRng::seed_from_u64(24);
        let ledger = Arc::new(FlakyLedger::default());
        let mut merchant =
            merchant_with(&mut rng, default!(), ledger.clone());
        let customer =
            open_channel(&mut rng, &mut merchant, 1_000_000, 1_000_000);
        let nonce = customer.nonce();
        let (customer, merchant) = (Mutex::new(customer), Mutex::new(merchant));
        let client = TokenServiceClient::new(LocalTokenService);
        let round = PaymentRound::with(&customer, &merchant, &client);

        ledger.failing.store(true, Ordering::SeqCst);
        let err = round.run(&mut rng, 10, None).unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
        assert!(customer.lock().unwrap().has_pending_round());
        assert_eq!(customer.lock().unwrap().pay_token(), None);
        assert_eq!(
            customer.lock().unwrap().abort_payment(),
            Err(Error::RoundCommitted)
        );

        ledger.failing.store(false, Ordering::SeqCst);
        let receipt = round.resume().unwrap();
        assert_eq!(receipt.nonce, nonce.next());
        assert_eq!(receipt.cust_balance, 999_990);
        assert!(merchant.lock().unwrap().is_nonce_spent(&nonce));
        assert_eq!(round.resume(), Err(Error::NoPendingRound));
    }
}
