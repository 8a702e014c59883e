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

use bitcoin::Txid;
use tx::TxKind;

use crate::ledger::LedgerError;
use crate::params::ParamsError;
use crate::service::ServiceError;
use crate::state::{ChannelStatus, Lifecycle, Nonce, PaymentStatus, SessionId};

/// Class of a protocol error defining how the caller should react to it
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum ErrorKind {
    /// Request rejected synchronously without side effects
    #[display("validation")]
    Validation,

    /// Counterparty violated the protocol; current round is aborted and no
    /// mask or token is released
    #[display("protocol-violation")]
    ProtocolViolation,

    /// Payment token service failure; no state was committed and the round
    /// can be retried
    #[display("external")]
    External,

    /// Revocation ledger failure; masks are withheld and the revocation can
    /// be retried
    #[display("ledger")]
    Ledger,
}

#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// unable to generate channel keys: {0}
    KeyGeneration(secp256k1::Error),

    /// channel balance of {balance} sat is invalid: it must be at least
    /// {minimum} sat and the channel total must fit a bitcoin amount
    InvalidBalance { balance: i64, minimum: i64 },

    /// payment of {amount} sat can't be made from the balance of {balance}
    /// sat since at least {minimum} sat must remain in the channel
    InsufficientBalance {
        amount: i64,
        balance: i64,
        minimum: i64,
    },

    /// invalid channel parameters: {0}
    #[from]
    Params(ParamsError),

    /// transaction template error: {0}
    #[from]
    Tx(tx::Error),

    /// signature provided for the {0} transaction does not validate against
    /// its sighash
    SignatureVerification(TxKind),

    /// data does not match the channel token: wrong {0}
    ChannelTokenMismatch(&'static str),

    /// nonce {0} was already used
    NonceReused(Nonce),

    /// revealed revocation secret does not open the committed revocation
    /// lock
    InvalidRevocationProof,

    /// initial customer state does not match its announced hash
    InitialStateMismatch,

    /// pay token mask does not open the commitment provided by the merchant;
    /// the merchant can't be trusted and the channel must be closed
    PayTokenMaskMismatch,

    /// negative payment of {0} sat is not allowed by the merchant policy
    NegativePaymentRejected(i64),

    /// payment token service failure: {0}
    #[from]
    Service(ServiceError),

    /// revocation ledger failure: {0}
    #[from]
    Ledger(LedgerError),

    /// channel is in a state {current} incompatible with the requested
    /// operation
    LifecycleMismatch {
        current: Lifecycle,
        required: &'static [Lifecycle],
    },

    /// channel has status {current} while {required} is required for the
    /// operation
    ChannelStatusMismatch {
        current: ChannelStatus,
        required: ChannelStatus,
    },

    /// payment session has status {current} while {required} is required
    /// for the operation
    SessionStatusMismatch {
        current: PaymentStatus,
        required: PaymentStatus,
    },

    /// channel with escrow transaction {0} is not known
    UnknownChannel(Txid),

    /// payment session {0} is not known
    UnknownSession(SessionId),

    /// another payment round is already in progress for the channel
    RoundInProgress,

    /// there is no payment round in progress or it is at a different step
    NoPendingRound,

    /// previous state is already revoked; the payment round can't be
    /// aborted and must be completed
    RoundCommitted,

    /// channel has no valid pay token; payments are not possible
    MissingPayToken,

    /// the merchant has misbehaved earlier; the channel must be closed
    MerchantUntrusted,

    /// transaction is not a customer-close transaction of a zkChannel
    UnrecognizedCloseTx,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NonceReused(_)
            | Error::InvalidRevocationProof
            | Error::InitialStateMismatch
            | Error::PayTokenMaskMismatch => ErrorKind::ProtocolViolation,
            Error::Service(_) => ErrorKind::External,
            Error::Ledger(_) => ErrorKind::Ledger,
            _ => ErrorKind::Validation,
        }
    }

    /// Whether the failed operation may be retried without any state
    /// changes
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::External | ErrorKind::Ledger)
    }
}
