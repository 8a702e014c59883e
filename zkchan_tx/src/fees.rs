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

//! Fee and minimum-balance configuration shared by all channel transactions.

use crate::{Error, TxKind};

/// Dust limit applied when channel parameters do not specify one
pub const DEFAULT_DUST_LIMIT: u64 = 546;

/// Fee configuration applied to every channel transaction.
///
/// The structure is a part of channel parameters and must be agreed by both
/// parties before the escrow transaction is formed: merchant-close and
/// customer-close transactions are pre-signed using these values.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct TransactionFeeInfo {
    /// Minimum customer balance which must remain in the channel
    pub bal_min_cust: u64,

    /// Minimum merchant balance which must remain in the channel
    pub bal_min_merch: u64,

    /// Value of child-pays-for-parent anchor outputs
    pub val_cpfp: u64,

    /// Fee paid by customer-close transactions
    pub fee_cc: u64,

    /// Fee paid by merchant-close transaction
    pub fee_mc: u64,

    pub min_fee: u64,

    pub max_fee: u64,
}

impl Default for TransactionFeeInfo {
    fn default() -> Self {
        TransactionFeeInfo {
            // Five times the dust limit, so close outputs always remain
            // spendable by a claim paying a minimal fee
            bal_min_cust: 5 * DEFAULT_DUST_LIMIT,
            bal_min_merch: 5 * DEFAULT_DUST_LIMIT,
            val_cpfp: 1000,
            fee_cc: 1000,
            fee_mc: 1000,
            min_fee: 0,
            max_fee: 10_000,
        }
    }
}

impl TransactionFeeInfo {
    /// Checks internal consistency of the fee configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_fee > self.max_fee {
            return Err(Error::InvalidFeeBounds {
                min: self.min_fee,
                max: self.max_fee,
            });
        }
        self.check_fee(TxKind::CustCloseFromEscrow, self.fee_cc)?;
        self.check_fee(TxKind::MerchClose, self.fee_mc)?;
        Ok(())
    }

    /// Verifies that the fee paid by a transaction of the given kind lies
    /// within `[min_fee, max_fee]`
    pub fn check_fee(&self, kind: TxKind, fee: u64) -> Result<u64, Error> {
        if fee < self.min_fee || fee > self.max_fee {
            warn!(
                "{} fee {} sat is out of [{}, {}] bounds",
                kind, fee, self.min_fee, self.max_fee
            );
            return Err(Error::FeeOutOfBounds {
                kind,
                fee,
                min: self.min_fee,
                max: self.max_fee,
            });
        }
        Ok(fee)
    }

    /// Value which merchant-close transaction subtracts from the escrow
    /// amount
    #[inline]
    pub fn merch_close_deduction(&self) -> u64 {
        self.fee_mc + self.val_cpfp
    }

    /// Value which customer-close transactions subtract from the customer
    /// balance
    #[inline]
    pub fn cust_close_deduction(&self) -> u64 {
        self.fee_cc + self.val_cpfp
    }
}
