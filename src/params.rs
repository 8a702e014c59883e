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

//! Channel configuration agreed by both parties during the channel setup.

use bitcoin::Network;
use tx::fees::DEFAULT_DUST_LIMIT;
use tx::TransactionFeeInfo;

/// Lowest dust limit accepted by the library: value of a P2WPKH output
/// below which bitcoin core refuses to relay transactions
pub const MIN_DUST_LIMIT: u64 = 294;

/// Default relative timelock of the close transactions, in blocks
pub const DEFAULT_SELF_DELAY: u16 = 1487;

/// Errors from channel parameter validation
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ParamsError {
    /// self-delay must be a non-zero number of blocks
    ZeroSelfDelay,

    /// dust limit of {dust_limit} sat is below the minimal relayable output
    /// value of {minimum} sat
    DustLimitTooLow { dust_limit: u64, minimum: u64 },

    /// minimal {side} balance of {balance} sat is below the dust limit of
    /// {dust_limit} sat
    MinBalanceBelowDust {
        side: &'static str,
        balance: u64,
        dust_limit: u64,
    },

    /// invalid fee configuration: {0}
    #[from]
    Fees(tx::Error),
}

/// Merchant policy for the payments with negative amount (refunds)
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "kebab-case")
)]
pub enum NegativePaymentPolicy {
    /// All negative payments are rejected
    #[display("reject")]
    Reject,

    /// Negative payments are accepted if provided with a non-empty
    /// justification
    #[display("check-justification")]
    CheckJustification,
}

impl Default for NegativePaymentPolicy {
    fn default() -> Self { NegativePaymentPolicy::Reject }
}

/// Immutable channel parameters
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ChannelParams {
    pub name: String,

    /// Relative timelock, in blocks, for the self-payout branches of the
    /// merch-close and to-customer outputs
    pub self_delay: u16,

    pub dust_limit: u64,

    pub network: Network,

    pub fees: TransactionFeeInfo,
}

impl Default for ChannelParams {
    fn default() -> Self {
        ChannelParams {
            name: s!("zkchannel"),
            self_delay: DEFAULT_SELF_DELAY,
            dust_limit: DEFAULT_DUST_LIMIT,
            network: Network::Regtest,
            fees: default!(),
        }
    }
}

impl ChannelParams {
    pub fn with(name: impl ToString, network: Network) -> ChannelParams {
        ChannelParams {
            name: name.to_string(),
            network,
            ..default!()
        }
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.self_delay == 0 {
            return Err(ParamsError::ZeroSelfDelay);
        }
        if self.dust_limit < MIN_DUST_LIMIT {
            return Err(ParamsError::DustLimitTooLow {
                dust_limit: self.dust_limit,
                minimum: MIN_DUST_LIMIT,
            });
        }
        for (side, balance) in [
            ("customer", self.fees.bal_min_cust),
            ("merchant", self.fees.bal_min_merch),
        ] {
            if balance < self.dust_limit {
                return Err(ParamsError::MinBalanceBelowDust {
                    side,
                    balance,
                    dust_limit: self.dust_limit,
                });
            }
        }
        self.fees.validate()?;
        Ok(())
    }

    /// Self-delay in big-endian byte order, as it is presented to the users
    #[inline]
    pub fn self_delay_be(&self) -> [u8; 2] { self.self_delay.to_be_bytes() }

    /// Minimal initial merchant balance: enough for the merch-close
    /// transaction to leave `bal_min_merch` to the merchant
    #[inline]
    pub fn min_merch_funding(&self) -> u64 {
        self.fees.bal_min_merch + self.fees.merch_close_deduction()
    }
}
