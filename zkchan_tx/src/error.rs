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

/// Kinds of transactions produced by the template builder; used for logging
/// and in error reporting
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "kebab-case")
)]
pub enum TxKind {
    #[display("escrow")]
    Escrow,

    #[display("merch-close")]
    MerchClose,

    #[display("cust-close-from-escrow")]
    CustCloseFromEscrow,

    #[display("cust-close-from-merch-close")]
    CustCloseFromMerchClose,

    #[display("cust-claim")]
    CustClaim,

    #[display("merch-claim")]
    MerchClaim,

    #[display("merch-claim-to-merchant")]
    MerchClaimToMerchant,

    #[display("dispute")]
    Dispute,
}

/// Errors happening during transaction template construction and signing
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// {kind} transaction fee of {fee} sat is outside of the allowed bounds
    /// [{min}, {max}]
    FeeOutOfBounds {
        kind: TxKind,
        fee: u64,
        min: u64,
        max: u64,
    },

    /// fee bounds are inconsistent: minimum fee {min} exceeds maximum fee
    /// {max}
    InvalidFeeBounds { min: u64, max: u64 },

    /// {kind} transaction output of {value} sat is below the dust limit of
    /// {dust_limit} sat
    OutputBelowDust {
        kind: TxKind,
        value: u64,
        dust_limit: u64,
    },

    /// {kind} transaction can't be funded: {available} sat available while
    /// {required} sat is required
    InsufficientValue {
        kind: TxKind,
        available: u64,
        required: u64,
    },

    /// negative balance {0} sat can't be used as a transaction output value
    NegativeValue(i64),

    /// sighash computation for input #{0} has failed
    Sighash(usize),

    /// signature for the {0} transaction does not match its sighash and the
    /// provided public key
    InvalidSignature(TxKind),

    /// malformed signature or key data
    #[from]
    Secp(secp256k1::Error),

    /// transaction does not contain zkChannels revocation output
    NoRevocationOutput,

    /// revocation output has a wrong structure and can't be parsed
    MalformedRevocationOutput,
}
