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

//! zkChannels core: two-party off-chain bitcoin payment channels with
//! unlinkable payments and revocable channel states.
//!
//! The crate provides the customer and merchant protocol state machines
//! ([`CustomerState`], [`MerchantState`]), the revocation ledger used by the
//! merchant to punish broadcasts of stale states ([`RevocationLedger`]), the
//! interface to the blind payment token computation
//! ([`PaymentTokenService`]) and a driver running complete payment rounds
//! ([`PaymentRound`]). Transaction templates live in the [`zkchan_tx`] crate.

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    //missing_docs
)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate tracing;

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

pub extern crate zkchan_tx as tx;

/// Declares 32-byte newtype with hex display and parsing
macro_rules! slice32_wrapper {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(
            Wrapper,
            Copy,
            Clone,
            Ord,
            PartialOrd,
            Eq,
            PartialEq,
            Hash,
            Debug,
            Display,
            Default,
            From
        )]
        #[display(LowerHex)]
        #[wrapper(FromStr, LowerHex, UpperHex)]
        #[cfg_attr(
            feature = "serde",
            derive(Serialize, Deserialize),
            serde(crate = "serde_crate", transparent)
        )]
        pub struct $name(::amplify::Slice32);

        impl $name {
            #[inline]
            pub fn from_bytes(bytes: [u8; 32]) -> $name {
                <$name as ::amplify::Wrapper>::from_inner(
                    <::amplify::Slice32 as ::amplify::Wrapper>::from_inner(
                        bytes,
                    ),
                )
            }

            #[inline]
            pub fn to_bytes(&self) -> [u8; 32] {
                <::amplify::Slice32 as ::amplify::Wrapper>::to_inner(
                    <$name as ::amplify::Wrapper>::as_inner(self),
                )
            }
        }
    };
}

#[cfg(test)]
macro_rules! pk {
    ($sk:expr) => {
        secp256k1::PublicKey::from_secret_key(secp256k1::SECP256K1, &$sk)
    };
}

pub mod customer;
mod error;
pub mod ledger;
pub mod masking;
pub mod merchant;
pub mod messages;
pub mod params;
pub mod revocation;
pub mod round;
pub mod service;
pub mod state;
pub mod token;

pub use customer::{CustomerState, FundingSource};
pub use error::{Error, ErrorKind};
pub use ledger::{
    LedgerError, MemoryLedger, RevocationLedger, SqliteLedger,
};
pub use merchant::MerchantState;
pub use messages::{
    CloseSignatures, InitCustState, MaskedTxInputs, MerchCloseRequest,
    PayTokenMaskOpening, PaymentRequest, PaymentResponse,
};
pub use params::{ChannelParams, NegativePaymentPolicy, ParamsError};
pub use revocation::{RevLockCom, RevSecret, RevokedState};
pub use round::{PaymentReceipt, PaymentRound};
pub use service::{
    LocalTokenService, PaymentTokenService, ServiceError, TokenServiceClient,
};
pub use state::{ChannelStatus, Lifecycle, Nonce, PaymentStatus, State};
pub use token::{ChannelId, ChannelToken, FundingTxInfo, MerchantPublicKeys};
pub use tx::{RevLock, TransactionFeeInfo};

use rand::{CryptoRng, RngCore};
use secp256k1::{PublicKey, SecretKey, SECP256K1};

pub(crate) fn random_bytes<R, const LEN: usize>(rng: &mut R) -> [u8; LEN]
where
    R: RngCore + CryptoRng,
{
    let mut bytes = [0u8; LEN];
    rng.fill_bytes(&mut bytes);
    bytes
}

pub(crate) fn keypair<R>(rng: &mut R) -> Result<(SecretKey, PublicKey), Error>
where
    R: RngCore + CryptoRng,
{
    let sk = SecretKey::from_slice(&random_bytes::<R, 32>(rng))
        .map_err(Error::KeyGeneration)?;
    Ok((sk, PublicKey::from_secret_key(SECP256K1, &sk)))
}
