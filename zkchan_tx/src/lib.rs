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

//! Bitcoin transaction templates binding every zkChannels protocol phase to an
//! enforceable on-chain contract: escrow, merchant-close, customer-close,
//! claim and dispute transactions.
//!
//! All the constructors are stateless: they take typed inputs and return
//! [`SignableTx`] pre-images, which are signed with BIP-143 `SIGHASH_ALL`
//! ECDSA signatures and finalized into broadcast-ready [`ClosingTx`] values.

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

#[cfg(test)]
macro_rules! pk {
    ($sk:expr) => {
        secp256k1::PublicKey::from_secret_key(secp256k1::SECP256K1, &$sk)
    };
}

mod error;
pub mod fees;
pub mod scripts;
mod signable;
pub mod transactions;
mod txid;

pub use error::{Error, TxKind};
pub use fees::TransactionFeeInfo;
pub use scripts::{RevLock, ScriptGenerators};
pub use signable::{ClosingTx, SignableTx};
pub use transactions::{
    CloseBalances, CloseSource, ClosingKeys, FundingUtxo, EscrowTx,
};
pub use txid::{Prevout, TxidBytes};
