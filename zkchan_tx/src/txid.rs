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

use amplify::{Slice32, Wrapper};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{OutPoint, Txid};

/// Transaction identifier conversions between the consensus (little-endian)
/// byte order used inside transactions and the reversed (big-endian) order
/// used for display and by block explorers.
pub trait TxidBytes {
    /// Consensus (little-endian) byte representation
    fn to_le_bytes(&self) -> [u8; 32];

    /// Display (big-endian) byte representation
    fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = self.to_le_bytes();
        bytes.reverse();
        bytes
    }

    /// Constructs from the display (big-endian) byte representation
    fn from_be_bytes(bytes: [u8; 32]) -> Self;
}

impl TxidBytes for Txid {
    #[inline]
    fn to_le_bytes(&self) -> [u8; 32] { self.into_inner() }

    fn from_be_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Txid::from_inner(bytes)
    }
}

/// Hash identifying a transaction output being spent by the channel:
/// `SHA256d(txid_le || vout_le)`.
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
pub struct Prevout(Slice32);

impl Prevout {
    pub fn with(outpoint: OutPoint) -> Prevout {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&outpoint.txid.to_le_bytes());
        data.extend_from_slice(&outpoint.vout.to_le_bytes());
        Prevout::from_inner(Slice32::from_inner(
            sha256d::Hash::hash(&data).into_inner(),
        ))
    }

    #[inline]
    pub fn to_bytes(&self) -> [u8; 32] { self.to_inner().to_inner() }
}
