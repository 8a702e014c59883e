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

//! Masks hiding merchant signatures and pay tokens until the customer
//! revokes its previous state.
//!
//! ECDSA signatures are masked by XOR-ing their `s` component with a random
//! 32-byte mask; the `r` component stays in the clear, so the masked value
//! is useless without the mask. Pay tokens are masked the same way, and the
//! pay token mask is committed to before the masking takes place.

use bitcoin::hashes::{sha256, Hash, HashEngine};
use rand::{CryptoRng, RngCore};
use secp256k1::ecdsa::Signature;

use crate::random_bytes;
use crate::state::PayToken;

fn xor32(a: [u8; 32], b: [u8; 32]) -> [u8; 32] {
    let mut out = a;
    out.iter_mut().zip(b.iter()).for_each(|(x, y)| *x ^= y);
    out
}

slice32_wrapper!(
    /// Mask for the `s` component of a merchant signature
    SigMask
);

impl SigMask {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> SigMask {
        SigMask::from_bytes(random_bytes(rng))
    }
}

slice32_wrapper!(PayTokenMask);

impl PayTokenMask {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> PayTokenMask {
        PayTokenMask::from_bytes(random_bytes(rng))
    }
}

slice32_wrapper!(
    /// Commitment to the pay token mask: `SHA256(pt_mask || r)`
    PayMaskCom
);

impl PayMaskCom {
    pub fn with(pt_mask: PayTokenMask, r: PayMaskRandomness) -> PayMaskCom {
        let mut engine = sha256::Hash::engine();
        engine.input(&pt_mask.to_bytes());
        engine.input(&r.0);
        PayMaskCom::from_bytes(sha256::Hash::from_engine(engine).into_inner())
    }
}

/// Randomness of the pay mask commitment
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct PayMaskRandomness([u8; 16]);

impl PayMaskRandomness {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> PayMaskRandomness {
        PayMaskRandomness(random_bytes(rng))
    }
}

/// Merchant signature with masked `s` component
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct MaskedSignature {
    pub r: [u8; 32],
    pub masked_s: [u8; 32],
}

impl MaskedSignature {
    pub fn mask(signature: &Signature, mask: SigMask) -> MaskedSignature {
        let compact = signature.serialize_compact();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);
        MaskedSignature {
            r,
            masked_s: xor32(s, mask.to_bytes()),
        }
    }

    pub fn unmask(&self, mask: SigMask) -> Result<Signature, secp256k1::Error> {
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&xor32(self.masked_s, mask.to_bytes()));
        Signature::from_compact(&compact)
    }
}

slice32_wrapper!(MaskedPayToken);

impl MaskedPayToken {
    #[inline]
    pub fn mask(pay_token: PayToken, mask: PayTokenMask) -> MaskedPayToken {
        MaskedPayToken::from_bytes(xor32(pay_token.to_bytes(), mask.to_bytes()))
    }

    #[inline]
    pub fn unmask(&self, mask: PayTokenMask) -> PayToken {
        PayToken::from_bytes(xor32(self.to_bytes(), mask.to_bytes()))
    }
}

/// Masks for the merchant signatures on the customer-close transactions,
/// released by the merchant once the masking computation succeeds
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct TxMasks {
    /// Mask of the signature on the customer-close from escrow
    pub escrow_mask: SigMask,
    /// Mask of the signature on the customer-close from merch-close
    pub merch_mask: SigMask,
}

impl TxMasks {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> TxMasks {
        TxMasks {
            escrow_mask: SigMask::random(rng),
            merch_mask: SigMask::random(rng),
        }
    }
}

/// Masked outputs of the payment token service delivered to the customer
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct MaskedOutputs {
    pub escrow_sig: MaskedSignature,
    pub merch_sig: MaskedSignature,
    pub pay_token: MaskedPayToken,
}
