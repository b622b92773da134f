//! Published key commitments and signatures of one channel party

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::secp256k1::{PublicKey, Secp256k1};

use crate::btx::sighash::ChannelSignature;
use crate::errors::{BtxError, Result};

/// Which side of the channel a party is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The party that funded the channel and holds the refund balance
    Funder,
    /// The party receiving payments
    Counterparty,
}

impl Role {
    /// The other side of the channel
    pub fn other(self) -> Self {
        match self {
            Role::Funder => Role::Counterparty,
            Role::Counterparty => Role::Funder,
        }
    }
}

/// Public commitments of one party plus the signatures it produced
///
/// Equality compares commitments only; signatures are ignored.
#[derive(Debug, Clone, Eq)]
pub struct PartyWitness {
    /// Update public key
    pub update_pk: PublicKey,
    /// Extended public key for per-state settle keys
    pub settle_xpub: Xpub,
    /// Settle public key of the current state
    pub settle_pk: PublicKey,
    /// Payment public key
    pub payment_pk: PublicKey,
    /// Signature over the Update transaction
    pub update_sig: Option<ChannelSignature>,
    /// Signature over the Settle transaction
    pub settle_sig: Option<ChannelSignature>,
}

impl PartialEq for PartyWitness {
    fn eq(&self, other: &Self) -> bool {
        self.update_pk == other.update_pk
            && self.settle_xpub == other.settle_xpub
            && self.settle_pk == other.settle_pk
            && self.payment_pk == other.payment_pk
    }
}

impl PartyWitness {
    /// Creates an unsigned witness
    pub fn new(
        update_pk: PublicKey,
        settle_xpub: Xpub,
        settle_pk: PublicKey,
        payment_pk: PublicKey,
    ) -> Self {
        Self { update_pk, settle_xpub, settle_pk, payment_pk, update_sig: None, settle_sig: None }
    }

    /// The same commitments re-targeted at `state`, with signatures cleared
    ///
    /// # Errors
    /// * `BtxError::KeyDerivation` - If `state` is not a valid non-hardened index
    pub fn at_state(&self, state: u32) -> Result<Self> {
        let secp = Secp256k1::verification_only();
        let child = ChildNumber::from_normal_idx(state)
            .map_err(|e| BtxError::KeyDerivation(e.to_string()))?;
        let derived = self
            .settle_xpub
            .derive_pub(&secp, &[child])
            .map_err(|e| BtxError::KeyDerivation(e.to_string()))?;
        Ok(Self::new(self.update_pk, self.settle_xpub, derived.public_key, self.payment_pk))
    }

    /// Returns true if `settle_pk` is the key the xpub derives for `state`
    pub fn settle_key_matches(&self, state: u32) -> bool {
        self.at_state(state).map(|w| w.settle_pk == self.settle_pk).unwrap_or(false)
    }

    /// Copy without signatures
    pub fn without_signatures(&self) -> Self {
        Self::new(self.update_pk, self.settle_xpub, self.settle_pk, self.payment_pk)
    }
}
