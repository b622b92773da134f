//! Per-channel signing keys
//!
//! Each participant holds three independent keys per channel. Settle keys
//! are unique per state: they are derived from a BIP-32 extended key at the
//! non-hardened child index equal to the state number, so the counterparty
//! can derive the matching public key from the published extended public key.

use std::fmt;

use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::Network;

use crate::channel::witness::PartyWitness;
use crate::errors::{BtxError, Result};

/// Update, settle and payment keys of one participant in one channel
#[derive(Clone)]
pub struct ChannelKeys {
    update_key: SecretKey,
    settle_xpriv: Xpriv,
    payment_key: SecretKey,
}

impl ChannelKeys {
    /// Generates fresh keys from a random seed
    ///
    /// # Errors
    /// * `BtxError::KeyDerivation` - If BIP-32 derivation fails
    pub fn generate(network: Network) -> Result<Self> {
        let seed: [u8; 32] = rand::random();
        Self::from_seed(&seed, network)
    }

    /// Derives keys deterministically from `seed`
    ///
    /// Update, payment and settle keys use the hardened paths `m/0'`,
    /// `m/1'` and `m/2'`; per-state settle keys are `m/2'/state`.
    ///
    /// # Errors
    /// * `BtxError::KeyDerivation` - If the seed or a derivation step is invalid
    pub fn from_seed(seed: &[u8], network: Network) -> Result<Self> {
        let secp = Secp256k1::new();
        let master = Xpriv::new_master(network, seed).map_err(derivation_error)?;
        let derive = |index: u32| -> Result<Xpriv> {
            let child = ChildNumber::from_hardened_idx(index).map_err(derivation_error)?;
            master.derive_priv(&secp, &[child]).map_err(derivation_error)
        };
        Ok(Self {
            update_key: derive(0)?.private_key,
            payment_key: derive(1)?.private_key,
            settle_xpriv: derive(2)?,
        })
    }

    /// Key authorizing state supersession
    pub fn update_key(&self) -> &SecretKey {
        &self.update_key
    }

    /// Key spending settled balances
    pub fn payment_key(&self) -> &SecretKey {
        &self.payment_key
    }

    /// Settle key of `state`
    ///
    /// # Errors
    /// * `BtxError::KeyDerivation` - If `state` is not a valid non-hardened index
    pub fn settle_key(&self, state: u32) -> Result<SecretKey> {
        let secp = Secp256k1::new();
        let child = ChildNumber::from_normal_idx(state).map_err(derivation_error)?;
        let derived = self.settle_xpriv.derive_priv(&secp, &[child]).map_err(derivation_error)?;
        Ok(derived.private_key)
    }

    /// Extended public key from which all settle public keys derive
    pub fn settle_xpub(&self) -> Xpub {
        Xpub::from_priv(&Secp256k1::new(), &self.settle_xpriv)
    }

    /// Public commitments for `state`, without signatures
    ///
    /// # Errors
    /// * `BtxError::KeyDerivation` - If the settle key cannot be derived
    pub fn witness(&self, state: u32) -> Result<PartyWitness> {
        let secp = Secp256k1::new();
        let settle_key = self.settle_key(state)?;
        Ok(PartyWitness::new(
            PublicKey::from_secret_key(&secp, &self.update_key),
            self.settle_xpub(),
            PublicKey::from_secret_key(&secp, &settle_key),
            PublicKey::from_secret_key(&secp, &self.payment_key),
        ))
    }
}

impl fmt::Debug for ChannelKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelKeys").field("settle_xpub", &self.settle_xpub()).finish_non_exhaustive()
    }
}

fn derivation_error(error: bitcoin::bip32::Error) -> crate::errors::Error {
    BtxError::KeyDerivation(error.to_string()).into()
}
