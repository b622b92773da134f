//! Core type definitions
//!
//! Identifiers and hash types shared by the channel, script and node modules.

use std::fmt;

use bitcoin::hashes::{hash160, Hash};
use bitcoin::hex::DisplayHex;

// ============================================================================
// Fundamental Types
// ============================================================================

/// Type alias for 32-byte arrays used across cryptographic operations
pub type Bytes32 = [u8; 32];

// ============================================================================
// Channel Domain
// ============================================================================

/// Channel identifier, a domain-tagged hash of both update keys
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub Bytes32);

impl ChannelId {
    /// Leading four bytes in hex, for log fields
    pub fn short(&self) -> String {
        self.0[..4].to_lower_hex_string()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0[..].as_hex())
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({self})")
    }
}

/// Domain separation tag for channel identifiers
pub const CHANNEL_DOMAIN_TAG: &[u8] = b"ELTOO_CH_v0";

/// Opaque identifier of a channel partner
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

// ============================================================================
// Payment Domain
// ============================================================================

/// HASH160 of a payment preimage
pub type PaymentHash = hash160::Hash;

/// A 32-byte payment secret
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Preimage(pub Bytes32);

impl Preimage {
    /// Draws a fresh random preimage
    pub fn random() -> Self {
        Preimage(rand::random())
    }

    /// Computes the payment hash committed to by HTLC scripts
    pub fn payment_hash(&self) -> PaymentHash {
        hash160::Hash::hash(&self.0)
    }

    /// Returns true if this preimage unlocks `hash`
    pub fn matches(&self, hash: &PaymentHash) -> bool {
        self.payment_hash() == *hash
    }
}

impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage({})", self.payment_hash())
    }
}
