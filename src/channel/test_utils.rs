//! Shared test utilities for channel module tests
//!
//! This module provides common helper functions used across all channel module tests.

use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::Network;

use crate::btx::sighash::{ChannelSignature, SigningMode};
use crate::channel::keys::ChannelKeys;
use crate::channel::payment_channel::PaymentChannel;
use crate::config::ChannelConfig;
use crate::types::Preimage;

/// Configuration used by all unit tests
pub fn test_config() -> ChannelConfig {
    ChannelConfig::default()
}

/// Deterministic funder keys
pub fn funder_keys() -> ChannelKeys {
    ChannelKeys::from_seed(&[1u8; 32], Network::Regtest).expect("seed should derive keys")
}

/// Deterministic counterparty keys
pub fn counterparty_keys() -> ChannelKeys {
    ChannelKeys::from_seed(&[2u8; 32], Network::Regtest).expect("seed should derive keys")
}

/// Keys belonging to neither party
pub fn stranger_keys() -> ChannelKeys {
    ChannelKeys::from_seed(&[3u8; 32], Network::Regtest).expect("seed should derive keys")
}

/// State-0 channel between [`funder_keys`] and [`counterparty_keys`]
pub fn open_channel() -> PaymentChannel {
    let funder = funder_keys().witness(0).expect("witness");
    let counterparty = counterparty_keys().witness(0).expect("witness");
    PaymentChannel::open(&funder, &counterparty, test_config().channel_amount)
        .expect("open should succeed")
}

/// Deterministic preimage
pub fn preimage(byte: u8) -> Preimage {
    Preimage([byte; 32])
}

/// A syntactically valid signature over an unrelated message
pub fn dummy_signature() -> ChannelSignature {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[9u8; 32]).expect("32-byte array should be a valid key");
    ChannelSignature {
        signature: secp.sign_ecdsa(&Message::from_digest([7u8; 32]), &sk),
        mode: SigningMode::AnyPrevOutAnyScript,
    }
}
