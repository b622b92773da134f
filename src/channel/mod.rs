//! Channel module for Eltoo payment channels
//!
//! This module provides the channel ledger and the transactions built from
//! it. A channel is funded by one party (the funder) who offers HTLC
//! payments to the other (the counterparty).
//!
//! # Structure
//!
//! - `keys`: per-channel signing keys with per-state settle key derivation
//! - `witness`: published key commitments and signatures
//! - `invoice`: hash-time-locked payments
//! - `payment_channel`: the immutable ledger snapshot
//! - `tx/`: Update, Settle, Redeem and Close transaction builders

/// Close output calculation utilities
pub mod close_utils;
/// Hash-time-locked invoices
pub mod invoice;
/// Per-channel signing keys
pub mod keys;
/// The channel ledger
pub mod payment_channel;
pub mod tx;
/// Party commitments and signatures
pub mod witness;

#[cfg(test)]
pub mod test_utils;

pub use close_utils::split_close_fee;
pub use invoice::Invoice;
pub use keys::ChannelKeys;
pub use payment_channel::PaymentChannel;
pub use tx::{
    CloseTx, RedeemOptions, RedeemParams, RedeemTx, SettleOutput, SettleOutputKind, SettleTx,
    UpdateTx,
};
pub use witness::{PartyWitness, Role};
