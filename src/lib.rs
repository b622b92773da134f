#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Eltoo Channel
//!
//! A Rust library for two-party Eltoo payment channels on Bitcoin.
//!
//! Channel states are replaced rather than revoked: any later Update can
//! spend the output of any earlier one, so only the latest Settle can ever
//! pay out. Payments are forwarded as hash-time-locked outputs.

// Bitcoin transaction primitives: sighashes, scripts, timelocks and the chain boundary
pub mod btx;

// Channel ledger and transaction builders
pub mod channel;

// Channel parameters
pub mod config;

// Error types
pub mod errors;

// Per-participant protocol state machine
pub mod node;

// Shared identifiers and payment primitives
pub mod types;

// Re-export commonly used types and functions
pub use btx::{
    broadcast, ChainAdapter, ChannelSignature, SigningMode, TaprootHtlc, TaprootState,
    TapscriptSignature,
};
pub use channel::{
    ChannelKeys, CloseTx, Invoice, PartyWitness, PaymentChannel, RedeemOptions, RedeemTx, Role,
    SettleTx, UpdateTx,
};
pub use config::ChannelConfig;
pub use errors::{BroadcastError, Error, Result};
pub use node::{ChannelStatus, L2Node, PaymentProposal, PaymentReceipt, UpdateProposal};
pub use types::{ChannelId, PaymentHash, PeerId, Preimage};
