//! Error types for the Eltoo channel engine
//!
//! This module defines all error types used throughout the library.
//! Every failure narrows to "this channel operation did not complete";
//! none of them leave a channel in a partially updated state.

use bitcoin::OutPoint;
use thiserror::Error;

use crate::types::{PaymentHash, PeerId};

/// The main error type for the Eltoo channel engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Channel ledger and transaction construction errors
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Protocol, verification and invariant errors raised by the node
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Bitcoin script, key and signature hash errors
    #[error(transparent)]
    Btx(#[from] BtxError),

    /// Transaction rejected by the chain adapter
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

/// Errors raised while mutating a channel snapshot or building its transactions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelError {
    /// Payments of zero satoshis cannot be offered
    #[error("Payment amount cannot be zero")]
    InvalidZeroPayment,

    /// The funder's settled balance cannot cover the offered payment
    #[error("Insufficient balance: {balance} < {amount}")]
    InsufficientBalance {
        /// Settled balance available
        balance: u64,
        /// Amount requested
        amount: u64,
    },

    /// Balance arithmetic would exceed u64
    #[error("Balance overflow: would exceed maximum value")]
    BalanceOverflow,

    /// State counter cannot be incremented further
    #[error("State overflow: cannot increment further")]
    StateOverflow,

    /// Settled and offered balances do not add up to the channel amount
    #[error("Balance not conserved: expected {expected}, got {actual}")]
    BalanceNotConserved {
        /// The channel amount
        expected: u64,
        /// Sum of settled and offered balances
        actual: u64,
    },

    /// An invoice with the same payment hash is already offered
    #[error("Invoice already offered: {0}")]
    DuplicateInvoice(PaymentHash),

    /// The referenced invoice is not offered in this channel
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(PaymentHash),

    /// Redeem payout would not exceed the fee
    #[error("Redeem amount {amount} does not exceed fee {fee}")]
    RedeemBelowFee {
        /// Redeemable amount after the fee is deducted
        amount: u64,
        /// The fixed fee
        fee: u64,
    },

    /// Both balances together cannot pay the cooperative close fee
    #[error("Close amount {amount} is below fee {fee}")]
    CloseBelowFee {
        /// Sum of both balances
        amount: u64,
        /// The fixed fee
        fee: u64,
    },
}

/// Errors raised by the channel protocol state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A signature does not validate against the expected script and digest
    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    /// A required signature is absent
    #[error("Missing signature: {0}")]
    MissingSignature(String),

    /// A proposal does not advance the channel state
    #[error("State not increasing: current {current}, proposed {proposed}")]
    StateNotIncreasing {
        /// Current state
        current: u32,
        /// Proposed state
        proposed: u32,
    },

    /// A proposal reduces the counterparty's settled balance
    #[error("Payment balance decreased: current {current}, proposed {proposed}")]
    PaymentBalanceDecreased {
        /// Current settled payment amount
        current: u64,
        /// Proposed settled payment amount
        proposed: u64,
    },

    /// A payment proposal does not increase the offered total
    #[error("Offered total not increasing: current {current}, proposed {proposed}")]
    OfferedTotalNotIncreasing {
        /// Current offered total
        current: u64,
        /// Proposed offered total
        proposed: u64,
    },

    /// The proposed snapshot differs from the locally reconstructed one
    #[error("Proposal mismatch: {0}")]
    ProposalMismatch(String),

    /// A revealed secret does not hash to its payment hash
    #[error("Invalid secret for payment hash {0}")]
    InvalidSecret(PaymentHash),

    /// Published key commitments are inconsistent
    #[error("Commitment mismatch: {0}")]
    CommitmentMismatch(String),

    /// No channel with this peer
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// A channel with this peer already exists
    #[error("Channel with {0} already exists")]
    ChannelExists(PeerId),

    /// A proposal is already awaiting the counterparty
    #[error("Proposal already in flight with {0}")]
    ProposalInFlight(PeerId),

    /// No proposal is awaiting confirmation
    #[error("No pending proposal with {0}")]
    NoPendingProposal(PeerId),

    /// Operation reserved for the channel funder
    #[error("Not the funder of the channel with {0}")]
    NotChannelFunder(PeerId),

    /// Operation reserved for the channel counterparty
    #[error("Not the counterparty of the channel with {0}")]
    NotChannelCounterparty(PeerId),

    /// The channel is closing or closed
    #[error("Channel with {0} is closed")]
    ChannelClosed(PeerId),
}

/// Errors that can occur during Bitcoin script and signature operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BtxError {
    /// Signature hash computation failed
    #[error("Sighash computation failed: {0}")]
    Sighash(String),

    /// Input index outside the transaction
    #[error("Input index {index} out of range for {inputs} inputs")]
    InputIndexOutOfRange {
        /// Requested input index
        index: usize,
        /// Number of inputs
        inputs: usize,
    },

    /// Signature bytes cannot be parsed
    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    /// Unknown signing mode flag byte
    #[error("Invalid signing mode flag: {0:#04x}")]
    InvalidSigningMode(u8),

    /// BIP-32 derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// The scriptPubkey has an unexpected form
    #[error("Invalid scriptPubkey: {0}")]
    InvalidScriptPubkey(String),

    /// A taproot tree could not be built or has no such leaf
    #[error("Taproot construction failed: {0}")]
    Taproot(String),
}

/// Typed rejection reasons reported by a chain adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BroadcastError {
    /// The absolute lock time has not been reached
    #[error("non-final: lock time not reached")]
    NonFinal,

    /// A relative lock time has not elapsed
    #[error("non-BIP68-final: relative lock time not elapsed")]
    NonBip68Final,

    /// Script evaluation failed for an input
    #[error("script verification failed on input {input}: {reason}")]
    ScriptVerifyFailed {
        /// Input index
        input: usize,
        /// Failure description
        reason: String,
    },

    /// A spent output does not exist or is already spent
    #[error("missing inputs: {0}")]
    MissingInputs(OutPoint),

    /// Another unconfirmed transaction already spends this output
    #[error("mempool conflict on {0}")]
    Conflict(OutPoint),

    /// Outputs exceed inputs
    #[error("insufficient input value")]
    InsufficientInputValue,

    /// Any other rejection
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Result type alias for the Eltoo channel engine
pub type Result<T> = std::result::Result<T, Error>;
