//! Bitcoin transaction primitives
//!
//! Scripts, signing modes, time locks and the chain adapter interface.
//! Nothing in this module knows about channel balances.

/// Chain adapter interface
pub mod chain;
/// Signing modes and signature digests
pub mod sighash;
/// Covenant and HTLC scripts
pub mod script;
/// Taproot state and HTLC outputs
pub mod taproot;
/// Relative and absolute time locks
pub mod timelock;

pub use chain::{broadcast, ChainAdapter};
pub use sighash::{signature_hash, ChannelSignature, SigningMode};
pub use script::{build_htlc_script, build_update_script, ScriptType, UpdateScriptKeys};
pub use taproot::{TaprootHtlc, TaprootState, TapscriptSignature};
