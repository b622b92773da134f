//! Chain adapter interface
//!
//! The engine never talks to a node directly. Callers supply a
//! [`ChainAdapter`] that submits transactions and reports chain time;
//! confirmation depth is observed by the caller, not polled here.

use bitcoin::{Transaction, Txid};
use tracing::{info, warn};

use crate::errors::{BroadcastError, Result};

/// Minimal interface to an external Bitcoin node
pub trait ChainAdapter {
    /// Submits a fully signed transaction
    ///
    /// # Errors
    /// A typed [`BroadcastError`] describing why the node refused it.
    fn submit(&mut self, tx: &Transaction) -> std::result::Result<Txid, BroadcastError>;

    /// Height of the current chain tip
    fn current_height(&self) -> u32;

    /// Timestamp of the current chain tip
    fn current_time(&self) -> u32;
}

/// Submits `tx` through `chain`, logging the outcome
///
/// Rejections are returned to the caller unchanged; nothing is retried.
///
/// # Errors
/// * `Error::Broadcast` - If the adapter rejects the transaction
pub fn broadcast<C: ChainAdapter + ?Sized>(chain: &mut C, tx: &Transaction) -> Result<Txid> {
    let txid = tx.compute_txid();
    match chain.submit(tx) {
        Ok(accepted) => {
            info!(%txid, height = chain.current_height(), "transaction accepted");
            Ok(accepted)
        }
        Err(reason) => {
            warn!(%txid, %reason, "transaction rejected");
            Err(reason.into())
        }
    }
}
