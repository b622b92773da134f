//! Channel configuration
//!
//! Protocol parameters shared by both parties of a channel. Both nodes must
//! use identical values or their independently built scripts and
//! transactions will not match.

use bitcoin::absolute::LockTime;
use bitcoin::Network;

use crate::errors::{ChannelError, Result};

/// Default channel capacity in satoshis
pub const DEFAULT_CHANNEL_AMOUNT: u64 = 1_000_000;

/// Default dispute window in blocks
pub const DEFAULT_DISPUTE_WINDOW: u16 = 20;

/// Outputs at or below this value are dropped from settlement transactions
pub const DEFAULT_DUST_LIMIT: u64 = 600;

/// Fixed fee deducted by redeem and close transactions
pub const DEFAULT_FEE_AMOUNT: u64 = 1_000;

/// Lock time of state 0; state N uses `cltv_start_time + N`
///
/// Values at or above 500,000,000 are interpreted as unix timestamps, so
/// state lock times are always satisfied on a live chain.
pub const DEFAULT_CLTV_START_TIME: u32 = 500_000_000;

/// Eltoo channel parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Network used for addresses and key derivation
    pub network: Network,
    /// Total amount locked in the channel
    pub channel_amount: u64,
    /// Relative delay in blocks before a Settle can spend its Update
    pub dispute_window: u16,
    /// Dust floor for settlement outputs
    pub dust_limit: u64,
    /// Fixed fee for redeem and close transactions
    pub fee_amount: u64,
    /// Base absolute lock time for state ordering
    pub cltv_start_time: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            channel_amount: DEFAULT_CHANNEL_AMOUNT,
            dispute_window: DEFAULT_DISPUTE_WINDOW,
            dust_limit: DEFAULT_DUST_LIMIT,
            fee_amount: DEFAULT_FEE_AMOUNT,
            cltv_start_time: DEFAULT_CLTV_START_TIME,
        }
    }
}

impl ChannelConfig {
    /// Sets the network
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Sets the channel amount
    pub fn with_channel_amount(mut self, channel_amount: u64) -> Self {
        self.channel_amount = channel_amount;
        self
    }

    /// Sets the dispute window in blocks
    pub fn with_dispute_window(mut self, blocks: u16) -> Self {
        self.dispute_window = blocks;
        self
    }

    /// Sets the dust limit
    pub fn with_dust_limit(mut self, dust_limit: u64) -> Self {
        self.dust_limit = dust_limit;
        self
    }

    /// Sets the fixed fee
    pub fn with_fee_amount(mut self, fee_amount: u64) -> Self {
        self.fee_amount = fee_amount;
        self
    }

    /// Returns true if `amount` is large enough to be paid out
    pub fn above_dust(&self, amount: u64) -> bool {
        amount > self.dust_limit
    }

    /// Absolute lock time committed to by the update branch of `state`
    ///
    /// # Errors
    /// * `ChannelError::StateOverflow` - If the lock time would exceed u32
    pub fn state_lock_time(&self, state: u32) -> Result<u32> {
        self.cltv_start_time.checked_add(state).ok_or_else(|| ChannelError::StateOverflow.into())
    }

    /// Lock time of the Update transaction for `state`
    pub fn update_lock_time(&self, state: u32) -> Result<LockTime> {
        Ok(LockTime::from_consensus(self.state_lock_time(state)?))
    }

    /// Lock time of the Settle and Close transactions for `state`
    pub fn settle_lock_time(&self, state: u32) -> Result<LockTime> {
        let lock_time = self
            .state_lock_time(state)?
            .checked_add(1)
            .ok_or(ChannelError::StateOverflow)?;
        Ok(LockTime::from_consensus(lock_time))
    }
}
