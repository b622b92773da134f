//! Bitcoin time lock utilities
//!
//! Relative (BIP-68 / CSV) locks guard the dispute window between an Update
//! confirming and its Settle becoming valid. Absolute (CLTV) locks order
//! states and expire HTLCs.

use bitcoin::Sequence;

/// Sequence of inputs that must enforce the transaction lock time
pub const LOCKTIME_SEQUENCE: Sequence = Sequence::ENABLE_LOCKTIME_NO_RBF;

/// Compute the sequence for a relative time lock in blocks
///
/// # Arguments
/// * `blocks` - Number of blocks that must pass after the spent output confirms
///
/// # Returns
/// A BIP-68 height-based Sequence
///
/// # Examples
///
/// ```rust
/// use eltoo_channel::btx::timelock::compute_sequence_for_blocks;
///
/// let sequence = compute_sequence_for_blocks(20);
/// assert_eq!(sequence.to_consensus_u32(), 20);
/// ```
pub fn compute_sequence_for_blocks(blocks: u16) -> Sequence {
    Sequence::from_height(blocks)
}

/// Validate that a relative time lock is satisfied
///
/// # Arguments
/// * `sequence` - The sequence number from the transaction input
/// * `spend_height` - Height of the block that would include the spend
/// * `confirmation_height` - Height at which the spent output confirmed
///
/// # Returns
/// * `true` - The lock is satisfied or disabled
/// * `false` - Not enough blocks have passed
///
/// # Examples
///
/// ```rust
/// use eltoo_channel::btx::timelock::{compute_sequence_for_blocks, validate_csv_timelock};
///
/// let sequence = compute_sequence_for_blocks(20);
/// assert!(validate_csv_timelock(sequence, 1020, 1000));
/// assert!(!validate_csv_timelock(sequence, 1019, 1000));
/// ```
pub fn validate_csv_timelock(
    sequence: Sequence,
    spend_height: u32,
    confirmation_height: u32,
) -> bool {
    match extract_csv_blocks(sequence) {
        Some(blocks) => spend_height.saturating_sub(confirmation_height) >= u32::from(blocks),
        None => true,
    }
}

/// Extract the block count from a sequence number
///
/// # Returns
/// * `Some(blocks)` - If the sequence encodes a height-based relative lock
/// * `None` - If relative locks are disabled or time-based
pub fn extract_csv_blocks(sequence: Sequence) -> Option<u16> {
    if !sequence.is_relative_lock_time() || sequence.is_time_locked() {
        return None;
    }
    Some((sequence.to_consensus_u32() & 0x0000_FFFF) as u16)
}

/// Whether an HTLC with `expiry` can be refunded at `block_time`
pub fn htlc_expired(expiry: u32, block_time: u32) -> bool {
    block_time >= expiry
}
