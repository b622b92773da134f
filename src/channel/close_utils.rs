//! Close output calculation utilities
//!
//! Fee arithmetic for the cooperative close. Both parties contribute to the
//! closing fee: the smaller balance pays up to half of it and the larger
//! balance pays the rest.

use crate::errors::{ChannelError, Result};

/// Split `fee` between both balances for a cooperative close
///
/// The smaller balance contributes `min(fee / 2, balance)`; the larger
/// balance covers the remainder. Ties are treated as the funder being the
/// smaller side.
///
/// # Arguments
/// * `funder_balance` - Funder's balance before fees, including unresolved HTLCs
/// * `counterparty_balance` - Counterparty's settled balance before fees
/// * `fee` - Closing fee
///
/// # Returns
/// * `Ok((funder_output, counterparty_output))` - Outputs after fee deduction
///
/// # Errors
/// * `ChannelError::BalanceOverflow` - If the balances overflow
/// * `ChannelError::CloseBelowFee` - If both balances together cannot pay the fee
pub fn split_close_fee(
    funder_balance: u64,
    counterparty_balance: u64,
    fee: u64,
) -> Result<(u64, u64)> {
    let total = funder_balance
        .checked_add(counterparty_balance)
        .ok_or(ChannelError::BalanceOverflow)?;
    let below_fee = ChannelError::CloseBelowFee { amount: total, fee };
    if total < fee {
        return Err(below_fee.into());
    }

    // With total >= fee the larger side can always cover the remainder.
    let half = fee / 2;
    let (funder_share, counterparty_share) = if funder_balance > counterparty_balance {
        let counterparty = half.min(counterparty_balance);
        (fee - counterparty, counterparty)
    } else {
        let funder = half.min(funder_balance);
        (funder, fee - funder)
    };

    let funder_output = funder_balance.checked_sub(funder_share).ok_or(below_fee.clone())?;
    let counterparty_output =
        counterparty_balance.checked_sub(counterparty_share).ok_or(below_fee)?;
    Ok((funder_output, counterparty_output))
}
