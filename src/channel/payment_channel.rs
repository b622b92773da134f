//! The channel ledger
//!
//! A [`PaymentChannel`] is an immutable snapshot of one channel state. Every
//! mutation returns a new snapshot with a strictly greater `state`; the old
//! one is never modified, so rolling back means keeping the old value.

use std::collections::BTreeMap;

use bitcoin::ScriptBuf;
use sha2::{Digest, Sha256};

use crate::btx::script::{build_update_script, UpdateScriptKeys};
use crate::channel::invoice::Invoice;
use crate::channel::witness::{PartyWitness, Role};
use crate::config::ChannelConfig;
use crate::errors::{ChannelError, Result};
use crate::types::{ChannelId, PaymentHash, Preimage, CHANNEL_DOMAIN_TAG};

/// One state of a two-party Eltoo channel
///
/// Invariant: `settled_refund_amount + settled_payment_amount + Σ offered ==
/// channel_amount`. Equality ignores signatures carried by the witnesses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentChannel {
    /// Monotonic state number
    pub state: u32,
    /// Total amount locked in the channel
    pub channel_amount: u64,
    /// Funder's commitments
    pub witness: PartyWitness,
    /// Counterparty's commitments
    pub other_witness: PartyWitness,
    /// Funder's settled balance
    pub settled_refund_amount: u64,
    /// Counterparty's settled balance
    pub settled_payment_amount: u64,
    /// Outstanding HTLCs keyed by payment hash
    pub offered_payments: BTreeMap<PaymentHash, Invoice>,
}

impl PaymentChannel {
    /// Opens a channel at state 0 with the whole amount refundable to the funder
    ///
    /// # Errors
    /// * `BtxError::KeyDerivation` - If the state-0 settle keys cannot be derived
    pub fn open(
        witness: &PartyWitness,
        other_witness: &PartyWitness,
        channel_amount: u64,
    ) -> Result<Self> {
        Ok(Self {
            state: 0,
            channel_amount,
            witness: witness.at_state(0)?,
            other_witness: other_witness.at_state(0)?,
            settled_refund_amount: channel_amount,
            settled_payment_amount: 0,
            offered_payments: BTreeMap::new(),
        })
    }

    /// Identifier derived from both update keys
    pub fn channel_id(&self) -> ChannelId {
        let mut hasher = Sha256::new();
        hasher.update(CHANNEL_DOMAIN_TAG);
        hasher.update(self.witness.update_pk.serialize());
        hasher.update(self.other_witness.update_pk.serialize());
        ChannelId(hasher.finalize().into())
    }

    /// Witness of `role`
    pub fn witness_for(&self, role: Role) -> &PartyWitness {
        match role {
            Role::Funder => &self.witness,
            Role::Counterparty => &self.other_witness,
        }
    }

    pub(crate) fn witness_for_mut(&mut self, role: Role) -> &mut PartyWitness {
        match role {
            Role::Funder => &mut self.witness,
            Role::Counterparty => &mut self.other_witness,
        }
    }

    /// Sum of outstanding HTLC amounts
    ///
    /// # Errors
    /// * `ChannelError::BalanceOverflow` - If the sum exceeds u64
    pub fn offered_total(&self) -> Result<u64> {
        self.offered_payments.values().try_fold(0u64, |total, invoice| {
            total.checked_add(invoice.amount).ok_or_else(|| ChannelError::BalanceOverflow.into())
        })
    }

    /// Checks the balance conservation invariant
    ///
    /// # Errors
    /// * `ChannelError::BalanceNotConserved` - If balances do not add up
    /// * `ChannelError::BalanceOverflow` - If the sum exceeds u64
    pub fn check_conservation(&self) -> Result<()> {
        let actual = self
            .settled_refund_amount
            .checked_add(self.settled_payment_amount)
            .and_then(|settled| settled.checked_add(self.offered_total().ok()?))
            .ok_or(ChannelError::BalanceOverflow)?;
        if actual != self.channel_amount {
            return Err(ChannelError::BalanceNotConserved {
                expected: self.channel_amount,
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Copy at `state + 1` with settle keys re-derived and signatures cleared
    fn next_state(&self) -> Result<Self> {
        let state = self.state.checked_add(1).ok_or(ChannelError::StateOverflow)?;
        Ok(Self {
            state,
            witness: self.witness.at_state(state)?,
            other_witness: self.other_witness.at_state(state)?,
            ..self.clone()
        })
    }

    /// Next state with `invoice` moved out of the funder's settled balance
    ///
    /// # Errors
    /// * `ChannelError::InvalidZeroPayment` - If the invoice amount is zero
    /// * `ChannelError::DuplicateInvoice` - If the payment hash is already offered
    /// * `ChannelError::InsufficientBalance` - If the funder cannot cover it
    /// * `ChannelError::StateOverflow` - If the state cannot advance
    pub fn with_offered_payment(&self, invoice: &Invoice) -> Result<Self> {
        if invoice.amount == 0 {
            return Err(ChannelError::InvalidZeroPayment.into());
        }
        if self.offered_payments.contains_key(&invoice.payment_hash) {
            return Err(ChannelError::DuplicateInvoice(invoice.payment_hash).into());
        }
        let refund = self.settled_refund_amount.checked_sub(invoice.amount).ok_or(
            ChannelError::InsufficientBalance {
                balance: self.settled_refund_amount,
                amount: invoice.amount,
            },
        )?;

        let mut next = self.next_state()?;
        next.settled_refund_amount = refund;
        next.offered_payments.insert(invoice.payment_hash, invoice.clone());
        next.check_conservation()?;
        Ok(next)
    }

    /// Next state with resolvable HTLCs folded into settled balances
    ///
    /// Expired HTLCs return to the funder; HTLCs whose preimage is in
    /// `secrets` are credited to the counterparty. Expiry takes precedence.
    ///
    /// # Errors
    /// * `ChannelError::BalanceOverflow` - If a balance exceeds u64
    /// * `ChannelError::StateOverflow` - If the state cannot advance
    pub fn with_resolved_payments(
        &self,
        secrets: &BTreeMap<PaymentHash, Preimage>,
        block_time: u32,
    ) -> Result<Self> {
        let mut next = self.next_state()?;
        let mut remaining = BTreeMap::new();
        for (hash, invoice) in &self.offered_payments {
            if invoice.is_expired(block_time) {
                next.settled_refund_amount = next
                    .settled_refund_amount
                    .checked_add(invoice.amount)
                    .ok_or(ChannelError::BalanceOverflow)?;
            } else if secrets.get(hash).is_some_and(|secret| secret.matches(hash)) {
                next.settled_payment_amount = next
                    .settled_payment_amount
                    .checked_add(invoice.amount)
                    .ok_or(ChannelError::BalanceOverflow)?;
            } else {
                remaining.insert(*hash, invoice.clone());
            }
        }
        next.offered_payments = remaining;
        next.check_conservation()?;
        Ok(next)
    }

    /// Secrets from `known` that [`Self::with_resolved_payments`] would use
    pub fn redeemable_secrets(
        &self,
        known: &BTreeMap<PaymentHash, Preimage>,
        block_time: u32,
    ) -> BTreeMap<PaymentHash, Preimage> {
        self.offered_payments
            .iter()
            .filter(|(_, invoice)| !invoice.is_expired(block_time))
            .filter_map(|(hash, _)| known.get(hash).map(|secret| (*hash, *secret)))
            .collect()
    }

    /// Update script guarding the Update output of this state
    ///
    /// # Errors
    /// * `ChannelError::StateOverflow` - If the state lock time exceeds u32
    pub fn update_script(&self, config: &ChannelConfig) -> Result<ScriptBuf> {
        let keys = UpdateScriptKeys {
            funder_update: self.witness.update_pk,
            other_update: self.other_witness.update_pk,
            funder_settle: self.witness.settle_pk,
            other_settle: self.other_witness.settle_pk,
        };
        Ok(build_update_script(&keys, config.dispute_window, config.state_lock_time(self.state)?))
    }
}
