//! Channel protocol state machine
//!
//! An [`L2Node`] is one participant's runtime: its channels keyed by partner,
//! per-channel keys, known payment secrets and, per channel, the last
//! fully signed Update/Settle pair. Operations are split by lifecycle phase:
//!
//! - `open`: `propose_channel`, `join_channel`, `create_channel`
//! - `payment`: `propose_payment`, `receive_payment`, `confirm_payment`
//! - `update`: `propose_update`, `accept_update`, `confirm_update`
//! - `close`: `uncooperatively_close`, `propose_close`, `accept_close`,
//!   `confirm_close`
//!
//! Only one proposal may be in flight per channel. A proposal never touches
//! the authoritative snapshot; it is adopted only after both signatures
//! verify, so dropping it is a complete rollback.

mod close;
mod open;
mod payment;
mod update;

#[cfg(test)]
mod test_utils;

use std::collections::BTreeMap;

use crate::channel::invoice::Invoice;
use crate::channel::keys::ChannelKeys;
use crate::channel::payment_channel::PaymentChannel;
use crate::channel::tx::{CloseTx, SettleTx, UpdateTx};
use crate::channel::witness::Role;
use crate::config::ChannelConfig;
use crate::errors::{Error, ProtocolError, Result};
use crate::types::{PaymentHash, PeerId, Preimage};

/// Lifecycle of a channel as seen by one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Open with no proposal in flight
    Open,
    /// A proposal awaits the counterparty
    Updating,
    /// An uncooperative close has started
    Closing,
    /// The cooperative close transaction is fully signed
    Closed,
}

/// The Update and Settle transactions of one state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTransactions {
    /// Update transaction
    pub update: UpdateTx,
    /// Settle transaction
    pub settle: SettleTx,
}

impl ChannelTransactions {
    /// Snapshot both transactions commit to
    pub fn channel(&self) -> &PaymentChannel {
        self.update.channel()
    }
}

/// Payment proposal sent by the funder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProposal {
    /// Update signed by the funder
    pub update: UpdateTx,
    /// Settle signed by the funder
    pub settle: SettleTx,
}

/// Counter-signed payment returned by the counterparty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    /// Fully signed Update
    pub update: UpdateTx,
    /// Fully signed Settle
    pub settle: SettleTx,
    /// Preimage of the new payment, if the counterparty knows it
    pub secret: Option<Preimage>,
}

/// Rebalancing proposal sent by the counterparty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateProposal {
    /// Update signed by the counterparty
    pub update: UpdateTx,
    /// Settle signed by the counterparty
    pub settle: SettleTx,
    /// Secrets of the HTLCs being credited to the counterparty
    pub secrets: BTreeMap<PaymentHash, Preimage>,
}

struct ChannelEntry {
    keys: ChannelKeys,
    role: Role,
    status: ChannelStatus,
    setup: UpdateTx,
    complete: ChannelTransactions,
    pending: Option<ChannelTransactions>,
    proposed_close: Option<CloseTx>,
}

/// One participant's channel runtime
pub struct L2Node {
    id: PeerId,
    config: ChannelConfig,
    secrets: BTreeMap<PaymentHash, Preimage>,
    issued_invoices: BTreeMap<PaymentHash, Invoice>,
    proposed: BTreeMap<PeerId, ChannelKeys>,
    channels: BTreeMap<PeerId, ChannelEntry>,
}

impl L2Node {
    /// Creates a node with no channels
    pub fn new(id: PeerId, config: ChannelConfig) -> Self {
        Self {
            id,
            config,
            secrets: BTreeMap::new(),
            issued_invoices: BTreeMap::new(),
            proposed: BTreeMap::new(),
            channels: BTreeMap::new(),
        }
    }

    /// This node's identifier
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Channel parameters
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Issues an invoice locked to a fresh secret
    ///
    /// # Errors
    /// * `ChannelError::InvalidZeroPayment` - If `amount` is zero
    pub fn create_invoice(&mut self, id: u64, amount: u64, expiry: u32) -> Result<Invoice> {
        let secret = Preimage::random();
        let invoice = Invoice::for_preimage(id, &secret, amount, expiry)?;
        self.secrets.insert(invoice.payment_hash, secret);
        self.issued_invoices.insert(invoice.payment_hash, invoice.clone());
        tracing::debug!(node = %self.id, invoice = id, amount, expiry, "invoice created");
        Ok(invoice)
    }

    /// Records a secret learned out of band
    pub fn learn_secret(&mut self, secret: Preimage) {
        self.secrets.insert(secret.payment_hash(), secret);
    }

    /// Known preimage for `hash`
    pub fn secret(&self, hash: &PaymentHash) -> Option<&Preimage> {
        self.secrets.get(hash)
    }

    /// Invoice issued by this node for `hash`
    pub fn issued_invoice(&self, hash: &PaymentHash) -> Option<&Invoice> {
        self.issued_invoices.get(hash)
    }

    /// Latest fully verified snapshot of the channel with `partner`
    pub fn channel(&self, partner: PeerId) -> Result<&PaymentChannel> {
        Ok(self.entry(partner)?.complete.channel())
    }

    /// Latest fully verified Update and Settle with `partner`
    pub fn complete_transactions(&self, partner: PeerId) -> Result<&ChannelTransactions> {
        Ok(&self.entry(partner)?.complete)
    }

    /// Snapshot proposed to `partner` and not yet confirmed
    pub fn pending_channel(&self, partner: PeerId) -> Result<Option<&PaymentChannel>> {
        Ok(self.entry(partner)?.pending.as_ref().map(ChannelTransactions::channel))
    }

    /// The state-0 Update whose output funds the channel
    pub fn setup(&self, partner: PeerId) -> Result<&UpdateTx> {
        Ok(&self.entry(partner)?.setup)
    }

    /// Lifecycle status of the channel with `partner`
    pub fn status(&self, partner: PeerId) -> Result<ChannelStatus> {
        Ok(self.entry(partner)?.status)
    }

    /// Whether this node funded the channel with `partner`
    pub fn is_channel_funder(&self, partner: PeerId) -> Result<bool> {
        Ok(self.entry(partner)?.role == Role::Funder)
    }

    fn entry(&self, partner: PeerId) -> Result<&ChannelEntry> {
        self.channels.get(&partner).ok_or_else(|| ProtocolError::UnknownPeer(partner).into())
    }

    fn entry_mut(&mut self, partner: PeerId) -> Result<&mut ChannelEntry> {
        self.channels.get_mut(&partner).ok_or_else(|| ProtocolError::UnknownPeer(partner).into())
    }

    /// Resolves the in-flight proposal of `role` with `partner`'s response
    ///
    /// The proposal is consumed either way: it becomes the complete state if
    /// the response carries valid signatures for it and is dropped otherwise.
    fn finish_proposal(
        &mut self,
        partner: PeerId,
        role: Role,
        update: &UpdateTx,
        settle: &SettleTx,
    ) -> Result<()> {
        let node = self.id;
        let entry = self.entry_mut(partner)?;
        if entry.role != role {
            return Err(wrong_role(partner, role));
        }
        let pending = entry.pending.take().ok_or(ProtocolError::NoPendingProposal(partner))?;
        entry.status = ChannelStatus::Open;

        match complete_pending(&pending, update, settle, role) {
            Ok(signed) => {
                tracing::info!(
                    node = %node,
                    peer = %partner,
                    channel = %log_id(signed.channel()),
                    state = signed.channel().state,
                    "state confirmed"
                );
                entry.complete = signed;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    node = %node,
                    peer = %partner,
                    state = entry.complete.channel().state,
                    error = %e,
                    "proposal rejected, rolled back to last complete state"
                );
                Err(e)
            }
        }
    }

    /// Entry that can accept a new proposal in `role`
    fn idle_entry(&self, partner: PeerId, role: Role) -> Result<&ChannelEntry> {
        let entry = self.entry(partner)?;
        if entry.role != role {
            return Err(wrong_role(partner, role));
        }
        match entry.status {
            ChannelStatus::Open => Ok(entry),
            ChannelStatus::Updating => Err(ProtocolError::ProposalInFlight(partner).into()),
            ChannelStatus::Closing | ChannelStatus::Closed => {
                Err(ProtocolError::ChannelClosed(partner).into())
            }
        }
    }
}

fn wrong_role(partner: PeerId, role: Role) -> Error {
    match role {
        Role::Funder => ProtocolError::NotChannelFunder(partner),
        Role::Counterparty => ProtocolError::NotChannelCounterparty(partner),
    }
    .into()
}

/// Short channel identifier for log fields
fn log_id(channel: &PaymentChannel) -> String {
    channel.channel_id().short()
}

/// Adopts the other party's signatures on locally rebuilt transactions and
/// adds our own
fn countersign(
    expected: &PaymentChannel,
    update: &UpdateTx,
    settle: &SettleTx,
    keys: &ChannelKeys,
    role: Role,
    config: &ChannelConfig,
) -> Result<ChannelTransactions> {
    if update.channel() != expected || settle.channel() != expected {
        return Err(ProtocolError::ProposalMismatch(format!(
            "proposed state {} differs from reconstruction",
            update.state()
        ))
        .into());
    }
    let their = role.other();
    let update_sig = update
        .signature(their)
        .ok_or_else(|| ProtocolError::MissingSignature(format!("update of {their:?}")))?;
    let settle_sig = settle
        .signature(their)
        .ok_or_else(|| ProtocolError::MissingSignature(format!("settle of {their:?}")))?;

    let update = UpdateTx::new(expected, config)?.with_signature(their, *update_sig);
    update.verify_signature(their)?;
    let settle = SettleTx::new(expected, config)?.with_signature(their, *settle_sig);
    settle.verify_signature(their)?;

    let update = update.sign(keys, role)?;
    let settle = settle.sign(keys, role)?;
    update.verify()?;
    settle.verify()?;
    Ok(ChannelTransactions { update, settle })
}

/// Attaches the other party's signatures to our pending proposal
fn complete_pending(
    pending: &ChannelTransactions,
    update: &UpdateTx,
    settle: &SettleTx,
    role: Role,
) -> Result<ChannelTransactions> {
    if update.channel() != pending.channel() || settle.channel() != pending.channel() {
        return Err(ProtocolError::ProposalMismatch(format!(
            "response for state {} does not match pending state {}",
            update.state(),
            pending.channel().state
        ))
        .into());
    }
    let their = role.other();
    let update_sig = update
        .signature(their)
        .ok_or_else(|| ProtocolError::MissingSignature(format!("update of {their:?}")))?;
    let settle_sig = settle
        .signature(their)
        .ok_or_else(|| ProtocolError::MissingSignature(format!("settle of {their:?}")))?;

    let update = pending.update.with_signature(their, *update_sig);
    let settle = pending.settle.with_signature(their, *settle_sig);
    update.verify()?;
    settle.verify()?;
    Ok(ChannelTransactions { update, settle })
}
