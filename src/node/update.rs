//! Rebalancing handshake
//!
//! The counterparty folds resolvable HTLCs into the settled balances
//! (`propose_update`), the funder checks the revealed secrets and
//! counter-signs (`accept_update`), and the counterparty adopts the result
//! (`confirm_update`). A failed confirmation leaves the counterparty on its
//! last complete state, from which it can still close uncooperatively.

use tracing::info;

use super::{countersign, log_id, ChannelStatus, ChannelTransactions, L2Node, UpdateProposal};
use crate::channel::tx::{SettleTx, UpdateTx};
use crate::channel::witness::Role;
use crate::errors::{ProtocolError, Result};
use crate::types::PeerId;

impl L2Node {
    /// Proposes a state with expired and redeemable HTLCs resolved
    ///
    /// # Arguments
    /// * `partner` - The funder
    /// * `block_time` - Chain time used to decide HTLC expiry
    ///
    /// # Errors
    /// * `ProtocolError::NotChannelCounterparty` - If this node funded the channel
    /// * `ProtocolError::ProposalInFlight` - If a proposal awaits confirmation
    pub fn propose_update(&mut self, partner: PeerId, block_time: u32) -> Result<UpdateProposal> {
        let entry = self.idle_entry(partner, Role::Counterparty)?;
        let current = entry.complete.channel();
        let secrets = current.redeemable_secrets(&self.secrets, block_time);
        let next = current.with_resolved_payments(&secrets, block_time)?;
        let update = UpdateTx::new(&next, &self.config)?.sign(&entry.keys, Role::Counterparty)?;
        let settle = SettleTx::new(&next, &self.config)?.sign(&entry.keys, Role::Counterparty)?;

        info!(
            node = %self.id,
            peer = %partner,
            channel = %log_id(&next),
            state = next.state,
            revealed = secrets.len(),
            "update proposed"
        );
        let entry = self.entry_mut(partner)?;
        entry.pending = Some(ChannelTransactions { update: update.clone(), settle: settle.clone() });
        entry.status = ChannelStatus::Updating;
        Ok(UpdateProposal { update, settle, secrets })
    }

    /// Validates and counter-signs a rebalancing proposed by `partner`
    ///
    /// Revealed secrets are learned so that offers made upstream can be
    /// settled with them.
    ///
    /// # Errors
    /// * `ProtocolError::NotChannelFunder` - If this node did not fund the channel
    /// * `ProtocolError::InvalidSecret` - If a revealed secret does not hash to its key
    /// * `ProtocolError::StateNotIncreasing` - If the state does not advance
    /// * `ProtocolError::ProposalMismatch` - If the proposal differs from our reconstruction
    /// * `ProtocolError::SignatureVerificationFailed` - If the proposer's signatures are invalid
    pub fn accept_update(
        &mut self,
        partner: PeerId,
        proposal: &UpdateProposal,
        block_time: u32,
    ) -> Result<(UpdateTx, SettleTx)> {
        let entry = self.idle_entry(partner, Role::Funder)?;
        if let Some((hash, _)) =
            proposal.secrets.iter().find(|(hash, secret)| !secret.matches(hash))
        {
            return Err(ProtocolError::InvalidSecret(*hash).into());
        }
        let current = entry.complete.channel();
        let proposed = proposal.update.channel();
        if proposed.state <= current.state {
            return Err(ProtocolError::StateNotIncreasing {
                current: current.state,
                proposed: proposed.state,
            }
            .into());
        }

        let expected = current.with_resolved_payments(&proposal.secrets, block_time)?;
        let signed = countersign(
            &expected,
            &proposal.update,
            &proposal.settle,
            &entry.keys,
            Role::Funder,
            &self.config,
        )?;

        info!(
            node = %self.id,
            peer = %partner,
            channel = %log_id(&expected),
            state = expected.state,
            refund = expected.settled_refund_amount,
            payment = expected.settled_payment_amount,
            "update accepted"
        );
        self.secrets.extend(proposal.secrets.iter().map(|(hash, secret)| (*hash, *secret)));
        let entry = self.entry_mut(partner)?;
        entry.complete = signed.clone();
        Ok((signed.update, signed.settle))
    }

    /// Adopts the counter-signed rebalancing returned by `partner`
    ///
    /// # Errors
    /// * `ProtocolError::NoPendingProposal` - If no update is in flight
    /// * `ProtocolError::ProposalMismatch` - If the response is for a different state
    /// * `ProtocolError::SignatureVerificationFailed` - If a signature is invalid; the
    ///   channel stays on its last complete state
    pub fn confirm_update(
        &mut self,
        partner: PeerId,
        update: &UpdateTx,
        settle: &SettleTx,
    ) -> Result<()> {
        self.finish_proposal(partner, Role::Counterparty, update, settle)
    }
}
