//! Channel opening handshake
//!
//! The funder publishes its commitments with `propose_channel`; the
//! counterparty answers with `join_channel`, signing the state-0 refund
//! Settle; the funder finishes with `create_channel`.

use tracing::info;

use super::{log_id, ChannelEntry, ChannelStatus, ChannelTransactions, L2Node};
use crate::channel::keys::ChannelKeys;
use crate::channel::payment_channel::PaymentChannel;
use crate::channel::tx::{SettleTx, UpdateTx};
use crate::channel::witness::{PartyWitness, Role};
use crate::errors::{ProtocolError, Result};
use crate::types::PeerId;

impl L2Node {
    /// Generates channel keys for `partner` and publishes their commitments
    ///
    /// The keys stay pending until [`L2Node::create_channel`].
    ///
    /// # Errors
    /// * `ProtocolError::ChannelExists` - If a channel with `partner` is open
    pub fn propose_channel(&mut self, partner: PeerId) -> Result<PartyWitness> {
        if self.channels.contains_key(&partner) {
            return Err(ProtocolError::ChannelExists(partner).into());
        }
        let keys = ChannelKeys::generate(self.config.network)?;
        let witness = keys.witness(0)?;
        self.proposed.insert(partner, keys);
        info!(node = %self.id, peer = %partner, "channel proposed");
        Ok(witness)
    }

    /// Joins a channel funded by `partner`
    ///
    /// # Arguments
    /// * `partner` - The funder
    /// * `funder_witness` - Commitments returned by the funder's `propose_channel`
    ///
    /// # Returns
    /// * Our commitments carrying the signature of the state-0 refund Settle
    ///
    /// # Errors
    /// * `ProtocolError::ChannelExists` - If a channel with `partner` is open
    /// * `ProtocolError::CommitmentMismatch` - If the funder's settle key is not derived for state 0
    pub fn join_channel(
        &mut self,
        partner: PeerId,
        funder_witness: &PartyWitness,
    ) -> Result<PartyWitness> {
        if self.channels.contains_key(&partner) {
            return Err(ProtocolError::ChannelExists(partner).into());
        }
        check_state_zero(funder_witness, Role::Funder)?;

        let keys = ChannelKeys::generate(self.config.network)?;
        let own = keys.witness(0)?;
        let channel = PaymentChannel::open(funder_witness, &own, self.config.channel_amount)?;
        let setup = UpdateTx::new(&channel, &self.config)?;
        let settle = SettleTx::new(&channel, &self.config)?.sign(&keys, Role::Counterparty)?;

        let mut reply = own;
        reply.settle_sig = settle.signature(Role::Counterparty).copied();

        info!(node = %self.id, peer = %partner, channel = %log_id(&channel), "joined channel");
        self.channels.insert(
            partner,
            ChannelEntry {
                keys,
                role: Role::Counterparty,
                status: ChannelStatus::Open,
                complete: ChannelTransactions { update: setup.clone(), settle },
                setup,
                pending: None,
                proposed_close: None,
            },
        );
        Ok(reply)
    }

    /// Completes a channel proposed to `partner`
    ///
    /// # Returns
    /// * The state-0 Update whose output the setup transaction must create,
    ///   and the fully signed refund Settle
    ///
    /// # Errors
    /// * `ProtocolError::NoPendingProposal` - If no channel was proposed to `partner`
    /// * `ProtocolError::MissingSignature` - If the counterparty did not sign the refund
    /// * `ProtocolError::SignatureVerificationFailed` - If its signature does not verify
    pub fn create_channel(
        &mut self,
        partner: PeerId,
        other_witness: &PartyWitness,
    ) -> Result<(UpdateTx, SettleTx)> {
        let keys = self
            .proposed
            .get(&partner)
            .ok_or(ProtocolError::NoPendingProposal(partner))?;
        check_state_zero(other_witness, Role::Counterparty)?;
        let other_sig = other_witness.settle_sig.ok_or_else(|| {
            ProtocolError::MissingSignature("refund settle of Counterparty".to_string())
        })?;

        let channel =
            PaymentChannel::open(&keys.witness(0)?, other_witness, self.config.channel_amount)?;
        let setup = UpdateTx::new(&channel, &self.config)?;
        let settle = SettleTx::new(&channel, &self.config)?
            .with_signature(Role::Counterparty, other_sig);
        settle.verify_signature(Role::Counterparty)?;
        let settle = settle.sign(keys, Role::Funder)?;
        settle.verify()?;

        let Some(keys) = self.proposed.remove(&partner) else {
            return Err(ProtocolError::NoPendingProposal(partner).into());
        };
        info!(node = %self.id, peer = %partner, channel = %log_id(&channel), "channel created");
        self.channels.insert(
            partner,
            ChannelEntry {
                keys,
                role: Role::Funder,
                status: ChannelStatus::Open,
                setup: setup.clone(),
                complete: ChannelTransactions { update: setup.clone(), settle: settle.clone() },
                pending: None,
                proposed_close: None,
            },
        );
        Ok((setup, settle))
    }
}

fn check_state_zero(witness: &PartyWitness, role: Role) -> Result<()> {
    if witness.settle_key_matches(0) {
        Ok(())
    } else {
        Err(ProtocolError::CommitmentMismatch(format!(
            "settle key of {role:?} is not derived for state 0"
        ))
        .into())
    }
}
