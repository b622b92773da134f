//! Closing a channel
//!
//! Uncooperatively, a party sweeps its share of a confirmed Settle with a
//! Redeem. Cooperatively, one party proposes a Close spending the funding
//! output, the other signs it after rebuilding it from its own view, and the
//! proposer confirms once it sees the fully signed transaction. Until then
//! the proposer's channel stays open.

use bitcoin::{OutPoint, Transaction, Txid};
use tracing::info;

use super::{log_id, ChannelStatus, L2Node};
use crate::channel::tx::{CloseTx, RedeemOptions, RedeemParams, RedeemTx, SettleTx};
use crate::errors::{ProtocolError, Result};
use crate::types::PeerId;

impl L2Node {
    /// Builds and signs the Redeem of our outputs of a confirmed Settle
    ///
    /// # Arguments
    /// * `partner` - The other party of the channel
    /// * `settle` - The Settle that confirmed on chain
    /// * `settle_txid` - Its txid
    /// * `options` - Which outputs to sweep and the chain time to use
    ///
    /// # Errors
    /// * `ProtocolError::CommitmentMismatch` - If `settle` belongs to another channel
    /// * `ChannelError::RedeemBelowFee` - If the sweep would not cover the fee
    pub fn uncooperatively_close(
        &mut self,
        partner: PeerId,
        settle: &SettleTx,
        settle_txid: Txid,
        options: RedeemOptions,
    ) -> Result<RedeemTx> {
        let entry = self.entry(partner)?;
        if settle.channel().channel_id() != entry.complete.channel().channel_id() {
            return Err(ProtocolError::CommitmentMismatch(format!(
                "settle of state {} belongs to another channel",
                settle.state()
            ))
            .into());
        }
        let params = RedeemParams {
            settle,
            settle_txid,
            secrets: &self.secrets,
            role: entry.role,
            options,
        };
        let redeem = RedeemTx::new(params, &self.config)?.sign(&entry.keys)?;

        info!(
            node = %self.id,
            peer = %partner,
            channel = %log_id(settle.channel()),
            state = settle.state(),
            inputs = redeem.input_count(),
            payout = redeem.payout(),
            "redeem signed"
        );
        let entry = self.entry_mut(partner)?;
        entry.pending = None;
        entry.proposed_close = None;
        entry.status = ChannelStatus::Closing;
        Ok(redeem)
    }

    /// Proposes a cooperative close of the latest complete state
    ///
    /// The channel stays open until [`L2Node::confirm_close`]; a newer
    /// proposal replaces an unanswered one.
    ///
    /// # Arguments
    /// * `partner` - The other party of the channel
    /// * `funding_outpoint` - Output created by the setup transaction
    ///
    /// # Errors
    /// * `ProtocolError::ProposalInFlight` - If a state proposal awaits confirmation
    /// * `ProtocolError::ChannelClosed` - If a close is already under way
    pub fn propose_close(&mut self, partner: PeerId, funding_outpoint: OutPoint) -> Result<CloseTx> {
        let role = self.entry(partner)?.role;
        let entry = self.idle_entry(partner, role)?;
        let close = CloseTx::new(
            entry.complete.channel(),
            &entry.setup,
            funding_outpoint,
            &self.config,
        )?
        .sign(&entry.keys, role)?;

        info!(
            node = %self.id,
            peer = %partner,
            channel = %log_id(close.channel()),
            state = close.channel().state,
            "close proposed"
        );
        self.entry_mut(partner)?.proposed_close = Some(close.clone());
        Ok(close)
    }

    /// Signs a cooperative close proposed by `partner`
    ///
    /// # Returns
    /// * The fully signed Close, ready to broadcast
    ///
    /// # Errors
    /// * `ProtocolError::ProposalMismatch` - If the Close differs from our own view
    /// * `ProtocolError::MissingSignature` - If the proposer did not sign it
    /// * `ProtocolError::SignatureVerificationFailed` - If its signature is invalid
    pub fn accept_close(&mut self, partner: PeerId, close: &CloseTx) -> Result<Transaction> {
        let role = self.entry(partner)?.role;
        let entry = self.idle_entry(partner, role)?;
        let expected = CloseTx::new(
            entry.complete.channel(),
            &entry.setup,
            close.funding_outpoint(),
            &self.config,
        )?;
        if expected.channel() != close.channel()
            || expected.unsigned_transaction() != close.unsigned_transaction()
        {
            return Err(ProtocolError::ProposalMismatch(format!(
                "close of state {} does not match our state {}",
                close.channel().state,
                expected.channel().state
            ))
            .into());
        }

        let their = role.other();
        let signature = close
            .signature(their)
            .ok_or_else(|| ProtocolError::MissingSignature(format!("close of {their:?}")))?;
        let signed = expected.with_signature(their, *signature);
        signed.verify_signature(their)?;
        let tx = signed.sign(&entry.keys, role)?.transaction()?;

        info!(
            node = %self.id,
            peer = %partner,
            channel = %log_id(signed.channel()),
            txid = %tx.compute_txid(),
            "close signed"
        );
        let entry = self.entry_mut(partner)?;
        entry.proposed_close = None;
        entry.status = ChannelStatus::Closed;
        Ok(tx)
    }

    /// Marks the channel closed once `partner` returns our proposed Close
    /// fully signed
    ///
    /// A `tx` that fails the checks leaves the proposal in place.
    ///
    /// # Errors
    /// * `ProtocolError::NoPendingProposal` - If no close was proposed
    /// * `ProtocolError::ProposalMismatch` - If `tx` is not the proposed Close
    /// * `ProtocolError::SignatureVerificationFailed` - If a signature is invalid
    pub fn confirm_close(&mut self, partner: PeerId, tx: &Transaction) -> Result<()> {
        let entry = self.entry(partner)?;
        let proposed =
            entry.proposed_close.as_ref().ok_or(ProtocolError::NoPendingProposal(partner))?;
        let signed = proposed.with_transaction_signatures(tx)?;

        info!(
            node = %self.id,
            peer = %partner,
            channel = %log_id(signed.channel()),
            txid = %tx.compute_txid(),
            "close confirmed"
        );
        let entry = self.entry_mut(partner)?;
        entry.proposed_close = None;
        entry.status = ChannelStatus::Closed;
        Ok(())
    }
}
