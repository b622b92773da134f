//! Payment handshake
//!
//! The funder offers an HTLC for an invoice (`propose_payment`), the
//! counterparty rebuilds the expected state from its own view and
//! counter-signs (`receive_payment`), and the funder adopts the fully signed
//! pair (`confirm_payment`).

use tracing::{debug, info, warn};

use super::{countersign, log_id, ChannelStatus, ChannelTransactions, L2Node};
use super::{PaymentProposal, PaymentReceipt};
use crate::channel::invoice::Invoice;
use crate::channel::tx::{SettleTx, UpdateTx};
use crate::channel::witness::Role;
use crate::errors::{ProtocolError, Result};
use crate::types::PeerId;

impl L2Node {
    /// Offers `invoice` to `partner` as a new HTLC
    ///
    /// # Errors
    /// * `ProtocolError::NotChannelFunder` - If this node did not fund the channel
    /// * `ProtocolError::ProposalInFlight` - If a proposal awaits confirmation
    /// * `ChannelError::InsufficientBalance` - If the funder cannot cover the amount
    /// * `ChannelError::DuplicateInvoice` - If the payment hash is already offered
    pub fn propose_payment(
        &mut self,
        partner: PeerId,
        invoice: &Invoice,
    ) -> Result<PaymentProposal> {
        let entry = self.idle_entry(partner, Role::Funder)?;
        let next = entry.complete.channel().with_offered_payment(invoice)?;
        let update = UpdateTx::new(&next, &self.config)?.sign(&entry.keys, Role::Funder)?;
        let settle = SettleTx::new(&next, &self.config)?.sign(&entry.keys, Role::Funder)?;

        info!(
            node = %self.id,
            peer = %partner,
            channel = %log_id(&next),
            state = next.state,
            amount = invoice.amount,
            "payment proposed"
        );
        let entry = self.entry_mut(partner)?;
        entry.pending = Some(ChannelTransactions { update: update.clone(), settle: settle.clone() });
        entry.status = ChannelStatus::Updating;
        Ok(PaymentProposal { update, settle })
    }

    /// Validates and counter-signs a payment proposed by `partner`
    ///
    /// On success the new state is adopted as complete.
    ///
    /// # Errors
    /// * `ProtocolError::NotChannelCounterparty` - If this node funded the channel
    /// * `ProtocolError::StateNotIncreasing` - If the state does not advance
    /// * `ChannelError::BalanceNotConserved` - If the proposed balances do not add up
    /// * `ProtocolError::PaymentBalanceDecreased` - If our settled balance shrinks
    /// * `ProtocolError::OfferedTotalNotIncreasing` - If no value moves into HTLCs
    /// * `ProtocolError::ProposalMismatch` - If the proposal differs from our reconstruction
    /// * `ProtocolError::SignatureVerificationFailed` - If the proposer's signatures are invalid
    pub fn receive_payment(
        &mut self,
        partner: PeerId,
        proposal: &PaymentProposal,
    ) -> Result<PaymentReceipt> {
        let entry = self.idle_entry(partner, Role::Counterparty)?;
        let current = entry.complete.channel();
        let proposed = proposal.update.channel();

        if proposed.state <= current.state {
            return Err(ProtocolError::StateNotIncreasing {
                current: current.state,
                proposed: proposed.state,
            }
            .into());
        }
        proposed.check_conservation()?;
        if proposed.settled_payment_amount < current.settled_payment_amount {
            return Err(ProtocolError::PaymentBalanceDecreased {
                current: current.settled_payment_amount,
                proposed: proposed.settled_payment_amount,
            }
            .into());
        }
        let (current_offered, proposed_offered) =
            (current.offered_total()?, proposed.offered_total()?);
        if proposed_offered <= current_offered {
            return Err(ProtocolError::OfferedTotalNotIncreasing {
                current: current_offered,
                proposed: proposed_offered,
            }
            .into());
        }

        let new_invoices: Vec<&Invoice> = proposed
            .offered_payments
            .iter()
            .filter(|(hash, _)| !current.offered_payments.contains_key(*hash))
            .map(|(_, invoice)| invoice)
            .collect();
        let [invoice] = new_invoices.as_slice() else {
            return Err(ProtocolError::ProposalMismatch(format!(
                "expected exactly one new payment, found {}",
                new_invoices.len()
            ))
            .into());
        };
        let expected = current.with_offered_payment(invoice)?;
        let signed = countersign(
            &expected,
            &proposal.update,
            &proposal.settle,
            &entry.keys,
            Role::Counterparty,
            &self.config,
        )?;

        let secret = self.secrets.get(&invoice.payment_hash).copied();
        info!(
            node = %self.id,
            peer = %partner,
            channel = %log_id(&expected),
            state = expected.state,
            amount = invoice.amount,
            known_secret = secret.is_some(),
            "payment received"
        );
        let entry = self.entry_mut(partner)?;
        entry.complete = signed.clone();
        Ok(PaymentReceipt { update: signed.update, settle: signed.settle, secret })
    }

    /// Adopts the counter-signed payment returned by `partner`
    ///
    /// A revealed secret is learned when it unlocks one of the channel's
    /// HTLCs.
    ///
    /// # Errors
    /// * `ProtocolError::NoPendingProposal` - If no payment is in flight
    /// * `ProtocolError::ProposalMismatch` - If the receipt is for a different state
    /// * `ProtocolError::SignatureVerificationFailed` - If a signature is invalid; the
    ///   proposal is rolled back
    pub fn confirm_payment(&mut self, partner: PeerId, receipt: &PaymentReceipt) -> Result<()> {
        self.finish_proposal(partner, Role::Funder, &receipt.update, &receipt.settle)?;
        if let Some(secret) = receipt.secret {
            let hash = secret.payment_hash();
            if self.channel(partner)?.offered_payments.contains_key(&hash) {
                debug!(node = %self.id, peer = %partner, payment = %hash, "secret learned");
                self.learn_secret(secret);
            } else {
                warn!(node = %self.id, peer = %partner, payment = %hash, "ignoring unrelated secret");
            }
        }
        Ok(())
    }
}
