//! Cooperative close transaction builder
//!
//! A Close spends the funding output directly through the update branch of
//! the state-0 script and pays both final balances, skipping the Update,
//! Settle and dispute window. Unresolved HTLCs return to the funder.

use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Transaction, TxIn, TxOut, Witness};

use crate::btx::script::{build_payout_script, update_branch_witness};
use crate::btx::sighash::{sign_input, ChannelSignature, SigningMode};
use crate::btx::timelock::LOCKTIME_SEQUENCE;
use crate::channel::close_utils::split_close_fee;
use crate::channel::keys::ChannelKeys;
use crate::channel::payment_channel::PaymentChannel;
use crate::channel::tx::check_signature;
use crate::channel::tx::update::UpdateTx;
use crate::channel::witness::Role;
use crate::config::ChannelConfig;
use crate::errors::{ChannelError, ProtocolError, Result};

/// Cooperative close of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseTx {
    channel: PaymentChannel,
    setup_script: ScriptBuf,
    tx: Transaction,
}

impl CloseTx {
    /// Builds the unsigned Close for `channel`
    ///
    /// # Arguments
    /// * `channel` - Latest agreed snapshot
    /// * `setup` - The state-0 Update whose output funds the channel
    /// * `funding_outpoint` - Location of that output on chain
    /// * `config` - Channel parameters
    ///
    /// # Errors
    /// * `ChannelError::CloseBelowFee` - If the balances cannot pay the fee
    /// * `ChannelError::BalanceOverflow` - If balances overflow
    pub fn new(
        channel: &PaymentChannel,
        setup: &UpdateTx,
        funding_outpoint: OutPoint,
        config: &ChannelConfig,
    ) -> Result<Self> {
        channel.check_conservation()?;
        let mut channel = channel.clone();
        channel.witness = channel.witness.without_signatures();
        channel.other_witness = channel.other_witness.without_signatures();

        let refund = channel
            .settled_refund_amount
            .checked_add(channel.offered_total()?)
            .ok_or(ChannelError::BalanceOverflow)?;
        let (refund, payment) =
            split_close_fee(refund, channel.settled_payment_amount, config.fee_amount)?;

        let mut output = Vec::new();
        for (value, pk) in
            [(refund, &channel.witness.payment_pk), (payment, &channel.other_witness.payment_pk)]
        {
            if config.above_dust(value) {
                output.push(TxOut {
                    value: Amount::from_sat(value),
                    script_pubkey: build_payout_script(pk),
                });
            }
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time: config.settle_lock_time(channel.state)?,
            input: vec![TxIn {
                previous_output: funding_outpoint,
                script_sig: ScriptBuf::new(),
                sequence: LOCKTIME_SEQUENCE,
                witness: Witness::new(),
            }],
            output,
        };
        Ok(Self { channel, setup_script: setup.script().to_owned(), tx })
    }

    /// Channel snapshot being closed
    pub fn channel(&self) -> &PaymentChannel {
        &self.channel
    }

    /// The unsigned template
    pub fn unsigned_transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Funding output spent by this Close
    pub fn funding_outpoint(&self) -> OutPoint {
        self.tx.input.first().map(|input| input.previous_output).unwrap_or_else(OutPoint::null)
    }

    /// Script of the funding output
    pub fn setup_script(&self) -> &Script {
        &self.setup_script
    }

    /// Close signature of `role`, if present
    pub fn signature(&self, role: Role) -> Option<&ChannelSignature> {
        self.channel.witness_for(role).update_sig.as_ref()
    }

    /// Copy with `signature` attached for `role`
    pub fn with_signature(&self, role: Role, signature: ChannelSignature) -> Self {
        let mut signed = self.clone();
        signed.channel.witness_for_mut(role).update_sig = Some(signature);
        signed
    }

    /// Signs with the update key of `role`
    ///
    /// # Errors
    /// * `ProtocolError::CommitmentMismatch` - If `keys` do not match the witness of `role`
    pub fn sign(&self, keys: &ChannelKeys, role: Role) -> Result<Self> {
        let secp = Secp256k1::signing_only();
        if PublicKey::from_secret_key(&secp, keys.update_key())
            != self.channel.witness_for(role).update_pk
        {
            return Err(ProtocolError::CommitmentMismatch(format!(
                "update key does not belong to {role:?}"
            ))
            .into());
        }
        let signature = sign_input(
            &self.tx,
            0,
            &self.setup_script,
            self.amount(),
            SigningMode::All,
            keys.update_key(),
        )?;
        Ok(self.with_signature(role, signature))
    }

    /// Verifies the close signature of `role`
    pub fn verify_signature(&self, role: Role) -> Result<()> {
        check_signature(
            &self.tx,
            &self.setup_script,
            self.amount(),
            SigningMode::All,
            self.signature(role),
            &self.channel.witness_for(role).update_pk,
            &format!("close signature of {role:?}"),
        )
    }

    /// Verifies both parties' close signatures
    pub fn verify(&self) -> Result<()> {
        self.verify_signature(Role::Funder)?;
        self.verify_signature(Role::Counterparty)
    }

    /// Broadcastable transaction
    ///
    /// # Errors
    /// * `ProtocolError::MissingSignature` / `SignatureVerificationFailed` - If not fully signed
    pub fn transaction(&self) -> Result<Transaction> {
        self.verify()?;
        let (funder_sig, other_sig) = match (
            self.signature(Role::Funder),
            self.signature(Role::Counterparty),
        ) {
            (Some(funder), Some(other)) => (funder, other),
            _ => return Err(ProtocolError::MissingSignature("close".to_string()).into()),
        };
        let mut tx = self.tx.clone();
        for input in &mut tx.input {
            input.witness = update_branch_witness(funder_sig, other_sig, &self.setup_script);
        }
        Ok(tx)
    }

    /// Copy carrying the signatures found in a broadcast `tx`
    ///
    /// `tx` must be this Close with the update-branch witness attached.
    ///
    /// # Errors
    /// * `ProtocolError::ProposalMismatch` - If `tx` is not this Close
    /// * `ProtocolError::MissingSignature` - If the witness lacks a signature
    /// * `ProtocolError::SignatureVerificationFailed` - If a signature is invalid
    pub fn with_transaction_signatures(&self, tx: &Transaction) -> Result<Self> {
        let mut unsigned = tx.clone();
        let witness = unsigned
            .input
            .first_mut()
            .map(|input| std::mem::take(&mut input.witness))
            .unwrap_or_default();
        if unsigned != self.tx {
            return Err(ProtocolError::ProposalMismatch(format!(
                "transaction {} is not the close of state {}",
                tx.compute_txid(),
                self.channel.state
            ))
            .into());
        }

        let mut signed = self.clone();
        for (index, role) in [(1, Role::Funder), (2, Role::Counterparty)] {
            let bytes = witness
                .nth(index)
                .filter(|item| !item.is_empty())
                .ok_or_else(|| ProtocolError::MissingSignature(format!("close of {role:?}")))?;
            let signature = ChannelSignature::from_slice(bytes).map_err(|e| {
                ProtocolError::SignatureVerificationFailed(format!("close of {role:?}: {e}"))
            })?;
            signed = signed.with_signature(role, signature);
        }
        signed.verify()?;
        Ok(signed)
    }

    fn amount(&self) -> Amount {
        Amount::from_sat(self.channel.channel_amount)
    }
}
