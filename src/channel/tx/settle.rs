//! Settle transaction builder
//!
//! A Settle pays out one state's balances. It spends that state's Update
//! output through the settle branch, so it only becomes valid once the
//! dispute window has elapsed after the Update confirmed.

use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::btx::script::{
    build_htlc_script, build_p2pkh_script_code, build_payout_script, settle_branch_witness,
    to_p2wsh,
};
use crate::btx::sighash::{sign_input, ChannelSignature, SigningMode};
use crate::btx::timelock::compute_sequence_for_blocks;
use crate::channel::keys::ChannelKeys;
use crate::channel::payment_channel::PaymentChannel;
use crate::channel::tx::check_signature;
use crate::channel::witness::Role;
use crate::config::ChannelConfig;
use crate::errors::{ProtocolError, Result};
use crate::types::PaymentHash;

/// What a Settle output pays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutputKind {
    /// Funder's settled balance
    Refund,
    /// Counterparty's settled balance
    Payment,
    /// Outstanding HTLC
    Htlc(PaymentHash),
}

/// One output of a Settle transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleOutput {
    /// What the output pays
    pub kind: SettleOutputKind,
    /// Output index
    pub vout: u32,
    /// Output value in satoshis
    pub value: u64,
    /// Script code used when spending it
    pub script_code: ScriptBuf,
}

/// Settle transaction of one channel state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleTx {
    channel: PaymentChannel,
    update_script: ScriptBuf,
    tx: Transaction,
    outputs: Vec<SettleOutput>,
}

impl SettleTx {
    /// Builds the unsigned Settle for `channel`
    ///
    /// Outputs appear in order: refund, payment, then one HTLC per offered
    /// invoice in payment-hash order. Outputs at or below the dust limit are
    /// dropped.
    ///
    /// # Errors
    /// * `ChannelError::BalanceNotConserved` - If the snapshot is inconsistent
    /// * `ChannelError::StateOverflow` - If the state lock time exceeds u32
    pub fn new(channel: &PaymentChannel, config: &ChannelConfig) -> Result<Self> {
        channel.check_conservation()?;
        let mut channel = channel.clone();
        channel.witness = channel.witness.without_signatures();
        channel.other_witness = channel.other_witness.without_signatures();

        let refund_pk = channel.witness.payment_pk;
        let payment_pk = channel.other_witness.payment_pk;

        let mut candidates = vec![
            (
                SettleOutputKind::Refund,
                channel.settled_refund_amount,
                build_p2pkh_script_code(&refund_pk),
                build_payout_script(&refund_pk),
            ),
            (
                SettleOutputKind::Payment,
                channel.settled_payment_amount,
                build_p2pkh_script_code(&payment_pk),
                build_payout_script(&payment_pk),
            ),
        ];
        for (hash, invoice) in &channel.offered_payments {
            let htlc = build_htlc_script(&refund_pk, &payment_pk, hash, invoice.expiry);
            let script_pubkey = to_p2wsh(&htlc);
            candidates.push((SettleOutputKind::Htlc(*hash), invoice.amount, htlc, script_pubkey));
        }

        let mut outputs = Vec::new();
        let mut tx_outputs = Vec::new();
        for (kind, value, script_code, script_pubkey) in candidates {
            if !config.above_dust(value) {
                continue;
            }
            outputs.push(SettleOutput { kind, vout: tx_outputs.len() as u32, value, script_code });
            tx_outputs.push(TxOut { value: Amount::from_sat(value), script_pubkey });
        }

        let update_script = channel.update_script(config)?;
        let tx = Transaction {
            version: Version::TWO,
            lock_time: config.settle_lock_time(channel.state)?,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: compute_sequence_for_blocks(config.dispute_window),
                witness: Witness::new(),
            }],
            output: tx_outputs,
        };
        Ok(Self { channel, update_script, tx, outputs })
    }

    /// Channel snapshot this Settle pays out
    pub fn channel(&self) -> &PaymentChannel {
        &self.channel
    }

    /// State number
    pub fn state(&self) -> u32 {
        self.channel.state
    }

    /// Update script of the output this Settle spends
    pub fn update_script(&self) -> &Script {
        &self.update_script
    }

    /// The unsigned template
    pub fn unsigned_transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Output layout
    pub fn outputs(&self) -> &[SettleOutput] {
        &self.outputs
    }

    /// Output paying `kind`, if above dust
    pub fn output(&self, kind: SettleOutputKind) -> Option<&SettleOutput> {
        self.outputs.iter().find(|output| output.kind == kind)
    }

    /// Settle signature of `role`, if present
    pub fn signature(&self, role: Role) -> Option<&ChannelSignature> {
        self.channel.witness_for(role).settle_sig.as_ref()
    }

    /// Copy with `signature` attached for `role`
    pub fn with_signature(&self, role: Role, signature: ChannelSignature) -> Self {
        let mut signed = self.clone();
        signed.channel.witness_for_mut(role).settle_sig = Some(signature);
        signed
    }

    /// Signs with the settle key of `role` for this state
    ///
    /// # Errors
    /// * `ProtocolError::CommitmentMismatch` - If the derived key does not match the witness
    /// * `BtxError::KeyDerivation` - If the settle key cannot be derived
    pub fn sign(&self, keys: &ChannelKeys, role: Role) -> Result<Self> {
        let secp = Secp256k1::signing_only();
        let settle_key = keys.settle_key(self.channel.state)?;
        if PublicKey::from_secret_key(&secp, &settle_key)
            != self.channel.witness_for(role).settle_pk
        {
            return Err(ProtocolError::CommitmentMismatch(format!(
                "settle key for state {} does not belong to {role:?}",
                self.channel.state
            ))
            .into());
        }
        let signature = sign_input(
            &self.tx,
            0,
            &self.update_script,
            self.amount(),
            SigningMode::AnyPrevOut,
            &settle_key,
        )?;
        Ok(self.with_signature(role, signature))
    }

    /// Verifies the settle signature of `role`
    ///
    /// # Errors
    /// * `ProtocolError::MissingSignature` - If no signature is attached
    /// * `ProtocolError::SignatureVerificationFailed` - If it does not validate
    pub fn verify_signature(&self, role: Role) -> Result<()> {
        check_signature(
            &self.tx,
            &self.update_script,
            self.amount(),
            SigningMode::AnyPrevOut,
            self.signature(role),
            &self.channel.witness_for(role).settle_pk,
            &format!("settle signature of {role:?} at state {}", self.channel.state),
        )
    }

    /// Verifies both parties' settle signatures
    pub fn verify(&self) -> Result<()> {
        self.verify_signature(Role::Funder)?;
        self.verify_signature(Role::Counterparty)
    }

    /// Broadcastable transaction spending the Update output at `update_outpoint`
    ///
    /// # Errors
    /// * `ProtocolError::MissingSignature` / `SignatureVerificationFailed` - If not fully signed
    pub fn spend(&self, update_outpoint: OutPoint) -> Result<Transaction> {
        self.verify()?;
        let (funder_sig, other_sig) = match (
            self.signature(Role::Funder),
            self.signature(Role::Counterparty),
        ) {
            (Some(funder), Some(other)) => (funder, other),
            _ => return Err(ProtocolError::MissingSignature("settle".to_string()).into()),
        };

        let mut tx = self.tx.clone();
        tx.input = vec![TxIn {
            previous_output: update_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: self.sequence(),
            witness: settle_branch_witness(funder_sig, other_sig, &self.update_script),
        }];
        Ok(tx)
    }

    fn sequence(&self) -> Sequence {
        self.tx.input.first().map(|input| input.sequence).unwrap_or(Sequence::MAX)
    }

    fn amount(&self) -> Amount {
        Amount::from_sat(self.channel.channel_amount)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    use super::*;
    use crate::btx::timelock::extract_csv_blocks;
    use crate::channel::invoice::Invoice;
    use crate::channel::test_utils::{
        counterparty_keys, funder_keys, open_channel, preimage, test_config,
    };
    use crate::errors::Error;

    fn channel_with_payments() -> PaymentChannel {
        open_channel()
            .with_offered_payment(
                &Invoice::for_preimage(1, &preimage(1), 10_000, 1_500_003_600).expect("invoice"),
            )
            .and_then(|c| {
                c.with_offered_payment(
                    &Invoice::for_preimage(2, &preimage(2), 500, 1_500_003_600)
                        .expect("invoice"),
                )
            })
            .expect("offers should succeed")
    }

    #[test]
    fn test_settle_layout() {
        let config = test_config();
        let settle = SettleTx::new(&channel_with_payments(), &config).expect("build");
        let tx = settle.unsigned_transaction();

        assert_eq!(tx.lock_time.to_consensus_u32(), config.cltv_start_time + 2 + 1);
        assert_eq!(extract_csv_blocks(tx.input[0].sequence), Some(config.dispute_window));

        // zero payment balance and the 500 sat HTLC fall below dust
        assert_eq!(settle.outputs().len(), 2);
        let refund = settle.output(SettleOutputKind::Refund).expect("refund output");
        assert_eq!(refund.vout, 0);
        assert_eq!(refund.value, 989_500);
        assert!(settle.output(SettleOutputKind::Payment).is_none());
        let htlc = settle
            .output(SettleOutputKind::Htlc(preimage(1).payment_hash()))
            .expect("htlc output");
        assert_eq!(htlc.vout, 1);
        assert_eq!(tx.output[1].script_pubkey, to_p2wsh(&htlc.script_code));
        assert!(settle.output(SettleOutputKind::Htlc(preimage(2).payment_hash())).is_none());
    }

    #[test]
    fn test_sign_verify_and_spend() {
        let settle = SettleTx::new(&channel_with_payments(), &test_config())
            .and_then(|s| s.sign(&funder_keys(), Role::Funder))
            .expect("funder signs");
        assert!(matches!(
            settle.spend(OutPoint::null()),
            Err(Error::Protocol(ProtocolError::MissingSignature(_)))
        ));

        let settle = settle.sign(&counterparty_keys(), Role::Counterparty).expect("other signs");
        settle.verify().expect("both signatures valid");

        let outpoint = OutPoint { txid: Txid::from_byte_array([4u8; 32]), vout: 0 };
        let tx = settle.spend(outpoint).expect("spend");
        assert_eq!(tx.input[0].previous_output, outpoint);
        assert_eq!(tx.input[0].witness.len(), 7);
        assert_eq!(tx.input[0].sequence, settle.unsigned_transaction().input[0].sequence);
    }

    #[test]
    fn test_wrong_role_rejected() {
        let settle = SettleTx::new(&open_channel(), &test_config()).expect("build");
        assert!(matches!(
            settle.sign(&funder_keys(), Role::Counterparty),
            Err(Error::Protocol(ProtocolError::CommitmentMismatch(_)))
        ));
    }
}
