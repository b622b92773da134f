//! Update transaction builder
//!
//! An Update re-locks the whole channel amount under the update script of its
//! state. Its signatures use [`SigningMode::AnyPrevOutAnyScript`], so the same
//! fully signed Update can spend the funding output or any earlier Update
//! output whose lock time it satisfies.

use bitcoin::absolute::LockTime;
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Transaction, TxIn, TxOut, Witness};

use crate::btx::script::{to_p2wsh, update_branch_witness};
use crate::btx::sighash::{sign_input, ChannelSignature, SigningMode};
use crate::btx::timelock::LOCKTIME_SEQUENCE;
use crate::channel::keys::ChannelKeys;
use crate::channel::payment_channel::PaymentChannel;
use crate::channel::tx::check_signature;
use crate::channel::witness::Role;
use crate::config::ChannelConfig;
use crate::errors::{ProtocolError, Result};

/// Update transaction of one channel state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTx {
    channel: PaymentChannel,
    script: ScriptBuf,
    tx: Transaction,
}

impl UpdateTx {
    /// Builds the unsigned Update for `channel`
    ///
    /// The template input has a null outpoint; [`UpdateTx::spend`] binds it
    /// to a concrete output.
    ///
    /// # Errors
    /// * `ChannelError::BalanceNotConserved` - If the snapshot is inconsistent
    /// * `ChannelError::StateOverflow` - If the state lock time exceeds u32
    pub fn new(channel: &PaymentChannel, config: &ChannelConfig) -> Result<Self> {
        channel.check_conservation()?;
        let mut channel = channel.clone();
        channel.witness = channel.witness.without_signatures();
        channel.other_witness = channel.other_witness.without_signatures();

        let script = channel.update_script(config)?;
        let tx = Transaction {
            version: Version::TWO,
            lock_time: config.update_lock_time(channel.state)?,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: LOCKTIME_SEQUENCE,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(channel.channel_amount),
                script_pubkey: to_p2wsh(&script),
            }],
        };
        Ok(Self { channel, script, tx })
    }

    /// Channel snapshot this Update commits to
    pub fn channel(&self) -> &PaymentChannel {
        &self.channel
    }

    /// State number
    pub fn state(&self) -> u32 {
        self.channel.state
    }

    /// Witness script of the Update output
    pub fn script(&self) -> &Script {
        &self.script
    }

    /// P2WSH scriptPubkey of the Update output
    pub fn script_pubkey(&self) -> ScriptBuf {
        to_p2wsh(&self.script)
    }

    /// The unsigned template
    pub fn unsigned_transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Update signature of `role`, if present
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
            &self.script,
            self.amount(),
            SigningMode::AnyPrevOutAnyScript,
            keys.update_key(),
        )?;
        Ok(self.with_signature(role, signature))
    }

    /// Verifies the update signature of `role`
    ///
    /// # Errors
    /// * `ProtocolError::MissingSignature` - If no signature is attached
    /// * `ProtocolError::SignatureVerificationFailed` - If it does not validate
    pub fn verify_signature(&self, role: Role) -> Result<()> {
        check_signature(
            &self.tx,
            &self.script,
            self.amount(),
            SigningMode::AnyPrevOutAnyScript,
            self.signature(role),
            &self.channel.witness_for(role).update_pk,
            &format!("update signature of {role:?} at state {}", self.channel.state),
        )
    }

    /// Verifies both parties' update signatures
    pub fn verify(&self) -> Result<()> {
        self.verify_signature(Role::Funder)?;
        self.verify_signature(Role::Counterparty)
    }

    /// Broadcastable transaction spending `outpoint` through its update branch
    ///
    /// # Arguments
    /// * `spent_script` - Update script of the output being spent
    /// * `outpoint` - The funding output or an earlier Update output
    ///
    /// # Errors
    /// * `ProtocolError::MissingSignature` / `SignatureVerificationFailed` - If not fully signed
    pub fn spend(&self, spent_script: &Script, outpoint: OutPoint) -> Result<Transaction> {
        self.verify()?;
        let (funder_sig, other_sig) = match (
            self.signature(Role::Funder),
            self.signature(Role::Counterparty),
        ) {
            (Some(funder), Some(other)) => (funder, other),
            _ => return Err(ProtocolError::MissingSignature("update".to_string()).into()),
        };

        let mut tx = self.tx.clone();
        tx.input = vec![TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence: LOCKTIME_SEQUENCE,
            witness: update_branch_witness(funder_sig, other_sig, spent_script),
        }];
        Ok(tx)
    }

    /// Setup transaction creating the channel output at vout 0
    ///
    /// The caller's wallet supplies and signs `inputs`; `change` outputs are
    /// appended after the channel output.
    pub fn setup_transaction(&self, inputs: Vec<TxIn>, change: Vec<TxOut>) -> Transaction {
        let mut output = vec![TxOut {
            value: self.amount(),
            script_pubkey: self.script_pubkey(),
        }];
        output.extend(change);
        Transaction { version: Version::TWO, lock_time: LockTime::ZERO, input: inputs, output }
    }

    fn amount(&self) -> Amount {
        Amount::from_sat(self.channel.channel_amount)
    }

    /// Copy committing to an arbitrary snapshot, bypassing validation
    #[cfg(test)]
    pub(crate) fn with_channel_for_test(&self, channel: PaymentChannel) -> Self {
        Self { channel, ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    use super::*;
    use crate::channel::invoice::Invoice;
    use crate::channel::test_utils::{
        counterparty_keys, funder_keys, open_channel, preimage, stranger_keys, test_config,
    };
    use crate::errors::Error;

    fn signed_update(channel: &PaymentChannel) -> UpdateTx {
        UpdateTx::new(channel, &test_config())
            .and_then(|u| u.sign(&funder_keys(), Role::Funder))
            .and_then(|u| u.sign(&counterparty_keys(), Role::Counterparty))
            .expect("signing should succeed")
    }

    #[test]
    fn test_update_layout() {
        let config = test_config();
        let update = UpdateTx::new(&open_channel(), &config).expect("build should succeed");
        let tx = update.unsigned_transaction();
        assert_eq!(tx.version, Version::TWO);
        assert_eq!(tx.lock_time.to_consensus_u32(), config.cltv_start_time);
        assert_eq!(tx.input[0].sequence, LOCKTIME_SEQUENCE);
        assert_eq!(tx.output.len(), 1);
        assert_eq!(tx.output[0].value.to_sat(), config.channel_amount);
        assert_eq!(tx.output[0].script_pubkey, update.script_pubkey());
    }

    #[test]
    fn test_sign_and_verify() {
        let update = UpdateTx::new(&open_channel(), &test_config()).expect("build should succeed");
        let half = update.sign(&funder_keys(), Role::Funder).expect("funder signs");
        half.verify_signature(Role::Funder).expect("funder signature valid");
        assert!(matches!(half.verify(), Err(Error::Protocol(ProtocolError::MissingSignature(_)))));

        let full = half.sign(&counterparty_keys(), Role::Counterparty).expect("counterparty signs");
        full.verify().expect("both signatures valid");

        assert!(matches!(
            update.sign(&stranger_keys(), Role::Funder),
            Err(Error::Protocol(ProtocolError::CommitmentMismatch(_)))
        ));
    }

    #[test]
    fn test_signature_is_bound_to_state() {
        let config = test_config();
        let channel = open_channel();
        let next = channel
            .with_offered_payment(
                &Invoice::for_preimage(1, &preimage(1), 10_000, 1_500_003_600)
                    .expect("invoice"),
            )
            .expect("offer");
        let old = signed_update(&channel);
        let forged = UpdateTx::new(&next, &config)
            .expect("build")
            .with_signature(Role::Funder, *old.signature(Role::Funder).expect("sig"))
            .with_signature(Role::Counterparty, *old.signature(Role::Counterparty).expect("sig"));
        assert!(matches!(
            forged.verify(),
            Err(Error::Protocol(ProtocolError::SignatureVerificationFailed(_)))
        ));
    }

    #[test]
    fn test_spend_binds_any_outpoint() {
        let update = signed_update(&open_channel());
        let a = OutPoint { txid: Txid::from_byte_array([1u8; 32]), vout: 0 };
        let b = OutPoint { txid: Txid::from_byte_array([2u8; 32]), vout: 3 };
        let tx_a = update.spend(update.script(), a).expect("spend");
        let tx_b = update.spend(update.script(), b).expect("spend");
        assert_eq!(tx_a.input[0].previous_output, a);
        assert_eq!(tx_b.input[0].previous_output, b);
        assert_eq!(tx_a.input[0].witness, tx_b.input[0].witness);
        assert_eq!(tx_a.input[0].witness.len(), 4);

        let unsigned = UpdateTx::new(&open_channel(), &test_config()).expect("build");
        assert!(unsigned.spend(unsigned.script(), a).is_err());
    }

    #[test]
    fn test_setup_transaction() {
        let update = UpdateTx::new(&open_channel(), &test_config()).expect("build");
        let change = TxOut { value: Amount::from_sat(5_000), script_pubkey: ScriptBuf::new() };
        let setup = update.setup_transaction(Vec::new(), vec![change.clone()]);
        assert_eq!(setup.output[0].script_pubkey, update.script_pubkey());
        assert_eq!(setup.output[1], change);
        assert_eq!(setup.lock_time, LockTime::ZERO);
    }
}
