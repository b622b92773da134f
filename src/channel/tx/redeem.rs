//! Redeem transaction builder
//!
//! After a Settle confirms, each party sweeps what it is entitled to: its own
//! settled balance and, unless `settled_only`, the HTLC outputs it can unlock.
//! The funder can refund HTLCs once they expire; the counterparty can claim
//! HTLCs whose preimage it knows.

use std::collections::BTreeMap;

use bitcoin::absolute::LockTime;
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, TxIn, TxOut, Txid, Witness};

use crate::btx::script::{
    build_payout_script, htlc_claim_witness, htlc_refund_witness, p2wpkh_witness,
};
use crate::btx::sighash::{sign_input, ChannelSignature, SigningMode};
use crate::btx::timelock::LOCKTIME_SEQUENCE;
use crate::channel::keys::ChannelKeys;
use crate::channel::tx::settle::{SettleOutputKind, SettleTx};
use crate::channel::witness::Role;
use crate::config::ChannelConfig;
use crate::errors::{ChannelError, ProtocolError, Result};
use crate::types::{PaymentHash, Preimage};

/// Caller choices for an uncooperative close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeemOptions {
    /// Only sweep the caller's settled balance
    pub settled_only: bool,
    /// Include HTLCs the caller cannot currently unlock
    pub include_invalid: bool,
    /// Chain time used for HTLC expiry and the refund lock time
    pub block_time: u32,
}

/// Inputs to [`RedeemTx::new`]
#[derive(Debug, Clone, Copy)]
pub struct RedeemParams<'a> {
    /// The confirmed Settle being swept
    pub settle: &'a SettleTx,
    /// Its txid
    pub settle_txid: Txid,
    /// Preimages known to the caller
    pub secrets: &'a BTreeMap<PaymentHash, Preimage>,
    /// Which side the caller is on
    pub role: Role,
    /// Caller choices
    pub options: RedeemOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RedeemSpend {
    Payout,
    HtlcClaim(Option<Preimage>),
    HtlcRefund,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RedeemInput {
    vout: u32,
    value: u64,
    script_code: ScriptBuf,
    spend: RedeemSpend,
}

/// Transaction sweeping a confirmed Settle to one party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemTx {
    tx: Transaction,
    inputs: Vec<RedeemInput>,
    payment_pk: PublicKey,
    signatures: Vec<ChannelSignature>,
}

impl RedeemTx {
    /// Builds the unsigned Redeem
    ///
    /// Pays `Σ inputs − fee` to the caller's payment key. The lock time is
    /// `block_time` when the funder sweeps HTLCs and zero otherwise.
    ///
    /// # Errors
    /// * `ChannelError::RedeemBelowFee` - If the payout would not exceed the fee
    /// * `ChannelError::BalanceOverflow` - If input values overflow
    pub fn new(params: RedeemParams<'_>, config: &ChannelConfig) -> Result<Self> {
        let channel = params.settle.channel();
        let options = params.options;
        let settled_kind = match params.role {
            Role::Funder => SettleOutputKind::Refund,
            Role::Counterparty => SettleOutputKind::Payment,
        };

        let mut inputs = Vec::new();
        if let Some(output) = params.settle.output(settled_kind) {
            inputs.push(RedeemInput {
                vout: output.vout,
                value: output.value,
                script_code: output.script_code.clone(),
                spend: RedeemSpend::Payout,
            });
        }

        if !options.settled_only {
            for output in params.settle.outputs() {
                let SettleOutputKind::Htlc(hash) = output.kind else {
                    continue;
                };
                let Some(invoice) = channel.offered_payments.get(&hash) else {
                    continue;
                };
                let spend = match params.role {
                    Role::Funder => {
                        if !options.include_invalid && !invoice.is_expired(options.block_time) {
                            continue;
                        }
                        RedeemSpend::HtlcRefund
                    }
                    Role::Counterparty => {
                        let secret = params.secrets.get(&hash).copied();
                        if !options.include_invalid && secret.is_none() {
                            continue;
                        }
                        RedeemSpend::HtlcClaim(secret)
                    }
                };
                inputs.push(RedeemInput {
                    vout: output.vout,
                    value: output.value,
                    script_code: output.script_code.clone(),
                    spend,
                });
            }
        }

        let total = inputs.iter().try_fold(0u64, |total, input| total.checked_add(input.value));
        let total = total.ok_or(ChannelError::BalanceOverflow)?;
        let payout = total.saturating_sub(config.fee_amount);
        if payout <= config.fee_amount {
            return Err(ChannelError::RedeemBelowFee { amount: payout, fee: config.fee_amount }
                .into());
        }

        let lock_time = match params.role {
            Role::Funder if !options.settled_only => LockTime::from_consensus(options.block_time),
            _ => LockTime::ZERO,
        };
        let payment_pk = channel.witness_for(params.role).payment_pk;
        let tx = Transaction {
            version: Version::TWO,
            lock_time,
            input: inputs
                .iter()
                .map(|input| TxIn {
                    previous_output: OutPoint { txid: params.settle_txid, vout: input.vout },
                    script_sig: ScriptBuf::new(),
                    sequence: LOCKTIME_SEQUENCE,
                    witness: Witness::new(),
                })
                .collect(),
            output: vec![TxOut {
                value: Amount::from_sat(payout),
                script_pubkey: build_payout_script(&payment_pk),
            }],
        };

        Ok(Self { tx, inputs, payment_pk, signatures: Vec::new() })
    }

    /// The unsigned template
    pub fn unsigned_transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Amount paid to the caller
    pub fn payout(&self) -> u64 {
        self.tx.output.iter().map(|output| output.value.to_sat()).sum()
    }

    /// Number of Settle outputs swept
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Signs every input with the payment key
    ///
    /// # Errors
    /// * `ProtocolError::CommitmentMismatch` - If `keys` do not own the payout
    pub fn sign(&self, keys: &ChannelKeys) -> Result<Self> {
        let secp = Secp256k1::signing_only();
        if PublicKey::from_secret_key(&secp, keys.payment_key()) != self.payment_pk {
            return Err(ProtocolError::CommitmentMismatch(
                "payment key does not own the redeemed outputs".to_string(),
            )
            .into());
        }
        let signatures = self
            .inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                sign_input(
                    &self.tx,
                    index,
                    &input.script_code,
                    Amount::from_sat(input.value),
                    SigningMode::All,
                    keys.payment_key(),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { signatures, ..self.clone() })
    }

    /// Broadcastable transaction with witnesses attached
    ///
    /// # Errors
    /// * `ProtocolError::MissingSignature` - If [`RedeemTx::sign`] was not called
    pub fn transaction(&self) -> Result<Transaction> {
        if self.signatures.len() != self.inputs.len() {
            return Err(ProtocolError::MissingSignature("redeem".to_string()).into());
        }
        let mut tx = self.tx.clone();
        for ((txin, input), signature) in
            tx.input.iter_mut().zip(&self.inputs).zip(&self.signatures)
        {
            txin.witness = match &input.spend {
                RedeemSpend::Payout => p2wpkh_witness(signature, &self.payment_pk),
                RedeemSpend::HtlcClaim(secret) => {
                    htlc_claim_witness(signature, secret.as_ref(), &input.script_code)
                }
                RedeemSpend::HtlcRefund => htlc_refund_witness(signature, &input.script_code),
            };
        }
        Ok(tx)
    }
}
