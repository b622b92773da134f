//! Taproot state and HTLC outputs
//!
//! A taproot state output is a two-leaf tree over an internal key shared by
//! both parties. The update leaf lets any later Update spend it; the settle
//! leaf lets a Settle spend it once the dispute window has passed. Both
//! leaves check a BIP-118 signature made with the internal key itself.
//!
//! Update signatures use [`SigningMode::AnyPrevOutAnyScript`] so they attach
//! to any earlier state. Settle signatures use [`SigningMode::AnyPrevOut`],
//! which commits to the scriptPubkey of the state they were made for: the
//! state number is part of the tree, so a Settle cannot be replayed on
//! another state's output.

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::{schnorr, Keypair, Message, Secp256k1, XOnlyPublicKey};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighash, TapSighashType};
use bitcoin::taproot::{LeafVersion, TapLeafHash, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, Network, Script, ScriptBuf, Transaction, TxOut, Witness};

use crate::btx::script::{
    build_htlc_claim_tapscript, build_htlc_refund_tapscript, build_settle_tapscript,
    build_update_tapscript,
};
use crate::btx::sighash::SigningMode;
use crate::errors::{BtxError, Result};
use crate::types::{PaymentHash, Preimage};

/// Key version of BIP-118 public keys
const ANYPREVOUT_KEY_VERSION: u8 = 0x01;

/// Script path spend without annex
const SCRIPT_PATH_SPEND_TYPE: u8 = 0x02;

/// A BIP-340 signature tagged with the mode that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapscriptSignature {
    /// The Schnorr signature
    pub signature: schnorr::Signature,
    /// The signing mode
    pub mode: SigningMode,
}

impl TapscriptSignature {
    /// Serializes as the 64-byte signature followed by the mode flag byte
    pub fn to_vec(&self) -> Vec<u8> {
        let mut bytes = self.signature.serialize().to_vec();
        bytes.push(self.mode.to_u8());
        bytes
    }

    /// Parses signature plus mode flag
    ///
    /// # Errors
    /// * `BtxError::InvalidSignature` - If the bytes are not 65 long or not a valid signature
    /// * `BtxError::InvalidSigningMode` - If the flag byte is unknown
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let (flag, signature) = match bytes.split_last() {
            Some((flag, signature)) if signature.len() == 64 => (flag, signature),
            _ => {
                return Err(BtxError::InvalidSignature(format!(
                    "tapscript signature must be 65 bytes, got {}",
                    bytes.len()
                ))
                .into())
            }
        };
        let mode = SigningMode::from_u8(*flag)?;
        let signature = schnorr::Signature::from_slice(signature)
            .map_err(|e| BtxError::InvalidSignature(e.to_string()))?;
        Ok(Self { signature, mode })
    }
}

/// Computes the BIP-118 digest signed for input `input_index`
///
/// `spent` is the output the signature is made for. Under
/// [`SigningMode::AnyPrevOut`] the digest commits to its value and
/// scriptPubkey and to the leaf script; under
/// [`SigningMode::AnyPrevOutAnyScript`] it commits to neither.
///
/// # Errors
/// * `BtxError::InputIndexOutOfRange` - If the input does not exist
/// * `BtxError::InvalidSigningMode` - If `mode` is [`SigningMode::All`]
pub fn tapscript_signature_hash(
    tx: &Transaction,
    input_index: usize,
    spent: &TxOut,
    leaf_script: &Script,
    mode: SigningMode,
) -> Result<Message> {
    let input = tx.input.get(input_index).ok_or(BtxError::InputIndexOutOfRange {
        index: input_index,
        inputs: tx.input.len(),
    })?;
    if mode.commits_to_prevout() {
        return Err(BtxError::InvalidSigningMode(mode.to_u8()).into());
    }

    let mut outputs = Vec::new();
    for output in &tx.output {
        outputs.extend_from_slice(&serialize(output));
    }

    let mut engine = TapSighash::engine();
    engine.input(&[0x00]); // epoch
    engine.input(&[mode.to_u8()]);
    engine.input(&tx.version.0.to_le_bytes());
    engine.input(&tx.lock_time.to_consensus_u32().to_le_bytes());
    engine.input(sha256::Hash::hash(&outputs).as_byte_array());
    engine.input(&[SCRIPT_PATH_SPEND_TYPE]);
    if mode.commits_to_script() {
        engine.input(&spent.value.to_sat().to_le_bytes());
        engine.input(&serialize(&spent.script_pubkey));
    }
    engine.input(&input.sequence.to_consensus_u32().to_le_bytes());
    if mode.commits_to_script() {
        let leaf_hash = TapLeafHash::from_script(leaf_script, LeafVersion::TapScript);
        engine.input(leaf_hash.as_byte_array());
    }
    engine.input(&[ANYPREVOUT_KEY_VERSION]);
    engine.input(&u32::MAX.to_le_bytes()); // no OP_CODESEPARATOR

    Ok(Message::from_digest(TapSighash::from_engine(engine).to_byte_array()))
}

/// Signs input `input_index` with the internal key under `mode`
///
/// # Errors
/// See [`tapscript_signature_hash`].
pub fn sign_tapscript(
    tx: &Transaction,
    input_index: usize,
    spent: &TxOut,
    leaf_script: &Script,
    mode: SigningMode,
    keypair: &Keypair,
) -> Result<TapscriptSignature> {
    let secp = Secp256k1::signing_only();
    let message = tapscript_signature_hash(tx, input_index, spent, leaf_script, mode)?;
    let signature = secp.sign_schnorr_no_aux_rand(&message, keypair);
    Ok(TapscriptSignature { signature, mode })
}

/// Verifies a BIP-118 signature against the output actually spent
///
/// # Errors
/// See [`tapscript_signature_hash`].
pub fn verify_tapscript(
    tx: &Transaction,
    input_index: usize,
    spent: &TxOut,
    leaf_script: &Script,
    signature: &TapscriptSignature,
    key: &XOnlyPublicKey,
) -> Result<bool> {
    let secp = Secp256k1::verification_only();
    let message = tapscript_signature_hash(tx, input_index, spent, leaf_script, signature.mode)?;
    Ok(secp.verify_schnorr(&signature.signature, &message, key).is_ok())
}

/// BIP-341 `SIGHASH_DEFAULT` digest for a plain-key leaf such as the HTLC leaves
///
/// # Errors
/// * `BtxError::Sighash` - If `prevouts` does not cover every input
pub fn leaf_signature_hash(
    tx: &Transaction,
    input_index: usize,
    prevouts: &[TxOut],
    leaf_script: &Script,
) -> Result<Message> {
    let leaf_hash = TapLeafHash::from_script(leaf_script, LeafVersion::TapScript);
    let sighash = SighashCache::new(tx)
        .taproot_script_spend_signature_hash(
            input_index,
            &Prevouts::All(prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(|e| BtxError::Sighash(e.to_string()))?;
    Ok(Message::from_digest(sighash.to_byte_array()))
}

fn two_leaf_tree(
    internal_key: XOnlyPublicKey,
    first: &ScriptBuf,
    second: &ScriptBuf,
) -> Result<TaprootSpendInfo> {
    let secp = Secp256k1::verification_only();
    TaprootBuilder::new()
        .add_leaf(1, first.clone())
        .and_then(|builder| builder.add_leaf(1, second.clone()))
        .map_err(|e| BtxError::Taproot(e.to_string()))?
        .finalize(&secp, internal_key)
        .map_err(|_| BtxError::Taproot("script tree is incomplete".to_string()).into())
}

fn leaf_witness(
    spend_info: &TaprootSpendInfo,
    stack: Vec<Vec<u8>>,
    leaf_script: &ScriptBuf,
) -> Result<Witness> {
    let control_block = spend_info
        .control_block(&(leaf_script.clone(), LeafVersion::TapScript))
        .ok_or_else(|| BtxError::Taproot("leaf is not part of the tree".to_string()))?;
    let mut witness = Witness::new();
    for item in stack {
        witness.push(item);
    }
    witness.push(leaf_script.as_bytes());
    witness.push(control_block.serialize());
    Ok(witness)
}

/// Taproot output of one channel state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaprootState {
    spend_info: TaprootSpendInfo,
    update_script: ScriptBuf,
    settle_script: ScriptBuf,
}

impl TaprootState {
    /// Builds the tree of the state locked at `state_lock_time`
    ///
    /// # Arguments
    /// * `internal_key` - Key shared by both parties
    /// * `state_lock_time` - `cltv_start_time + state`
    /// * `dispute_window` - Relative delay in blocks before the settle leaf opens
    ///
    /// # Errors
    /// * `BtxError::Taproot` - If the tree cannot be finalized
    pub fn new(
        internal_key: XOnlyPublicKey,
        state_lock_time: u32,
        dispute_window: u16,
    ) -> Result<Self> {
        let update_script = build_update_tapscript(state_lock_time);
        let settle_script = build_settle_tapscript(dispute_window);
        let spend_info = two_leaf_tree(internal_key, &update_script, &settle_script)?;
        Ok(Self { spend_info, update_script, settle_script })
    }

    /// The internal key the leaves sign with
    pub fn internal_key(&self) -> XOnlyPublicKey {
        self.spend_info.internal_key()
    }

    /// P2TR scriptPubkey
    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr_tweaked(self.spend_info.output_key())
    }

    /// P2TR address
    pub fn address(&self, network: Network) -> Address {
        Address::p2tr_tweaked(self.spend_info.output_key(), network)
    }

    /// Leaf spent by a later Update
    pub fn update_script(&self) -> &Script {
        &self.update_script
    }

    /// Leaf spent by a Settle
    pub fn settle_script(&self) -> &Script {
        &self.settle_script
    }

    /// Witness spending this state through its update leaf
    ///
    /// # Errors
    /// * `BtxError::Taproot` - If the control block cannot be derived
    pub fn update_witness(&self, signature: &TapscriptSignature) -> Result<Witness> {
        leaf_witness(&self.spend_info, vec![signature.to_vec()], &self.update_script)
    }

    /// Witness spending this state through its settle leaf
    ///
    /// # Errors
    /// * `BtxError::Taproot` - If the control block cannot be derived
    pub fn settle_witness(&self, signature: &TapscriptSignature) -> Result<Witness> {
        leaf_witness(&self.spend_info, vec![signature.to_vec()], &self.settle_script)
    }
}

/// Taproot HTLC output with a claim and a refund leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaprootHtlc {
    spend_info: TaprootSpendInfo,
    claim_script: ScriptBuf,
    refund_script: ScriptBuf,
}

impl TaprootHtlc {
    /// Builds the HTLC tree
    ///
    /// # Arguments
    /// * `internal_key` - Key shared by both parties
    /// * `payment_hash` - HASH160 of the preimage
    /// * `claim_pk` - Key of the receiving party, usable with the preimage
    /// * `expiry` - Absolute expiry (unix time)
    /// * `refund_pk` - Key of the offering party, usable after `expiry`
    ///
    /// # Errors
    /// * `BtxError::Taproot` - If the tree cannot be finalized
    pub fn new(
        internal_key: XOnlyPublicKey,
        payment_hash: &PaymentHash,
        claim_pk: &XOnlyPublicKey,
        expiry: u32,
        refund_pk: &XOnlyPublicKey,
    ) -> Result<Self> {
        let claim_script = build_htlc_claim_tapscript(payment_hash, claim_pk);
        let refund_script = build_htlc_refund_tapscript(expiry, refund_pk);
        let spend_info = two_leaf_tree(internal_key, &claim_script, &refund_script)?;
        Ok(Self { spend_info, claim_script, refund_script })
    }

    /// P2TR scriptPubkey
    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr_tweaked(self.spend_info.output_key())
    }

    /// P2TR address
    pub fn address(&self, network: Network) -> Address {
        Address::p2tr_tweaked(self.spend_info.output_key(), network)
    }

    /// Leaf spent with the preimage
    pub fn claim_script(&self) -> &Script {
        &self.claim_script
    }

    /// Leaf spent after expiry
    pub fn refund_script(&self) -> &Script {
        &self.refund_script
    }

    /// Witness claiming the output; a missing preimage pushes an empty item
    ///
    /// # Errors
    /// * `BtxError::Taproot` - If the control block cannot be derived
    pub fn claim_witness(
        &self,
        signature: &schnorr::Signature,
        preimage: Option<&Preimage>,
    ) -> Result<Witness> {
        let preimage = preimage.map(|p| p.0.to_vec()).unwrap_or_default();
        let stack = vec![signature.serialize().to_vec(), preimage];
        leaf_witness(&self.spend_info, stack, &self.claim_script)
    }

    /// Witness refunding the output after expiry
    ///
    /// # Errors
    /// * `BtxError::Taproot` - If the control block cannot be derived
    pub fn refund_witness(&self, signature: &schnorr::Signature) -> Result<Witness> {
        leaf_witness(&self.spend_info, vec![signature.serialize().to_vec()], &self.refund_script)
    }
}
