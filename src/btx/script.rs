//! Covenant and HTLC script construction
//!
//! This module builds the scripts that lock channel funds and the witness
//! stacks that unlock them. Every builder is deterministic: both parties
//! reconstruct byte-identical scripts from the same public keys and state.

use bitcoin::blockdata::opcodes::all::{
    OP_CHECKMULTISIG, OP_CHECKMULTISIGVERIFY, OP_CHECKSIG, OP_CLTV, OP_CSV, OP_DROP, OP_ELSE,
    OP_ENDIF, OP_EQUALVERIFY, OP_HASH160, OP_IF, OP_NOTIF, OP_PUSHNUM_1,
};
use bitcoin::hashes::Hash;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{PublicKey, XOnlyPublicKey};
use bitcoin::{Address, Network, Script, ScriptBuf, Witness};

use crate::btx::sighash::ChannelSignature;
use crate::types::{PaymentHash, Preimage};

/// Script type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    /// Pay-to-Witness-Public-Key-Hash (P2WPKH)
    P2WPKH,
    /// Pay-to-Witness-Script-Hash (P2WSH)
    P2WSH,
    /// Pay-to-Taproot (P2TR)
    P2TR,
    /// Unknown or unsupported script type
    Unknown,
}

/// Detects the script type from a scriptPubkey
///
/// # Arguments
/// * `script` - The script to analyze
///
/// # Returns
/// The detected script type
pub fn detect_script_type(script: &Script) -> ScriptType {
    let bytes = script.as_bytes();

    // P2WPKH: OP_0 <20 bytes>
    if bytes.len() == 22 && bytes[0] == 0x00 && bytes[1] == 0x14 {
        return ScriptType::P2WPKH;
    }

    // P2WSH: OP_0 <32 bytes>
    if bytes.len() == 34 && bytes[0] == 0x00 && bytes[1] == 0x20 {
        return ScriptType::P2WSH;
    }

    // P2TR: OP_1 <32 bytes>
    if bytes.len() == 34 && bytes[0] == 0x51 && bytes[1] == 0x20 {
        return ScriptType::P2TR;
    }

    ScriptType::Unknown
}

/// Public keys locked into one state's update script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateScriptKeys {
    /// Funder's update key
    pub funder_update: PublicKey,
    /// Counterparty's update key
    pub other_update: PublicKey,
    /// Funder's settle key for this state
    pub funder_settle: PublicKey,
    /// Counterparty's settle key for this state
    pub other_settle: PublicKey,
}

/// Builds the Eltoo update script for one state
///
/// ```text
/// 2 <upd_funder> <upd_other> 2 CHECKMULTISIG
/// NOTIF
///     2 <settle_funder> <settle_other> 2 CHECKMULTISIGVERIFY
///     <dispute_window> CHECKSEQUENCEVERIFY
/// ELSE
///     <state_lock_time> CHECKLOCKTIMEVERIFY
/// ENDIF
/// ```
///
/// The first branch lets any Update whose lock time is at least
/// `state_lock_time` spend the output. The second lets this state's Settle
/// spend it once `dispute_window` blocks have passed.
///
/// # Arguments
/// * `keys` - Update and settle keys of both parties
/// * `dispute_window` - Relative delay in blocks
/// * `state_lock_time` - `cltv_start_time + state`
pub fn build_update_script(
    keys: &UpdateScriptKeys,
    dispute_window: u16,
    state_lock_time: u32,
) -> ScriptBuf {
    Builder::new()
        .push_int(2)
        .push_key(&bitcoin::PublicKey::new(keys.funder_update))
        .push_key(&bitcoin::PublicKey::new(keys.other_update))
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_NOTIF)
        .push_int(2)
        .push_key(&bitcoin::PublicKey::new(keys.funder_settle))
        .push_key(&bitcoin::PublicKey::new(keys.other_settle))
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIGVERIFY)
        .push_int(i64::from(dispute_window))
        .push_opcode(OP_CSV)
        .push_opcode(OP_ELSE)
        .push_int(i64::from(state_lock_time))
        .push_opcode(OP_CLTV)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// Builds an HTLC script
///
/// ```text
/// IF
///     HASH160 <payment_hash> EQUALVERIFY <payment_pk>
/// ELSE
///     <expiry> CHECKLOCKTIMEVERIFY DROP <refund_pk>
/// ENDIF
/// CHECKSIG
/// ```
///
/// # Arguments
/// * `refund_pk` - Key of the offering party, usable after `expiry`
/// * `payment_pk` - Key of the receiving party, usable with the preimage
/// * `payment_hash` - HASH160 of the preimage
/// * `expiry` - Absolute expiry (unix time)
pub fn build_htlc_script(
    refund_pk: &PublicKey,
    payment_pk: &PublicKey,
    payment_hash: &PaymentHash,
    expiry: u32,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_IF)
        .push_opcode(OP_HASH160)
        .push_slice(payment_hash.to_byte_array())
        .push_opcode(OP_EQUALVERIFY)
        .push_key(&bitcoin::PublicKey::new(*payment_pk))
        .push_opcode(OP_ELSE)
        .push_int(i64::from(expiry))
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_key(&bitcoin::PublicKey::new(*refund_pk))
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Builds the update leaf of a taproot state output
///
/// ```text
/// <state_lock_time> CHECKLOCKTIMEVERIFY DROP 1 CHECKSIG
/// ```
///
/// The one-byte key `1` stands for the taproot internal key under BIP-118,
/// so the leaf needs no key material and is the same for every channel.
pub fn build_update_tapscript(state_lock_time: u32) -> ScriptBuf {
    Builder::new()
        .push_int(i64::from(state_lock_time))
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_PUSHNUM_1)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Builds the settle leaf of a taproot state output
///
/// ```text
/// <dispute_window> CHECKSEQUENCEVERIFY DROP 1 CHECKSIG
/// ```
pub fn build_settle_tapscript(dispute_window: u16) -> ScriptBuf {
    Builder::new()
        .push_int(i64::from(dispute_window))
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_PUSHNUM_1)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Builds the claim leaf of a taproot HTLC output
///
/// ```text
/// HASH160 <payment_hash> EQUALVERIFY <claim_pk> CHECKSIG
/// ```
pub fn build_htlc_claim_tapscript(
    payment_hash: &PaymentHash,
    claim_pk: &XOnlyPublicKey,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_HASH160)
        .push_slice(payment_hash.to_byte_array())
        .push_opcode(OP_EQUALVERIFY)
        .push_x_only_key(claim_pk)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Builds the refund leaf of a taproot HTLC output
///
/// ```text
/// <expiry> CHECKLOCKTIMEVERIFY DROP <refund_pk> CHECKSIG
/// ```
pub fn build_htlc_refund_tapscript(expiry: u32, refund_pk: &XOnlyPublicKey) -> ScriptBuf {
    Builder::new()
        .push_int(i64::from(expiry))
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_x_only_key(refund_pk)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// P2WPKH scriptPubkey paying `payment_pk`
pub fn build_payout_script(payment_pk: &PublicKey) -> ScriptBuf {
    let wpkh = bitcoin::CompressedPublicKey(*payment_pk).wpubkey_hash();
    ScriptBuf::new_p2wpkh(&wpkh)
}

/// BIP-143 script code used when signing a P2WPKH input
pub fn build_p2pkh_script_code(payment_pk: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&bitcoin::PublicKey::new(*payment_pk).pubkey_hash())
}

/// Wraps a witness script into its P2WSH scriptPubkey
pub fn to_p2wsh(witness_script: &Script) -> ScriptBuf {
    ScriptBuf::new_p2wsh(&witness_script.wscript_hash())
}

/// P2WSH address of a witness script
pub fn script_address(witness_script: &Script, network: Network) -> Address {
    Address::p2wsh(witness_script, network)
}

/// Witness spending an update output through its update branch
pub fn update_branch_witness(
    funder_sig: &ChannelSignature,
    other_sig: &ChannelSignature,
    update_script: &Script,
) -> Witness {
    Witness::from_slice(&[
        Vec::new(),
        funder_sig.to_vec(),
        other_sig.to_vec(),
        update_script.to_bytes(),
    ])
}

/// Witness spending an update output through its settle branch
///
/// The three empty items make the leading update-key CHECKMULTISIG fail
/// without aborting, selecting the NOTIF branch.
pub fn settle_branch_witness(
    funder_sig: &ChannelSignature,
    other_sig: &ChannelSignature,
    update_script: &Script,
) -> Witness {
    Witness::from_slice(&[
        Vec::new(),
        funder_sig.to_vec(),
        other_sig.to_vec(),
        Vec::new(),
        Vec::new(),
        Vec::new(),
        update_script.to_bytes(),
    ])
}

/// Witness claiming an HTLC output with its preimage
///
/// A missing preimage pushes an empty item, which the script rejects.
pub fn htlc_claim_witness(
    sig: &ChannelSignature,
    preimage: Option<&Preimage>,
    htlc_script: &Script,
) -> Witness {
    let preimage = preimage.map(|p| p.0.to_vec()).unwrap_or_default();
    Witness::from_slice(&[sig.to_vec(), preimage, vec![0x01], htlc_script.to_bytes()])
}

/// Witness refunding an HTLC output after expiry
pub fn htlc_refund_witness(sig: &ChannelSignature, htlc_script: &Script) -> Witness {
    Witness::from_slice(&[sig.to_vec(), Vec::new(), htlc_script.to_bytes()])
}

/// Witness spending a P2WPKH output
pub fn p2wpkh_witness(sig: &ChannelSignature, payment_pk: &PublicKey) -> Witness {
    Witness::from_slice(&[sig.to_vec(), payment_pk.serialize().to_vec()])
}
