//! Signing modes and signature digests
//!
//! Every signature in a channel is produced under an explicit [`SigningMode`].
//! The mode decides whether the digest commits to the outpoint being spent
//! and to the script guarding it:
//!
//! | Mode                   | Prevout | Script | Used by        |
//! |------------------------|---------|--------|----------------|
//! | `All`                  | yes     | yes    | Redeem, Close  |
//! | `AnyPrevOut`           | no      | yes    | Settle         |
//! | `AnyPrevOutAnyScript`  | no      | no     | Update         |
//!
//! An Update signature that commits to neither can be attached to any earlier
//! Update output, which is what lets a newer state supersede an older one
//! without re-signing.

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, Script, Transaction};

use crate::errors::{BtxError, Result};

/// Signature hash mode attached to every channel signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningMode {
    /// BIP-143 SIGHASH_ALL
    All,
    /// Commits to script and amount but not to the outpoint
    AnyPrevOut,
    /// Commits to the amount only, not to the outpoint or script
    AnyPrevOutAnyScript,
}

impl SigningMode {
    /// Flag byte appended to serialized signatures
    pub fn to_u8(self) -> u8 {
        match self {
            SigningMode::All => 0x01,
            SigningMode::AnyPrevOut => 0x41,
            SigningMode::AnyPrevOutAnyScript => 0xc1,
        }
    }

    /// Parses a flag byte
    ///
    /// # Errors
    /// * `BtxError::InvalidSigningMode` - If the flag is not a known mode
    pub fn from_u8(flag: u8) -> Result<Self> {
        match flag {
            0x01 => Ok(SigningMode::All),
            0x41 => Ok(SigningMode::AnyPrevOut),
            0xc1 => Ok(SigningMode::AnyPrevOutAnyScript),
            other => Err(BtxError::InvalidSigningMode(other).into()),
        }
    }

    /// Whether the digest commits to the outpoint being spent
    pub fn commits_to_prevout(self) -> bool {
        matches!(self, SigningMode::All)
    }

    /// Whether the digest commits to the script code
    pub fn commits_to_script(self) -> bool {
        !matches!(self, SigningMode::AnyPrevOutAnyScript)
    }
}

/// An ECDSA signature tagged with the mode that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelSignature {
    /// The ECDSA signature
    pub signature: Signature,
    /// The signing mode
    pub mode: SigningMode,
}

impl ChannelSignature {
    /// Serializes as DER followed by the mode flag byte
    pub fn to_vec(&self) -> Vec<u8> {
        let mut bytes = self.signature.serialize_der().to_vec();
        bytes.push(self.mode.to_u8());
        bytes
    }

    /// Parses DER plus mode flag
    ///
    /// # Errors
    /// * `BtxError::InvalidSignature` - If the bytes are empty or not valid DER
    /// * `BtxError::InvalidSigningMode` - If the flag byte is unknown
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let (flag, der) = bytes
            .split_last()
            .ok_or_else(|| BtxError::InvalidSignature("empty signature".to_string()))?;
        let mode = SigningMode::from_u8(*flag)?;
        let signature =
            Signature::from_der(der).map_err(|e| BtxError::InvalidSignature(e.to_string()))?;
        Ok(Self { signature, mode })
    }
}

/// Computes the digest signed for input `input_index`
///
/// `script_code` is the witness script for P2WSH inputs and the P2PKH
/// script code for P2WPKH inputs. It is ignored by
/// [`SigningMode::AnyPrevOutAnyScript`].
///
/// # Arguments
/// * `tx` - Transaction being signed
/// * `input_index` - Index of the input being signed
/// * `script_code` - Script code of the spent output
/// * `value` - Value of the spent output
/// * `mode` - Signing mode
///
/// # Errors
/// * `BtxError::InputIndexOutOfRange` - If the input does not exist
/// * `BtxError::Sighash` - If BIP-143 hashing fails
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: Amount,
    mode: SigningMode,
) -> Result<Message> {
    let input = tx.input.get(input_index).ok_or(BtxError::InputIndexOutOfRange {
        index: input_index,
        inputs: tx.input.len(),
    })?;

    if mode == SigningMode::All {
        let sighash = SighashCache::new(tx)
            .p2wsh_signature_hash(input_index, script_code, value, EcdsaSighashType::All)
            .map_err(|e| BtxError::Sighash(e.to_string()))?;
        return Ok(Message::from_digest(sighash.to_byte_array()));
    }

    // BIP-143 layout with the prevout and sequence aggregates zeroed and the
    // outpoint omitted.
    let mut preimage = Vec::with_capacity(160);
    preimage.extend_from_slice(&tx.version.0.to_le_bytes());
    preimage.extend_from_slice(&[0u8; 32]);
    preimage.extend_from_slice(&[0u8; 32]);
    if mode.commits_to_script() {
        preimage.extend_from_slice(&serialize(&script_code.to_owned()));
    }
    preimage.extend_from_slice(&value.to_sat().to_le_bytes());
    preimage.extend_from_slice(&input.sequence.to_consensus_u32().to_le_bytes());

    let mut outputs = Vec::new();
    for output in &tx.output {
        outputs.extend_from_slice(&serialize(output));
    }
    preimage.extend_from_slice(sha256d::Hash::hash(&outputs).as_byte_array());

    preimage.extend_from_slice(&tx.lock_time.to_consensus_u32().to_le_bytes());
    preimage.extend_from_slice(&u32::from(mode.to_u8()).to_le_bytes());

    Ok(Message::from_digest(sha256d::Hash::hash(&preimage).to_byte_array()))
}

/// Signs input `input_index` under `mode`
///
/// # Errors
/// See [`signature_hash`].
pub fn sign_input(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: Amount,
    mode: SigningMode,
    secret_key: &SecretKey,
) -> Result<ChannelSignature> {
    let secp = Secp256k1::signing_only();
    let message = signature_hash(tx, input_index, script_code, value, mode)?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    Ok(ChannelSignature { signature, mode })
}

/// Verifies a signature on input `input_index` using the mode it carries
///
/// # Returns
/// * `Ok(true)` - The signature is valid for `public_key`
/// * `Ok(false)` - The signature does not validate
///
/// # Errors
/// See [`signature_hash`].
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: Amount,
    signature: &ChannelSignature,
    public_key: &PublicKey,
) -> Result<bool> {
    let secp = Secp256k1::verification_only();
    let message = signature_hash(tx, input_index, script_code, value, signature.mode)?;
    Ok(secp.verify_ecdsa(&message, &signature.signature, public_key).is_ok())
}
