//! In-memory regtest chain for the end-to-end tests
//!
//! Enforces what the channel transactions depend on: absolute lock times,
//! BIP-68 relative lock times, P2WPKH, P2WSH and P2TR script path spends
//! signed in any of the channel signing modes, value conservation and
//! double-spend detection. Scripts run through a small interpreter covering
//! the opcodes used by the update and HTLC scripts and their tapscript leaves.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Once;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::opcodes::all::*;
use bitcoin::opcodes::Opcode;
use bitcoin::script::Instruction;
use bitcoin::secp256k1::{schnorr, PublicKey, Secp256k1, XOnlyPublicKey};
use bitcoin::taproot::ControlBlock;
use bitcoin::transaction::Version;
use bitcoin::{Amount, CompressedPublicKey, OutPoint, Script, ScriptBuf, Sequence};
use bitcoin::{Transaction, TxIn, TxOut, Txid, Witness};
use eltoo_channel::btx::script::{
    build_p2pkh_script_code, detect_script_type, to_p2wsh, ScriptType,
};
use eltoo_channel::btx::sighash::{signature_hash, ChannelSignature};
use eltoo_channel::btx::taproot::{leaf_signature_hash, verify_tapscript, TapscriptSignature};
use eltoo_channel::btx::timelock::validate_csv_timelock;
use eltoo_channel::{BroadcastError, ChainAdapter};

/// Tip height of a fresh chain
pub const START_HEIGHT: u32 = 200;
/// Tip time of a fresh chain
pub const START_TIME: u32 = 1_500_000_000;
/// Seconds between blocks
pub const BLOCK_INTERVAL: u32 = 600;

const LOCK_TIME_THRESHOLD: u32 = 500_000_000;
const SEQUENCE_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_MASK: u32 = 0x0000_ffff;

static INIT: Once = Once::new();

/// Installs the test log subscriber once per test binary
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("eltoo_channel=debug,info")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Anyone-can-spend script used for wallet coins
pub fn op_true() -> ScriptBuf {
    ScriptBuf::from_bytes(vec![OP_PUSHNUM_1.to_u8()])
}

/// Formats satoshi amounts with thousands separators
pub fn format_sats(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Clone)]
struct Coin {
    output: TxOut,
    height: Option<u32>,
}

/// A single-node chain with a mempool that is mined on demand
#[derive(Debug)]
pub struct RegtestChain {
    height: u32,
    time: u32,
    utxos: HashMap<OutPoint, Coin>,
    mempool: Vec<Txid>,
    mempool_spends: HashSet<OutPoint>,
    confirmed: HashMap<Txid, u32>,
    coins_created: u32,
}

impl Default for RegtestChain {
    fn default() -> Self {
        Self::new()
    }
}

impl RegtestChain {
    /// Creates a chain at [`START_HEIGHT`] and [`START_TIME`]
    pub fn new() -> Self {
        Self {
            height: START_HEIGHT,
            time: START_TIME,
            utxos: HashMap::new(),
            mempool: Vec::new(),
            mempool_spends: HashSet::new(),
            confirmed: HashMap::new(),
            coins_created: 0,
        }
    }

    /// Creates a confirmed anyone-can-spend coin worth `value`
    pub fn fund(&mut self, value: u64) -> OutPoint {
        self.coins_created += 1;
        let coinbase = Transaction {
            version: Version::TWO,
            lock_time: LockTime::from_consensus(self.coins_created),
            input: Vec::new(),
            output: vec![TxOut { value: Amount::from_sat(value), script_pubkey: op_true() }],
        };
        let outpoint = OutPoint { txid: coinbase.compute_txid(), vout: 0 };
        self.utxos.insert(
            outpoint,
            Coin { output: coinbase.output[0].clone(), height: Some(self.height) },
        );
        outpoint
    }

    /// Input spending a coin created by [`RegtestChain::fund`]
    pub fn wallet_input(outpoint: OutPoint) -> TxIn {
        TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }
    }

    /// Mines `blocks` blocks, confirming the mempool in the first one
    pub fn advance(&mut self, blocks: u32) {
        for _ in 0..blocks {
            self.height += 1;
            self.time += BLOCK_INTERVAL;
            for txid in self.mempool.drain(..) {
                self.confirmed.insert(txid, self.height);
            }
            for coin in self.utxos.values_mut() {
                coin.height.get_or_insert(self.height);
            }
            self.mempool_spends.clear();
        }
    }

    /// Number of confirmations of `txid`, zero if unconfirmed or unknown
    pub fn confirmations(&self, txid: &Txid) -> u32 {
        self.confirmed.get(txid).map(|height| self.height - height + 1).unwrap_or(0)
    }

    /// The unspent output at `outpoint`
    pub fn unspent(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.utxos.get(outpoint).map(|coin| &coin.output)
    }

    /// Checks whether `tx` would be accepted without submitting it
    pub fn test_accept(&self, tx: &Transaction) -> Result<(), BroadcastError> {
        self.validate(tx)
    }

    fn validate(&self, tx: &Transaction) -> Result<(), BroadcastError> {
        if tx.input.is_empty() {
            return Err(BroadcastError::Rejected("no inputs".to_string()));
        }
        let mut coins = Vec::with_capacity(tx.input.len());
        for input in &tx.input {
            if self.mempool_spends.contains(&input.previous_output) {
                return Err(BroadcastError::Conflict(input.previous_output));
            }
            let coin = self
                .utxos
                .get(&input.previous_output)
                .ok_or(BroadcastError::MissingInputs(input.previous_output))?;
            coins.push(coin);
        }

        if !self.is_final(tx) {
            return Err(BroadcastError::NonFinal);
        }
        self.check_sequence_locks(tx, &coins)?;

        let input_value: u64 = coins.iter().map(|coin| coin.output.value.to_sat()).sum();
        let output_value: u64 = tx.output.iter().map(|output| output.value.to_sat()).sum();
        if output_value > input_value {
            return Err(BroadcastError::InsufficientInputValue);
        }

        let prevouts: Vec<TxOut> = coins.iter().map(|coin| coin.output.clone()).collect();
        for index in 0..prevouts.len() {
            verify_input(tx, index, &prevouts)
                .map_err(|reason| BroadcastError::ScriptVerifyFailed { input: index, reason })?;
        }
        Ok(())
    }

    fn is_final(&self, tx: &Transaction) -> bool {
        let lock_time = tx.lock_time.to_consensus_u32();
        if lock_time == 0 || tx.input.iter().all(|input| input.sequence == Sequence::MAX) {
            return true;
        }
        if lock_time < LOCK_TIME_THRESHOLD {
            lock_time <= self.height
        } else {
            lock_time <= self.time
        }
    }

    fn check_sequence_locks(&self, tx: &Transaction, coins: &[&Coin]) -> Result<(), BroadcastError> {
        if tx.version.0 < 2 {
            return Ok(());
        }
        for (input, coin) in tx.input.iter().zip(coins) {
            let sequence = input.sequence.to_consensus_u32();
            if sequence & SEQUENCE_DISABLE_FLAG != 0 {
                continue;
            }
            if sequence & SEQUENCE_TYPE_FLAG != 0 {
                return Err(BroadcastError::Rejected(
                    "time-based relative lock times are not simulated".to_string(),
                ));
            }
            let mature = match coin.height {
                Some(height) => validate_csv_timelock(input.sequence, self.height + 1, height),
                None => sequence & SEQUENCE_MASK == 0,
            };
            if !mature {
                return Err(BroadcastError::NonBip68Final);
            }
        }
        Ok(())
    }
}

impl ChainAdapter for RegtestChain {
    fn submit(&mut self, tx: &Transaction) -> Result<Txid, BroadcastError> {
        self.validate(tx)?;
        let txid = tx.compute_txid();
        for input in &tx.input {
            self.utxos.remove(&input.previous_output);
            self.mempool_spends.insert(input.previous_output);
        }
        for (vout, output) in tx.output.iter().enumerate() {
            self.utxos.insert(
                OutPoint { txid, vout: vout as u32 },
                Coin { output: output.clone(), height: None },
            );
        }
        self.mempool.push(txid);
        Ok(txid)
    }

    fn current_height(&self) -> u32 {
        self.height
    }

    fn current_time(&self) -> u32 {
        self.time
    }
}

fn verify_input(tx: &Transaction, index: usize, prevouts: &[TxOut]) -> Result<(), String> {
    let spent = &prevouts[index];
    match detect_script_type(&spent.script_pubkey) {
        ScriptType::P2WPKH => verify_p2wpkh(tx, index, prevouts),
        ScriptType::P2WSH => verify_p2wsh(tx, index, prevouts),
        ScriptType::P2TR => verify_p2tr(tx, index, prevouts),
        ScriptType::Unknown => {
            let script_pubkey = &spent.script_pubkey;
            Interpreter::segwit(tx, index, prevouts, script_pubkey).run(script_pubkey, Vec::new())
        }
    }
}

fn verify_p2wpkh(tx: &Transaction, index: usize, prevouts: &[TxOut]) -> Result<(), String> {
    let spent = &prevouts[index];
    let witness = &tx.input[index].witness;
    let (Some(sig), Some(pk), 2) = (witness.nth(0), witness.nth(1), witness.len()) else {
        return Err("P2WPKH witness must have two items".to_string());
    };
    let public_key = PublicKey::from_slice(pk).map_err(|e| e.to_string())?;
    let program = ScriptBuf::new_p2wpkh(&CompressedPublicKey(public_key).wpubkey_hash());
    if program != spent.script_pubkey {
        return Err("public key does not match witness program".to_string());
    }
    let script_code = build_p2pkh_script_code(&public_key);
    let interpreter = Interpreter::segwit(tx, index, prevouts, &script_code);
    if interpreter.check_sig(sig, pk)? {
        Ok(())
    } else {
        Err("P2WPKH signature invalid".to_string())
    }
}

fn verify_p2wsh(tx: &Transaction, index: usize, prevouts: &[TxOut]) -> Result<(), String> {
    let spent = &prevouts[index];
    let items: Vec<Vec<u8>> = tx.input[index].witness.iter().map(<[u8]>::to_vec).collect();
    let Some((script_bytes, stack)) = items.split_last() else {
        return Err("empty P2WSH witness".to_string());
    };
    let witness_script = ScriptBuf::from_bytes(script_bytes.clone());
    if to_p2wsh(&witness_script) != spent.script_pubkey {
        return Err("witness script does not match witness program".to_string());
    }
    Interpreter::segwit(tx, index, prevouts, &witness_script).run(&witness_script, stack.to_vec())
}

fn verify_p2tr(tx: &Transaction, index: usize, prevouts: &[TxOut]) -> Result<(), String> {
    let spent = &prevouts[index];
    let items: Vec<Vec<u8>> = tx.input[index].witness.iter().map(<[u8]>::to_vec).collect();
    let [stack @ .., script_bytes, control_bytes] = items.as_slice() else {
        return Err("P2TR key path spends are not simulated".to_string());
    };
    let control_block = ControlBlock::decode(control_bytes).map_err(|e| e.to_string())?;
    let output_key = XOnlyPublicKey::from_slice(&spent.script_pubkey.as_bytes()[2..])
        .map_err(|e| e.to_string())?;
    let leaf_script = ScriptBuf::from_bytes(script_bytes.clone());
    let secp = Secp256k1::verification_only();
    if !control_block.verify_taproot_commitment(&secp, output_key, &leaf_script) {
        return Err("control block does not commit to the leaf".to_string());
    }
    let interpreter = Interpreter {
        tx,
        index,
        prevouts,
        script_code: &leaf_script,
        internal_key: Some(control_block.internal_key),
    };
    interpreter.run(&leaf_script, stack.to_vec())
}

struct Interpreter<'a> {
    tx: &'a Transaction,
    index: usize,
    prevouts: &'a [TxOut],
    script_code: &'a Script,
    /// Set when running a tapscript leaf
    internal_key: Option<XOnlyPublicKey>,
}

impl<'a> Interpreter<'a> {
    fn segwit(
        tx: &'a Transaction,
        index: usize,
        prevouts: &'a [TxOut],
        script_code: &'a Script,
    ) -> Self {
        Self { tx, index, prevouts, script_code, internal_key: None }
    }

    fn value(&self) -> Amount {
        self.prevouts[self.index].value
    }

    fn run(&self, script: &Script, mut stack: Vec<Vec<u8>>) -> Result<(), String> {
        let mut branches: Vec<bool> = Vec::new();
        for instruction in script.instructions() {
            let executing = branches.iter().all(|taken| *taken);
            match instruction.map_err(|e| e.to_string())? {
                Instruction::PushBytes(bytes) => {
                    if executing {
                        stack.push(bytes.as_bytes().to_vec());
                    }
                }
                Instruction::Op(op) => self.step(op, executing, &mut stack, &mut branches)?,
            }
        }
        if !branches.is_empty() {
            return Err("unbalanced conditional".to_string());
        }
        match stack.as_slice() {
            [top] if cast_to_bool(top) => Ok(()),
            [_] => Err("script evaluated to false".to_string()),
            items => Err(format!("stack not clean: {} items", items.len())),
        }
    }

    fn step(
        &self,
        op: Opcode,
        executing: bool,
        stack: &mut Vec<Vec<u8>>,
        branches: &mut Vec<bool>,
    ) -> Result<(), String> {
        match op {
            OP_IF | OP_NOTIF => {
                let mut taken = false;
                if executing {
                    let condition = pop(stack)?;
                    if condition.len() > 1 || (condition.len() == 1 && condition[0] != 1) {
                        return Err("non-minimal IF argument".to_string());
                    }
                    taken = cast_to_bool(&condition) == (op == OP_IF);
                }
                branches.push(taken);
            }
            OP_ELSE => {
                let top = branches.last_mut().ok_or("ELSE without IF")?;
                *top = !*top;
            }
            OP_ENDIF => {
                branches.pop().ok_or("ENDIF without IF")?;
            }
            _ if !executing => {}
            OP_DROP => {
                pop(stack)?;
            }
            OP_HASH160 => {
                let data = pop(stack)?;
                stack.push(hash160::Hash::hash(&data).to_byte_array().to_vec());
            }
            OP_EQUALVERIFY => {
                if pop(stack)? != pop(stack)? {
                    return Err("EQUALVERIFY failed".to_string());
                }
            }
            OP_CHECKSIG => {
                let public_key = pop(stack)?;
                let signature = pop(stack)?;
                let valid = self.check_sig(&signature, &public_key)?;
                stack.push(if valid { vec![1] } else { Vec::new() });
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let valid = self.check_multisig(stack)?;
                if op == OP_CHECKMULTISIGVERIFY {
                    if !valid {
                        return Err("CHECKMULTISIGVERIFY failed".to_string());
                    }
                } else {
                    stack.push(if valid { vec![1] } else { Vec::new() });
                }
            }
            OP_CLTV => self.check_lock_time(stack.last().ok_or("stack underflow")?)?,
            OP_CSV => self.check_sequence(stack.last().ok_or("stack underflow")?)?,
            op if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&op.to_u8()) => {
                stack.push(vec![op.to_u8() - OP_PUSHNUM_1.to_u8() + 1]);
            }
            other => return Err(format!("unsupported opcode {other}")),
        }
        Ok(())
    }

    fn check_sig(&self, signature: &[u8], public_key: &[u8]) -> Result<bool, String> {
        if let Some(internal_key) = self.internal_key {
            return self.check_schnorr(signature, public_key, &internal_key);
        }
        if signature.is_empty() {
            return Ok(false);
        }
        let Ok(signature) = ChannelSignature::from_slice(signature) else {
            return Ok(false);
        };
        let public_key = PublicKey::from_slice(public_key).map_err(|e| e.to_string())?;
        let message =
            signature_hash(self.tx, self.index, self.script_code, self.value(), signature.mode)
                .map_err(|e| e.to_string())?;
        Ok(Secp256k1::verification_only()
            .verify_ecdsa(&message, &signature.signature, &public_key)
            .is_ok())
    }

    /// Tapscript CHECKSIG: the one-byte key 1 is the internal key under BIP-118
    fn check_schnorr(
        &self,
        signature: &[u8],
        public_key: &[u8],
        internal_key: &XOnlyPublicKey,
    ) -> Result<bool, String> {
        if signature.is_empty() {
            return Ok(false);
        }
        let valid = match public_key {
            [0x01] => {
                let signature =
                    TapscriptSignature::from_slice(signature).map_err(|e| e.to_string())?;
                let spent = &self.prevouts[self.index];
                let leaf = self.script_code;
                verify_tapscript(self.tx, self.index, spent, leaf, &signature, internal_key)
                    .map_err(|e| e.to_string())?
            }
            key if key.len() == 32 => {
                let key = XOnlyPublicKey::from_slice(key).map_err(|e| e.to_string())?;
                let signature =
                    schnorr::Signature::from_slice(signature).map_err(|e| e.to_string())?;
                let message =
                    leaf_signature_hash(self.tx, self.index, self.prevouts, self.script_code)
                        .map_err(|e| e.to_string())?;
                Secp256k1::verification_only().verify_schnorr(&signature, &message, &key).is_ok()
            }
            other => return Err(format!("unsupported tapscript key of {} bytes", other.len())),
        };
        if valid {
            Ok(true)
        } else {
            Err("tapscript signature invalid".to_string())
        }
    }

    fn check_multisig(&self, stack: &mut Vec<Vec<u8>>) -> Result<bool, String> {
        let key_count = usize::try_from(script_num(&pop(stack)?)?).map_err(|e| e.to_string())?;
        let mut keys = (0..key_count).map(|_| pop(stack)).collect::<Result<Vec<_>, _>>()?;
        keys.reverse();
        let sig_count = usize::try_from(script_num(&pop(stack)?)?).map_err(|e| e.to_string())?;
        if sig_count > key_count {
            return Err("more signatures than keys".to_string());
        }
        let mut sigs = (0..sig_count).map(|_| pop(stack)).collect::<Result<Vec<_>, _>>()?;
        sigs.reverse();
        if !pop(stack)?.is_empty() {
            return Err("CHECKMULTISIG dummy must be empty".to_string());
        }

        let (mut sig_index, mut key_index) = (0, 0);
        while sig_index < sigs.len() {
            if sigs.len() - sig_index > keys.len() - key_index {
                return Ok(false);
            }
            if self.check_sig(&sigs[sig_index], &keys[key_index])? {
                sig_index += 1;
            }
            key_index += 1;
        }
        Ok(true)
    }

    fn check_lock_time(&self, top: &[u8]) -> Result<(), String> {
        let required = script_num(top)?;
        if required < 0 {
            return Err("negative lock time".to_string());
        }
        let lock_time = i64::from(self.tx.lock_time.to_consensus_u32());
        let threshold = i64::from(LOCK_TIME_THRESHOLD);
        if (required < threshold) != (lock_time < threshold) {
            return Err("lock time type mismatch".to_string());
        }
        if required > lock_time {
            return Err(format!("lock time {lock_time} below required {required}"));
        }
        if self.tx.input[self.index].sequence == Sequence::MAX {
            return Err("input sequence is final".to_string());
        }
        Ok(())
    }

    fn check_sequence(&self, top: &[u8]) -> Result<(), String> {
        let required = script_num(top)?;
        if required < 0 {
            return Err("negative sequence".to_string());
        }
        let required = required as u64 as u32;
        if required & SEQUENCE_DISABLE_FLAG != 0 {
            return Ok(());
        }
        if self.tx.version.0 < 2 {
            return Err("relative lock time requires version 2".to_string());
        }
        let sequence = self.tx.input[self.index].sequence.to_consensus_u32();
        if sequence & SEQUENCE_DISABLE_FLAG != 0 {
            return Err("relative lock time disabled on input".to_string());
        }
        if (required & SEQUENCE_TYPE_FLAG) != (sequence & SEQUENCE_TYPE_FLAG) {
            return Err("relative lock time type mismatch".to_string());
        }
        if (required & SEQUENCE_MASK) > (sequence & SEQUENCE_MASK) {
            return Err(format!(
                "sequence {} below required {}",
                sequence & SEQUENCE_MASK,
                required & SEQUENCE_MASK
            ));
        }
        Ok(())
    }
}

fn pop(stack: &mut Vec<Vec<u8>>) -> Result<Vec<u8>, String> {
    stack.pop().ok_or_else(|| "stack underflow".to_string())
}

fn cast_to_bool(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .enumerate()
        .any(|(i, byte)| *byte != 0 && !(i == bytes.len() - 1 && *byte == 0x80))
}

fn script_num(bytes: &[u8]) -> Result<i64, String> {
    if bytes.len() > 5 {
        return Err(format!("script number too long: {} bytes", bytes.len()));
    }
    let Some(last) = bytes.last() else {
        return Ok(0);
    };
    let mut value = bytes
        .iter()
        .enumerate()
        .fold(0i64, |acc, (i, byte)| acc | (i64::from(*byte) << (8 * i)));
    if last & 0x80 != 0 {
        value &= !(0x80i64 << (8 * (bytes.len() - 1)));
        value = -value;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_numbers_decode() {
        assert_eq!(script_num(&[]), Ok(0));
        assert_eq!(script_num(&[0x14]), Ok(20));
        assert_eq!(script_num(&[0x81]), Ok(-1));
        assert_eq!(script_num(&[0x01, 0x65, 0xcd, 0x1d]), Ok(500_000_001));
        assert!(cast_to_bool(&[0x01]));
        assert!(!cast_to_bool(&[0x00, 0x80]));
    }
}
