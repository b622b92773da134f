//! Bitcoin transaction builders for channels
//!
//! Each builder is a pure function of a [`PaymentChannel`] snapshot and the
//! channel configuration. Builders return immutable values; signing returns a
//! new value with the signature attached.
//!
//! - [`UpdateTx`]: re-locks the full channel amount under the state's script
//! - [`SettleTx`]: pays out the state's balances after the dispute window
//! - [`RedeemTx`]: sweeps a confirmed Settle's outputs to one party
//! - [`CloseTx`]: cooperative single-step close spending the funding output
//!
//! [`PaymentChannel`]: crate::channel::PaymentChannel

/// Cooperative close transaction
pub mod close;
/// Redeem transaction
pub mod redeem;
/// Settle transaction
pub mod settle;
/// Update transaction
pub mod update;

pub use close::CloseTx;
pub use redeem::{RedeemOptions, RedeemParams, RedeemTx};
pub use settle::{SettleOutput, SettleOutputKind, SettleTx};
pub use update::UpdateTx;

use bitcoin::secp256k1::PublicKey;
use bitcoin::{Amount, Script, Transaction};

use crate::btx::sighash::{verify_input, ChannelSignature, SigningMode};
use crate::errors::{ProtocolError, Result};

/// Checks that `signature` is present, uses `mode` and validates for `public_key`
pub(crate) fn check_signature(
    tx: &Transaction,
    script_code: &Script,
    value: Amount,
    mode: SigningMode,
    signature: Option<&ChannelSignature>,
    public_key: &PublicKey,
    what: &str,
) -> Result<()> {
    let signature =
        signature.ok_or_else(|| ProtocolError::MissingSignature(what.to_string()))?;
    if signature.mode != mode {
        return Err(ProtocolError::SignatureVerificationFailed(format!(
            "{what}: expected {mode:?}, got {:?}",
            signature.mode
        ))
        .into());
    }
    if !verify_input(tx, 0, script_code, value, signature, public_key)? {
        return Err(ProtocolError::SignatureVerificationFailed(what.to_string()).into());
    }
    Ok(())
}
