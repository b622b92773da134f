//! Hash-time-locked invoices

use crate::btx::timelock::htlc_expired;
use crate::errors::{ChannelError, Result};
use crate::types::{PaymentHash, Preimage};

/// A conditional payment offered inside a channel
///
/// Redeemable by the receiver with the preimage of `payment_hash`, or
/// refundable to the funder once `expiry` has passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    /// Identifier chosen by the issuer
    pub id: u64,
    /// HASH160 of the secret preimage
    pub payment_hash: PaymentHash,
    /// Amount in satoshis
    pub amount: u64,
    /// Absolute expiry as a unix timestamp
    pub expiry: u32,
}

impl Invoice {
    /// Creates an invoice
    ///
    /// # Errors
    /// * `ChannelError::InvalidZeroPayment` - If `amount` is zero
    pub fn new(id: u64, payment_hash: PaymentHash, amount: u64, expiry: u32) -> Result<Self> {
        if amount == 0 {
            return Err(ChannelError::InvalidZeroPayment.into());
        }
        Ok(Self { id, payment_hash, amount, expiry })
    }

    /// Creates an invoice locked to `preimage`
    pub fn for_preimage(id: u64, preimage: &Preimage, amount: u64, expiry: u32) -> Result<Self> {
        Self::new(id, preimage.payment_hash(), amount, expiry)
    }

    /// Whether the offering party may reclaim this payment at `block_time`
    pub fn is_expired(&self, block_time: u32) -> bool {
        htlc_expired(self.expiry, block_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    #[test]
    fn test_invoice_new() {
        let preimage = Preimage([1u8; 32]);
        let invoice = Invoice::for_preimage(1, &preimage, 10_000, 1_500_003_600)
            .expect("invoice creation should succeed");
        assert_eq!(invoice.payment_hash, preimage.payment_hash());
        assert!(!invoice.is_expired(1_500_000_000));
        assert!(invoice.is_expired(1_500_003_600));

        assert!(matches!(
            Invoice::for_preimage(2, &preimage, 0, 1_500_003_600),
            Err(Error::Channel(ChannelError::InvalidZeroPayment))
        ));
    }
}
