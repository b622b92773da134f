//! Shared helpers for node tests

use super::L2Node;
use crate::channel::invoice::Invoice;
use crate::channel::test_utils::test_config;
use crate::types::PeerId;

/// Identifier of the funding node
pub const FUNDER: PeerId = PeerId(1);
/// Identifier of the receiving node
pub const COUNTERPARTY: PeerId = PeerId(2);
/// Block time used by node tests
pub const NOW: u32 = 1_500_000_000;

/// Two nodes with an open state-0 channel between them
pub fn open_pair() -> (L2Node, L2Node) {
    let mut funder = L2Node::new(FUNDER, test_config());
    let mut counterparty = L2Node::new(COUNTERPARTY, test_config());
    let proposal = funder.propose_channel(COUNTERPARTY).expect("propose should succeed");
    let joined = counterparty.join_channel(FUNDER, &proposal).expect("join should succeed");
    funder.create_channel(COUNTERPARTY, &joined).expect("create should succeed");
    (funder, counterparty)
}

/// Runs a full payment handshake for a fresh invoice issued by the counterparty
pub fn pay(funder: &mut L2Node, counterparty: &mut L2Node, id: u64, amount: u64) -> Invoice {
    let invoice = counterparty
        .create_invoice(id, amount, NOW + 3_600)
        .expect("invoice should be created");
    let proposal = funder.propose_payment(COUNTERPARTY, &invoice).expect("propose payment");
    let receipt = counterparty.receive_payment(FUNDER, &proposal).expect("receive payment");
    funder.confirm_payment(COUNTERPARTY, &receipt).expect("confirm payment");
    invoice
}
