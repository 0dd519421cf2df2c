//! The network boundary: `Transport` is the only place a replica sends or
//! receives bytes. Kept as a trait so tests can run the protocol
//! in-process (per [`InMemoryTransport`]) while a real deployment plugs
//! in whatever reliable, in-order point-to-point channel it has between
//! validators — network transport is explicitly assumed reliable in
//! order between pairs, with re-sync on reconnect handled above this
//! layer, not inside it.

use std::collections::{BTreeMap, VecDeque};

use super::entity::EntityInput;
use crate::crypto::Address;

/// Send/receive primitive for one validator's messages to its peers.
/// Implementations own delivery; they do not interpret `EntityInput`.
pub trait Transport {
	fn send(&mut self, to: Address, input: EntityInput);
	fn broadcast(&mut self, to: &[Address], input: EntityInput) {
		for addr in to {
			self.send(*addr, input.clone());
		}
	}
	fn recv(&mut self, who: Address) -> Option<EntityInput>;
}

/// An in-process transport: each validator has an inbox queue; `send`
/// pushes, `recv` pops FIFO. Used by tests and by single-process
/// simulations of a multi-validator entity.
#[derive(Default)]
pub struct InMemoryTransport {
	inboxes: BTreeMap<Address, VecDeque<EntityInput>>,
}

impl InMemoryTransport {
	pub fn new() -> Self {
		InMemoryTransport { inboxes: BTreeMap::new() }
	}

	pub fn pending_for(&self, who: Address) -> usize {
		self.inboxes.get(&who).map(VecDeque::len).unwrap_or(0)
	}
}

impl Transport for InMemoryTransport {
	fn send(&mut self, to: Address, input: EntityInput) {
		self.inboxes.entry(to).or_default().push_back(input);
	}

	fn recv(&mut self, who: Address) -> Option<EntityInput> {
		self.inboxes.get_mut(&who).and_then(VecDeque::pop_front)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::consensus::entity::EntityInput;
	use crate::consensus::tx::{EntityTx, TxPayload};
	use crate::crypto::keypair_from_seed;

	#[test]
	fn messages_deliver_fifo_per_recipient() {
		let mut bus = InMemoryTransport::new();
		let alice = keypair_from_seed(b"alice");
		let bob_addr = keypair_from_seed(b"bob").address();
		let tx1 = EntityTx::new(&alice, 0, TxPayload::Chat { message: "1".into() });
		let tx2 = EntityTx::new(&alice, 1, TxPayload::Chat { message: "2".into() });
		bus.send(bob_addr, EntityInput::Tx(tx1));
		bus.send(bob_addr, EntityInput::Tx(tx2));
		assert_eq!(bus.pending_for(bob_addr), 2);
		match bus.recv(bob_addr) {
			Some(EntityInput::Tx(tx)) => assert_eq!(tx.nonce, 0),
			_ => panic!("expected a tx"),
		}
		match bus.recv(bob_addr) {
			Some(EntityInput::Tx(tx)) => assert_eq!(tx.nonce, 1),
			_ => panic!("expected a tx"),
		}
		assert!(bus.recv(bob_addr).is_none());
	}
}
