//! The consensus unit: an immutable, height-ordered batch of transactions
//! with its pre/post state hashes and collected signatures.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::{push_u64, Address, CanonicalEncode, Hash32, Signature};

use super::tx::EntityTx;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
	pub height: u64,
	pub txs: Vec<EntityTx>,
	pub prev_state_hash: Hash32,
	pub new_state_hash: Hash32,
	pub signatures: BTreeMap<Address, Signature>,
}

impl Frame {
	/// The bytes a validator signs when precommitting: `(height,
	/// new_state_hash)`. Deliberately excludes `txs`/`prev_state_hash` from
	/// the signed payload since both are already pinned by
	/// `new_state_hash` (it is defined as the hash of applying `txs` to
	/// the state at `prev_state_hash`).
	pub fn precommit_bytes(height: u64, new_state_hash: Hash32) -> Vec<u8> {
		let mut buf = Vec::with_capacity(40);
		push_u64(&mut buf, height);
		buf.extend_from_slice(&new_state_hash);
		buf
	}

	pub fn signed_share(&self, shares: &BTreeMap<Address, u64>) -> u64 {
		self.signatures.keys().filter_map(|signer| shares.get(signer)).sum()
	}
}

impl CanonicalEncode for Frame {
	fn encode_canonical(&self, buf: &mut Vec<u8>) {
		push_u64(buf, self.height);
		push_u64(buf, self.txs.len() as u64);
		for tx in &self.txs {
			tx.encode_canonical(buf);
		}
		buf.extend_from_slice(&self.prev_state_hash);
		buf.extend_from_slice(&self.new_state_hash);
	}
}
