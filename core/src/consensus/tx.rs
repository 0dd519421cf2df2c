//! Entity transactions: the tagged variants the four-phase protocol
//! orders, applies, and replicates.

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelId, HtlcId, TokenId};
use crate::crypto::{
	self, push_u128, push_u64, Address, CanonicalEncode, Hash32, Signature, Wallet,
};
use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteChoice {
	Yes,
	No,
}

/// The effect a proposal executes once it accumulates enough `yes` share.
/// Only `CollectiveMessage` is specified; the variant is extensible to
/// validator-set admin changes, which are out of scope here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
	CollectiveMessage(String),
}

/// The payload-specific fields of an entity transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TxPayload {
	Chat { message: String },
	Propose { action: Action },
	Vote { proposal_id: u64, choice: VoteChoice },
	ChannelUpdate { channel_id: ChannelId, new_state: Channel },
	HtlcLock { channel_id: ChannelId, from: Address, to: Address, token_id: TokenId, amount: u128, hashlock: Hash32, timelock: u64 },
	HtlcSettle { channel_id: ChannelId, htlc_id: HtlcId, preimage: [u8; 32] },
	HtlcRefund { channel_id: ChannelId, htlc_id: HtlcId },
}

impl TxPayload {
	fn tag(&self) -> u8 {
		match self {
			TxPayload::Chat { .. } => 0,
			TxPayload::Propose { .. } => 1,
			TxPayload::Vote { .. } => 2,
			TxPayload::ChannelUpdate { .. } => 3,
			TxPayload::HtlcLock { .. } => 4,
			TxPayload::HtlcSettle { .. } => 5,
			TxPayload::HtlcRefund { .. } => 6,
		}
	}
}

impl CanonicalEncode for TxPayload {
	fn encode_canonical(&self, buf: &mut Vec<u8>) {
		buf.push(self.tag());
		match self {
			TxPayload::Chat { message } => {
				push_u64(buf, message.len() as u64);
				buf.extend_from_slice(message.as_bytes());
			},
			TxPayload::Propose { action } => match action {
				Action::CollectiveMessage(msg) => {
					buf.push(0);
					push_u64(buf, msg.len() as u64);
					buf.extend_from_slice(msg.as_bytes());
				},
			},
			TxPayload::Vote { proposal_id, choice } => {
				push_u64(buf, *proposal_id);
				buf.push(match choice {
					VoteChoice::Yes => 1,
					VoteChoice::No => 0,
				});
			},
			TxPayload::ChannelUpdate { channel_id, new_state } => {
				buf.extend_from_slice(channel_id);
				new_state.encode_canonical(buf);
			},
			TxPayload::HtlcLock { channel_id, from, to, token_id, amount, hashlock, timelock } => {
				buf.extend_from_slice(channel_id);
				from.encode_canonical(buf);
				to.encode_canonical(buf);
				push_u64(buf, *token_id);
				push_u128(buf, *amount);
				buf.extend_from_slice(hashlock);
				push_u64(buf, *timelock);
			},
			TxPayload::HtlcSettle { channel_id, htlc_id, preimage } => {
				buf.extend_from_slice(channel_id);
				push_u64(buf, *htlc_id);
				buf.extend_from_slice(preimage);
			},
			TxPayload::HtlcRefund { channel_id, htlc_id } => {
				buf.extend_from_slice(channel_id);
				push_u64(buf, *htlc_id);
			},
		}
	}
}

/// A self-authenticating transaction: `signature` covers `(signer, nonce,
/// payload)`, so any replica can validate it statelessly without trusting
/// whoever relayed it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityTx {
	pub signer: Address,
	pub nonce: u64,
	pub payload: TxPayload,
	pub signature: Signature,
}

impl EntityTx {
	/// Build and sign a transaction. The signature covers the canonical
	/// encoding of `(signer, nonce, payload)`.
	pub fn new(wallet: &Wallet, nonce: u64, payload: TxPayload) -> EntityTx {
		let mut buf = Vec::new();
		wallet.address().encode_canonical(&mut buf);
		push_u64(&mut buf, nonce);
		payload.encode_canonical(&mut buf);
		let signature = crypto::sign(wallet, &buf);
		EntityTx { signer: wallet.address(), nonce, payload, signature }
	}

	fn signed_bytes(&self) -> Vec<u8> {
		let mut buf = Vec::new();
		self.signer.encode_canonical(&mut buf);
		push_u64(&mut buf, self.nonce);
		self.payload.encode_canonical(&mut buf);
		buf
	}

	/// Stateless validation: the signature actually authenticates this
	/// tx's own fields. Does not check nonce replay (that needs entity
	/// state) or mempool capacity (that's the caller's concern).
	pub fn validate_self_authenticating(&self) -> Result<(), EngineError> {
		if !crypto::verify(&self.signature, &self.signed_bytes(), self.signer) {
			return Err(EngineError::invalid_signature("entity tx signature does not match signer"));
		}
		Ok(())
	}

	pub fn hash(&self) -> Hash32 {
		crypto::hash(&self.signed_bytes())
	}
}

impl CanonicalEncode for EntityTx {
	fn encode_canonical(&self, buf: &mut Vec<u8>) {
		self.signer.encode_canonical(buf);
		push_u64(buf, self.nonce);
		self.payload.encode_canonical(buf);
	}
}

/// The proposer's canonical ordering: ascending by `(signer, nonce,
/// hash)`. Deterministic given the same tx set regardless of arrival
/// order at the proposer's mempool.
pub fn canonical_order(txs: &mut [EntityTx]) {
	txs.sort_by(|a, b| {
		a.signer.cmp(&b.signer).then(a.nonce.cmp(&b.nonce)).then_with(|| a.hash().cmp(&b.hash()))
	});
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
	Pending,
	Executed,
	Rejected,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
	pub id: u64,
	pub proposer: Address,
	pub action: Action,
	pub votes: std::collections::BTreeMap<Address, VoteChoice>,
	pub status: ProposalStatus,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::keypair_from_seed;

	#[test]
	fn tx_signature_roundtrip() {
		let wallet = keypair_from_seed(b"alice");
		let tx = EntityTx::new(&wallet, 0, TxPayload::Chat { message: "hi".into() });
		assert!(tx.validate_self_authenticating().is_ok());
	}

	#[test]
	fn tampered_tx_fails_validation() {
		let wallet = keypair_from_seed(b"alice");
		let mut tx = EntityTx::new(&wallet, 0, TxPayload::Chat { message: "hi".into() });
		tx.nonce = 1;
		assert!(tx.validate_self_authenticating().is_err());
	}

	#[test]
	fn canonical_order_is_deterministic_regardless_of_input_order() {
		let a = keypair_from_seed(b"a");
		let b = keypair_from_seed(b"b");
		let mut first = vec![
			EntityTx::new(&b, 0, TxPayload::Chat { message: "x".into() }),
			EntityTx::new(&a, 0, TxPayload::Chat { message: "y".into() }),
		];
		let mut second = vec![first[1].clone(), first[0].clone()];
		canonical_order(&mut first);
		canonical_order(&mut second);
		let hashes_a: Vec<_> = first.iter().map(|t| t.hash()).collect();
		let hashes_b: Vec<_> = second.iter().map(|t| t.hash()).collect();
		assert_eq!(hashes_a, hashes_b);
	}
}
