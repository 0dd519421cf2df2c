//! The consensus unit replica: mempool, proposal, the four-phase
//! ADD_TX → PROPOSE → SIGN → COMMIT protocol, and the deterministic
//! `apply` shared by proposer and validators.
//!
//! Scheduling follows a single-threaded, cooperative, per-entity input
//! queue (see [`EntityInput`]): a replica processes one input to
//! completion before the next, so `apply` never needs to be reentrant or
//! thread-safe on its own.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelId, HtlcSpec};
use crate::crypto::{self, push_u64, Address, CanonicalEncode, Hash32, Signature, Wallet};
use crate::error::EngineError;

use super::frame::Frame;
use super::tx::{canonical_order, Action, EntityTx, Proposal, ProposalStatus, TxPayload, VoteChoice};

/// How an entity is named. See [`EntityId::classify`] for the exact
/// detection rule applied when parsing an arbitrary 66-char hex string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityIdKind {
	Lazy,
	Numbered,
	Named,
}

/// Identifies an entity: either hash-derived from its validator set and
/// threshold (lazy), a small externally-registered ordinal (numbered), or
/// a hash of a human-readable name (named). All three render as a
/// `0x`-prefixed 32-byte hex string; [`EntityId::classify`] recovers
/// which kind a given string is without side information.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub [u8; 32]);

impl EntityId {
	pub fn lazy(validators: &[Address], threshold: u64) -> EntityId {
		let mut sorted: Vec<Address> = validators.to_vec();
		sorted.sort();
		let value = serde_json::json!({
			"threshold": threshold.to_string(),
			"validators": sorted.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
		});
		let canonical = serde_json::to_vec(&value).expect("json values always serialize");
		EntityId(crypto::hash(&canonical))
	}

	/// `n` must be in `[1, 10^6)`, matching the numbered range the
	/// detection rule recognizes on the way back in.
	pub fn numbered(n: u64) -> Result<EntityId, EngineError> {
		if n == 0 || n >= 1_000_000 {
			return Err(EngineError::validation("numbered entity id must be in [1, 1_000_000)"));
		}
		let mut bytes = [0u8; 32];
		bytes[24..].copy_from_slice(&n.to_be_bytes());
		Ok(EntityId(bytes))
	}

	pub fn named(name: &str) -> EntityId {
		EntityId(crypto::hash(name.as_bytes()))
	}

	/// Classify an arbitrary string: a 66-char `0x`-prefixed hex string
	/// whose big-endian integer value lies in `(0, 10^6)` is numbered;
	/// any other 66-char `0x`-prefixed hex string is lazy; anything else
	/// is treated as an ASCII name.
	pub fn classify(s: &str) -> EntityIdKind {
		if s.len() == 66 && s.starts_with("0x") {
			if let Ok(bytes) = hex::decode(&s[2..]) {
				if bytes.len() == 32 {
					let value = u128::from_be_bytes(bytes[16..32].try_into().unwrap());
					let high_zero = bytes[..16].iter().all(|b| *b == 0);
					if high_zero && value > 0 && value < 1_000_000 {
						return EntityIdKind::Numbered;
					}
					return EntityIdKind::Lazy;
				}
			}
		}
		EntityIdKind::Named
	}
}

impl std::fmt::Display for EntityId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

impl FromStr for EntityId {
	type Err = EngineError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let stripped = s.strip_prefix("0x").unwrap_or(s);
		let bytes = hex::decode(stripped)
			.map_err(|e| EngineError::validation(format!("invalid entity id hex: {}", e)))?;
		if bytes.len() != 32 {
			return Err(EngineError::validation("entity id must be 32 bytes"));
		}
		let mut out = [0u8; 32];
		out.copy_from_slice(&bytes);
		Ok(EntityId(out))
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMode {
	ProposerBased,
}

/// Static configuration: who validates, how much weight each carries, and
/// how much weight must agree to commit a frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfig {
	pub validators: Vec<Address>,
	pub shares: BTreeMap<Address, u64>,
	pub threshold: u64,
	pub mode: ConsensusMode,
	pub proposer: Address,
}

impl EntityConfig {
	pub fn total_shares(&self) -> u64 {
		self.shares.values().sum()
	}
}

/// Replicated entity state: everything `apply` reads and writes.
/// Channels effected through consensus (`channel_update`/`htlc_*` txs)
/// live here, indexed by [`ChannelId`], per the arena-of-entities design
/// that avoids a channel holding a cyclic reference back to its entity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EntityState {
	pub height: u64,
	pub timestamp: u64,
	pub messages: Vec<String>,
	pub proposals: BTreeMap<u64, Proposal>,
	pub nonces: BTreeMap<Address, u64>,
	/// `ChannelId` is a raw `[u8; 32]`, which `serde_json` cannot use as a
	/// map key directly (only string/integer keys are allowed there); see
	/// [`hex_channel_map`] for the hex-string encoding used on the wire.
	#[serde(with = "hex_channel_map")]
	pub channels: BTreeMap<ChannelId, Channel>,
	next_proposal_id: u64,
}

/// Serializes a `BTreeMap<ChannelId, Channel>` as a JSON object keyed by
/// the hex encoding of the channel id, since `serde_json` rejects
/// array/tuple map keys (`ChannelId` is `[u8; 32]`).
mod hex_channel_map {
	use std::collections::BTreeMap;

	use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};

	use crate::channel::{Channel, ChannelId};

	pub fn serialize<S: Serializer>(
		map: &BTreeMap<ChannelId, Channel>, serializer: S,
	) -> Result<S::Ok, S::Error> {
		let by_hex: BTreeMap<String, &Channel> =
			map.iter().map(|(id, channel)| (hex::encode(id), channel)).collect();
		by_hex.serialize(serializer)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(
		deserializer: D,
	) -> Result<BTreeMap<ChannelId, Channel>, D::Error> {
		let by_hex: BTreeMap<String, Channel> = BTreeMap::deserialize(deserializer)?;
		by_hex
			.into_iter()
			.map(|(hex_id, channel)| {
				let bytes = hex::decode(&hex_id).map_err(DeError::custom)?;
				if bytes.len() != 32 {
					return Err(DeError::custom("channel id must be 32 bytes"));
				}
				let mut id = [0u8; 32];
				id.copy_from_slice(&bytes);
				Ok((id, channel))
			})
			.collect()
	}
}

impl CanonicalEncode for EntityState {
	fn encode_canonical(&self, buf: &mut Vec<u8>) {
		push_u64(buf, self.height);
		push_u64(buf, self.timestamp);
		push_u64(buf, self.messages.len() as u64);
		for m in &self.messages {
			push_u64(buf, m.len() as u64);
			buf.extend_from_slice(m.as_bytes());
		}
		push_u64(buf, self.nonces.len() as u64);
		for (addr, nonce) in &self.nonces {
			addr.encode_canonical(buf);
			push_u64(buf, *nonce);
		}
		push_u64(buf, self.channels.len() as u64);
		for (id, channel) in &self.channels {
			buf.extend_from_slice(id);
			channel.encode_canonical(buf);
		}
		push_u64(buf, self.proposals.len() as u64);
		for (id, proposal) in &self.proposals {
			push_u64(buf, *id);
			proposal.proposer.encode_canonical(buf);
			buf.push(match proposal.status {
				ProposalStatus::Pending => 0,
				ProposalStatus::Executed => 1,
				ProposalStatus::Rejected => 2,
			});
			push_u64(buf, proposal.votes.len() as u64);
			for (voter, choice) in &proposal.votes {
				voter.encode_canonical(buf);
				buf.push(match choice {
					VoteChoice::Yes => 1,
					VoteChoice::No => 0,
				});
			}
		}
	}
}

pub fn state_hash(state: &EntityState) -> Hash32 {
	crypto::state_hash(state)
}

/// Deterministically apply `txs` (already in canonical order) to `state`,
/// producing the successor state. Transactions with an already-used or
/// out-of-order nonce for their signer are skipped rather than aborting
/// the whole frame, matching the requirement that `apply` is a total,
/// side-effect-free function of its inputs. `height`'s timestamp
/// advances in lockstep with height (there is no separate clock input to
/// `apply`, by construction, since reading a local clock here would break
/// determinism across replicas).
pub fn apply(state: &EntityState, height: u64, txs: &[EntityTx], config: &EntityConfig) -> EntityState {
	let mut next = state.clone();
	next.height = height;
	next.timestamp = height;

	for tx in txs {
		let expected_nonce = next.nonces.get(&tx.signer).map(|n| n + 1).unwrap_or(0);
		if tx.nonce != expected_nonce {
			continue;
		}
		if tx.validate_self_authenticating().is_err() {
			continue;
		}
		next.nonces.insert(tx.signer, tx.nonce);
		apply_one(&mut next, tx);
	}
	resolve_proposals(&mut next, config);
	next
}

fn apply_one(state: &mut EntityState, tx: &EntityTx) {
	match &tx.payload {
		TxPayload::Chat { message } => {
			state.messages.push(format!("{}: {}", tx.signer, message));
		},
		TxPayload::Propose { action } => {
			let id = state.next_proposal_id;
			state.next_proposal_id += 1;
			state.proposals.insert(
				id,
				Proposal {
					id,
					proposer: tx.signer,
					action: action.clone(),
					votes: BTreeMap::new(),
					status: ProposalStatus::Pending,
				},
			);
		},
		TxPayload::Vote { proposal_id, choice } => {
			apply_vote(state, *proposal_id, tx.signer, *choice);
		},
		TxPayload::ChannelUpdate { channel_id, new_state } => {
			let accept = match state.channels.get(channel_id) {
				Some(existing) => new_state.nonce > existing.nonce && new_state.verify(),
				None => new_state.nonce == 0 || new_state.verify(),
			};
			if accept {
				state.channels.insert(*channel_id, new_state.clone());
			}
		},
		TxPayload::HtlcLock { channel_id, from, to, token_id, amount, hashlock, timelock } => {
			if let Some(channel) = state.channels.get(channel_id) {
				if let Ok(updated) = channel.open_htlc(HtlcSpec {
					from: *from,
					to: *to,
					token_id: *token_id,
					amount: *amount,
					hashlock: *hashlock,
					timelock: *timelock,
				}) {
					state.channels.insert(*channel_id, updated);
				}
			}
		},
		TxPayload::HtlcSettle { channel_id, htlc_id, preimage } => {
			if let Some(channel) = state.channels.get(channel_id) {
				if let Ok(updated) = channel.settle_htlc(*htlc_id, preimage, state.timestamp) {
					state.channels.insert(*channel_id, updated);
				}
			}
		},
		TxPayload::HtlcRefund { channel_id, htlc_id } => {
			if let Some(channel) = state.channels.get(channel_id) {
				if let Ok(updated) = channel.refund_htlc(*htlc_id, state.timestamp) {
					state.channels.insert(*channel_id, updated);
				}
			}
		},
	}
}

fn apply_vote(state: &mut EntityState, proposal_id: u64, voter: Address, choice: VoteChoice) {
	let Some(proposal) = state.proposals.get_mut(&proposal_id) else { return };
	if proposal.status != ProposalStatus::Pending {
		return;
	}
	proposal.votes.insert(voter, choice);
}

/// Execute or reject proposals whose vote tally has become conclusive
/// against `config`'s shares and threshold. Separated from `apply_vote`
/// so it can run once per frame after every vote in the batch has been
/// recorded, rather than re-deriving the tally after each individual
/// vote tx.
fn resolve_proposals(state: &mut EntityState, config: &EntityConfig) {
	let total = config.total_shares();
	let ids: Vec<u64> = state.proposals.keys().copied().collect();
	for id in ids {
		let proposal = state.proposals.get(&id).expect("id came from the map");
		if proposal.status != ProposalStatus::Pending {
			continue;
		}
		let yes: u64 = proposal
			.votes
			.iter()
			.filter(|(_, c)| **c == VoteChoice::Yes)
			.filter_map(|(addr, _)| config.shares.get(addr))
			.sum();
		let no: u64 = proposal
			.votes
			.iter()
			.filter(|(_, c)| **c == VoteChoice::No)
			.filter_map(|(addr, _)| config.shares.get(addr))
			.sum();
		if yes >= config.threshold {
			state.proposals.get_mut(&id).unwrap().status = ProposalStatus::Executed;
		} else if total.saturating_sub(no) < config.threshold {
			state.proposals.get_mut(&id).unwrap().status = ProposalStatus::Rejected;
		}
	}
}

/// What a replica's input queue carries: either a client transaction to
/// add to the mempool, or one of the three consensus messages of the
/// four-phase protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EntityInput {
	Tx(EntityTx),
	Proposal(Frame),
	Precommit { height: u64, state_hash: Hash32, signer: Address, signature: Signature },
	Commit { height: u64, state_hash: Hash32, signatures: BTreeMap<Address, Signature> },
}

/// A single entity replica: its config, committed state, mempool, and
/// any in-flight proposal.
#[derive(Clone, Debug)]
pub struct Entity {
	pub id: EntityId,
	pub config: EntityConfig,
	pub state: EntityState,
	pub mempool: Vec<EntityTx>,
	pub proposal: Option<Frame>,
	pub locked_frame: Option<Frame>,
	pub is_proposer: bool,
	mempool_cap: usize,
}

impl Entity {
	pub fn new(id: EntityId, config: EntityConfig, self_address: Address) -> Entity {
		let is_proposer = config.proposer == self_address;
		Entity {
			id,
			config,
			state: EntityState::default(),
			mempool: Vec::new(),
			proposal: None,
			locked_frame: None,
			is_proposer,
			mempool_cap: 10_000,
		}
	}

	pub fn state_hash(&self) -> Hash32 {
		state_hash(&self.state)
	}

	/// ADD_TX: stateless validation only (signature, soft mempool cap), plus
	/// the one piece of local state needed to keep `apply`'s strict
	/// `nonce == expected` check from silently dropping an admitted tx: the
	/// next nonce for `tx.signer` must be exactly one past whichever is
	/// higher of its last committed nonce and its highest already-queued
	/// mempool nonce. A gap or a duplicate is rejected here, before it can
	/// ever be bundled into a frame, skipped by `apply`, and then evicted
	/// from the mempool with no visible effect.
	pub fn add_tx(&mut self, tx: EntityTx) -> Result<(), EngineError> {
		if self.mempool.len() >= self.mempool_cap {
			return Err(EngineError::mempool_full());
		}
		tx.validate_self_authenticating()?;
		let committed = self.state.nonces.get(&tx.signer).copied();
		let highest_pending =
			self.mempool.iter().filter(|existing| existing.signer == tx.signer).map(|existing| existing.nonce).max();
		let expected = match highest_pending {
			Some(n) => n + 1,
			None => committed.map(|n| n + 1).unwrap_or(0),
		};
		if tx.nonce != expected {
			return Err(EngineError::nonce_mismatch(expected, tx.nonce));
		}
		self.mempool.push(tx);
		Ok(())
	}

	/// PROPOSE: only the proposer drafts frames, only when its mempool is
	/// non-empty and no proposal is currently in flight.
	pub fn draft_proposal(&mut self, wallet: &Wallet) -> Result<Frame, EngineError> {
		if !self.is_proposer {
			return Err(EngineError::validation("only the proposer drafts frames"));
		}
		if self.proposal.is_some() {
			return Err(EngineError::validation("a proposal is already in flight"));
		}
		if self.mempool.is_empty() {
			return Err(EngineError::validation("mempool is empty"));
		}

		let mut txs = std::mem::take(&mut self.mempool);
		canonical_order(&mut txs);

		let prev_state_hash = self.state_hash();
		let height = self.state.height + 1;
		let new_state = apply(&self.state, height, &txs, &self.config);
		let new_state_hash = state_hash(&new_state);

		let mut frame = Frame { height, txs, prev_state_hash, new_state_hash, signatures: BTreeMap::new() };
		let sig = crypto::sign(wallet, &Frame::precommit_bytes(height, new_state_hash));
		frame.signatures.insert(wallet.address(), sig);
		self.proposal = Some(frame.clone());
		// The proposer precommits its own frame in the same step it drafts
		// it, so it is locked on `frame` at `height` exactly like a
		// validator that has just signed in SIGN.
		self.locked_frame = Some(frame.clone());
		Ok(frame)
	}

	/// SIGN: a validator re-executes `apply` over the proposed frame's txs
	/// and either signs (returning its precommit) or refuses. Refuses
	/// outright, without re-executing anything, if this replica already
	/// signed a different frame at the same height: `locked_frame` is the
	/// guard against a validator equivocating across two distinct
	/// candidates for one height.
	pub fn review_proposal(&mut self, wallet: &Wallet, frame: &Frame) -> Result<(u64, Hash32, Address, Signature), EngineError> {
		if let Some(locked) = &self.locked_frame {
			if locked.height == frame.height && locked.new_state_hash != frame.new_state_hash {
				return Err(EngineError::state_hash_mismatch(
					"already locked on a different frame at this height",
				));
			}
		}
		if frame.prev_state_hash != self.state_hash() {
			return Err(EngineError::state_hash_mismatch("proposal does not build on our current state"));
		}
		let recomputed = apply(&self.state, frame.height, &frame.txs, &self.config);
		if state_hash(&recomputed) != frame.new_state_hash {
			return Err(EngineError::state_hash_mismatch("recomputed state hash disagrees with proposal"));
		}
		self.proposal = Some(frame.clone());
		self.locked_frame = Some(frame.clone());
		let sig = crypto::sign(wallet, &Frame::precommit_bytes(frame.height, frame.new_state_hash));
		Ok((frame.height, frame.new_state_hash, wallet.address(), sig))
	}

	/// Record a received precommit against the in-flight proposal. Does
	/// not itself check the threshold; call [`Entity::try_commit`] after.
	pub fn record_precommit(&mut self, height: u64, state_hash: Hash32, signer: Address, signature: Signature) -> Result<(), EngineError> {
		let frame = self.proposal.as_mut().ok_or_else(|| EngineError::validation("no proposal in flight"))?;
		if frame.height != height || frame.new_state_hash != state_hash {
			return Err(EngineError::state_hash_mismatch("precommit does not match in-flight proposal"));
		}
		let bytes = Frame::precommit_bytes(height, state_hash);
		if !crypto::verify(&signature, &bytes, signer) {
			return Err(EngineError::invalid_signature("precommit signature invalid"));
		}
		frame.signatures.insert(signer, signature);
		Ok(())
	}

	/// COMMIT: if the in-flight proposal's collected signatures meet
	/// `threshold`, replace state, clear the committed txs from the
	/// mempool, and return the committed frame. Safe to call repeatedly
	/// before threshold is met; returns `None` until it is.
	pub fn try_commit(&mut self) -> Option<Frame> {
		let frame = self.proposal.as_ref()?;
		if frame.signed_share(&self.config.shares) < self.config.threshold {
			return None;
		}
		let frame = self.proposal.take().expect("checked Some above");
		let new_state = apply(&self.state, frame.height, &frame.txs, &self.config);
		debug_assert_eq!(state_hash(&new_state), frame.new_state_hash);
		self.state = new_state;
		let committed_keys: std::collections::BTreeSet<(Address, u64)> =
			frame.txs.iter().map(|t| (t.signer, t.nonce)).collect();
		self.mempool.retain(|t| !committed_keys.contains(&(t.signer, t.nonce)));
		self.locked_frame = None;
		Some(frame)
	}

	/// Apply a commit notice received from the proposer (used by
	/// validators that did not themselves reach `try_commit`, e.g. a
	/// validator that joins the threshold-reaching broadcast late).
	pub fn apply_commit_notice(&mut self, frame: &Frame) -> Result<(), EngineError> {
		if frame.signed_share(&self.config.shares) < self.config.threshold {
			return Err(EngineError::threshold_not_reached(
				frame.signed_share(&self.config.shares) as u128,
				self.config.threshold as u128,
			));
		}
		for (signer, sig) in &frame.signatures {
			let bytes = Frame::precommit_bytes(frame.height, frame.new_state_hash);
			if !crypto::verify(sig, &bytes, *signer) {
				return Err(EngineError::invalid_signature("commit notice carries an invalid signature"));
			}
		}
		let new_state = apply(&self.state, frame.height, &frame.txs, &self.config);
		if state_hash(&new_state) != frame.new_state_hash {
			return Err(EngineError::state_hash_mismatch("commit notice state hash mismatch"));
		}
		self.state = new_state;
		let committed_keys: std::collections::BTreeSet<(Address, u64)> =
			frame.txs.iter().map(|t| (t.signer, t.nonce)).collect();
		self.mempool.retain(|t| !committed_keys.contains(&(t.signer, t.nonce)));
		self.proposal = None;
		self.locked_frame = None;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::consensus::tx::TxPayload;
	use crate::crypto::keypair_from_seed;

	fn three_validators() -> (Wallet, Wallet, Wallet, EntityConfig) {
		let alice = keypair_from_seed(b"alice");
		let bob = keypair_from_seed(b"bob");
		let charlie = keypair_from_seed(b"charlie");
		let mut shares = BTreeMap::new();
		shares.insert(alice.address(), 1);
		shares.insert(bob.address(), 1);
		shares.insert(charlie.address(), 1);
		let config = EntityConfig {
			validators: vec![alice.address(), bob.address(), charlie.address()],
			shares,
			threshold: 2,
			mode: ConsensusMode::ProposerBased,
			proposer: alice.address(),
		};
		(alice, bob, charlie, config)
	}

	#[test]
	fn s4_consensus_commit() {
		let (alice, bob, charlie, config) = three_validators();
		let id = EntityId::lazy(&config.validators, config.threshold);
		let mut alice_replica = Entity::new(id, config.clone(), alice.address());
		let mut bob_replica = Entity::new(id, config.clone(), bob.address());
		let mut charlie_replica = Entity::new(id, config, charlie.address());

		let tx = EntityTx::new(&alice, 0, TxPayload::Chat { message: "hello entity".into() });
		alice_replica.add_tx(tx.clone()).unwrap();

		let frame = alice_replica.draft_proposal(&alice).unwrap();
		assert_eq!(frame.height, 1);

		let (h, hash, signer, sig) = bob_replica.review_proposal(&bob, &frame).unwrap();
		alice_replica.record_precommit(h, hash, signer, sig).unwrap();

		let committed = alice_replica.try_commit().expect("alice + bob share meets threshold 2");
		assert_eq!(committed.height, 1);
		assert_eq!(alice_replica.state.messages.len(), 1);

		// Charlie receives the committed frame late and verifies/advances.
		charlie_replica.apply_commit_notice(&committed).unwrap();
		assert_eq!(charlie_replica.state_hash(), alice_replica.state_hash());
		assert_eq!(charlie_replica.state.messages, alice_replica.state.messages);
	}

	#[test]
	fn s5_byzantine_proposer_frame_is_refused() {
		let (alice, bob, _charlie, config) = three_validators();
		let id = EntityId::lazy(&config.validators, config.threshold);
		let mut bob_replica = Entity::new(id, config, bob.address());

		let tx = EntityTx::new(&alice, 0, TxPayload::Chat { message: "legit".into() });
		let bogus_frame = Frame {
			height: 1,
			txs: vec![tx],
			prev_state_hash: bob_replica.state_hash(),
			// Declares a new_state_hash that does not match applying txs.
			new_state_hash: crypto::hash(b"not the real successor state"),
			signatures: BTreeMap::new(),
		};

		let result = bob_replica.review_proposal(&bob, &bogus_frame);
		assert!(result.is_err());
		assert_eq!(result.unwrap_err().kind, crate::error::ErrorKind::StateHashMismatch);
	}

	#[test]
	fn governance_proposal_executes_on_threshold() {
		let (alice, bob, charlie, config) = three_validators();
		let id = EntityId::lazy(&config.validators, config.threshold);
		let mut entity = Entity::new(id, config, alice.address());

		let propose_tx = EntityTx::new(
			&alice,
			0,
			TxPayload::Propose { action: Action::CollectiveMessage("raise fees".into()) },
		);
		entity.add_tx(propose_tx).unwrap();
		let frame = entity.draft_proposal(&alice).unwrap();
		entity.record_precommit(
			frame.height,
			frame.new_state_hash,
			bob.address(),
			crypto::sign(&bob, &Frame::precommit_bytes(frame.height, frame.new_state_hash)),
		)
		.unwrap();
		entity.try_commit().unwrap();
		assert_eq!(entity.state.proposals[&0].status, ProposalStatus::Pending);

		let vote_yes_bob = EntityTx::new(&bob, 0, TxPayload::Vote { proposal_id: 0, choice: VoteChoice::Yes });
		let vote_yes_charlie =
			EntityTx::new(&charlie, 0, TxPayload::Vote { proposal_id: 0, choice: VoteChoice::Yes });
		entity.add_tx(vote_yes_bob).unwrap();
		entity.add_tx(vote_yes_charlie).unwrap();
		let frame = entity.draft_proposal(&alice).unwrap();
		entity.record_precommit(
			frame.height,
			frame.new_state_hash,
			bob.address(),
			crypto::sign(&bob, &Frame::precommit_bytes(frame.height, frame.new_state_hash)),
		)
		.unwrap();
		entity.try_commit().unwrap();

		assert_eq!(entity.state.proposals[&0].status, ProposalStatus::Executed);
	}

	#[test]
	fn entity_id_classification() {
		let numbered = EntityId::numbered(42).unwrap();
		assert_eq!(EntityId::classify(&numbered.to_string()), EntityIdKind::Numbered);
		let named = EntityId::named("acme-hub");
		assert_eq!(EntityId::classify(&named.to_string()), EntityIdKind::Lazy);
		assert_eq!(EntityId::classify("acme-hub"), EntityIdKind::Named);
		let lazy = EntityId::lazy(&[keypair_from_seed(b"a").address()], 1);
		assert_eq!(EntityId::classify(&lazy.to_string()), EntityIdKind::Lazy);
	}

	#[test]
	fn numbered_range_is_enforced() {
		assert!(EntityId::numbered(0).is_err());
		assert!(EntityId::numbered(1_000_000).is_err());
		assert!(EntityId::numbered(999_999).is_ok());
	}

	#[test]
	fn apply_is_deterministic_across_replicas() {
		let (alice, bob, _charlie, config) = three_validators();
		let id = EntityId::lazy(&config.validators, config.threshold);
		let mut a = Entity::new(id, config.clone(), alice.address());
		let mut b = Entity::new(id, config.clone(), bob.address());

		let tx = EntityTx::new(&alice, 0, TxPayload::Chat { message: "sync".into() });
		let applied_a = apply(&a.state, 1, std::slice::from_ref(&tx), &config);
		let applied_b = apply(&b.state, 1, std::slice::from_ref(&tx), &config);
		assert_eq!(state_hash(&applied_a), state_hash(&applied_b));
		a.state = applied_a;
		b.state = applied_b;
		assert_eq!(a.state_hash(), b.state_hash());
	}

	#[test]
	fn entity_state_json_round_trip_preserves_hash() {
		let (alice, _bob, _charlie, config) = three_validators();
		let tx = EntityTx::new(&alice, 0, TxPayload::Chat { message: "persist me".into() });
		let state = apply(&EntityState::default(), 1, std::slice::from_ref(&tx), &config);

		let json = serde_json::to_vec(&state).unwrap();
		let restored: EntityState = serde_json::from_slice(&json).unwrap();
		assert_eq!(restored.messages, state.messages);
		assert_eq!(state_hash(&restored), state_hash(&state));
	}

	#[test]
	fn entity_state_json_round_trip_preserves_hash_with_channels() {
		use crate::channel::{channel_id, Channel};
		use crate::channel::subchannel::Subchannel;

		let (alice, bob, _charlie, _config) = three_validators();
		let channel =
			Channel::open(alice.address(), bob.address(), vec![Subchannel::new(0, 1_000, 500, 500)])
				.unwrap();
		let id = channel_id(alice.address(), bob.address());

		let mut state = EntityState::default();
		state.channels.insert(id, channel);

		let json = serde_json::to_vec(&state).unwrap();
		let restored: EntityState = serde_json::from_slice(&json).unwrap();
		assert_eq!(restored.channels.len(), 1);
		assert!(restored.channels.contains_key(&id));
		assert_eq!(state_hash(&restored), state_hash(&state));
	}

	#[test]
	fn mempool_full_rejects_additional_tx() {
		let (alice, _bob, _charlie, config) = three_validators();
		let id = EntityId::lazy(&config.validators, config.threshold);
		let mut entity = Entity::new(id, config, alice.address());
		entity.mempool_cap = 1;
		entity.add_tx(EntityTx::new(&alice, 0, TxPayload::Chat { message: "1".into() })).unwrap();
		let err = entity.add_tx(EntityTx::new(&alice, 1, TxPayload::Chat { message: "2".into() })).unwrap_err();
		assert_eq!(err.kind, crate::error::ErrorKind::MempoolFull);
	}
}
