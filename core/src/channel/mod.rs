//! The bilateral credit-line channel engine: asymmetric credit limits,
//! multi-asset subchannels, bilateral signed state, HTLC reservation,
//! settlement and refund.

pub mod htlc;
pub mod subchannel;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::{
	self, push_u64, Address, CanonicalEncode, Hash32, Signature, Wallet,
};
use crate::error::EngineError;

pub use htlc::{Direction, Htlc, HtlcId, HtlcState};
pub use subchannel::{Subchannel, TokenId};

/// Identifies a channel independent of its mutable state: the hash of its
/// canonically-ordered participant pair. Stable across the channel's
/// lifetime, usable as a WAL/storage key.
pub type ChannelId = Hash32;

pub fn channel_id(left: Address, right: Address) -> ChannelId {
	let mut buf = Vec::with_capacity(40);
	left.encode_canonical(&mut buf);
	right.encode_canonical(&mut buf);
	crypto::hash(&buf)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
	/// 0/2 or 1/2 signatures on the current state.
	Negotiating,
	/// 2/2 signatures; may or may not have pending HTLCs (the latter is
	/// derivable from `pending_htlcs` and is not tracked as a separate
	/// status to avoid a redundant invariant to maintain).
	Open,
	/// Close requested; residual HTLCs are being settled or refunded.
	Closing,
	Closed,
	/// Sink: a conflicting co-signed state with a strictly lower nonce was
	/// detected on-chain.
	Disputed,
}

/// A bilateral, asset-multiplexed payment channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
	/// Ordered pair (left, right); `left < right` lexicographically. This
	/// ordering fixes which credit limit belongs to which side.
	pub participants: (Address, Address),
	pub subchannels: BTreeMap<TokenId, Subchannel>,
	pub nonce: u64,
	/// The two most recent co-signatures over the current state hash: slot
	/// 0 is the left participant's, slot 1 the right's. `None` during a
	/// half-signed update.
	pub signatures: [Option<Signature>; 2],
	/// All HTLCs ever opened on this channel, keyed by id. Terminal
	/// (settled/refunded) HTLCs are retained rather than removed so the
	/// HTLC-conservation property can be checked against the full history.
	pub pending_htlcs: BTreeMap<HtlcId, Htlc>,
	pub status: ChannelStatus,
	next_htlc_id: HtlcId,
}

/// Arguments to [`Channel::pay`].
#[derive(Clone, Copy, Debug)]
pub struct PaySpec {
	pub from: Address,
	pub to: Address,
	pub token_id: TokenId,
	pub amount: u128,
}

/// Arguments to [`Channel::open_htlc`].
#[derive(Clone, Copy, Debug)]
pub struct HtlcSpec {
	pub from: Address,
	pub to: Address,
	pub token_id: TokenId,
	pub amount: u128,
	pub hashlock: Hash32,
	pub timelock: u64,
}

/// The final co-signed state emitted for on-chain settlement by
/// [`Channel::close`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClosureIntent {
	pub channel: Channel,
	pub state_hash: Hash32,
}

impl Channel {
	/// Create a new channel from an unordered pair of addresses and the
	/// initial per-asset subchannels. Participants are reordered into
	/// canonical (lexicographic) order; if the caller's `left`/`right`
	/// were given in the opposite order, each subchannel's credit limits
	/// and deltas are flipped to match, so the *meaning* of "left" and
	/// "right" in the subchannel spec (relative to the caller's pair) is
	/// preserved under canonicalization.
	///
	/// Preconditions: `left != right`; every subchannel carries
	/// non-negative collateral and credit limits.
	pub fn open(
		left: Address, right: Address, initial_subchannels: Vec<Subchannel>,
	) -> Result<Channel, EngineError> {
		if left == right {
			return Err(EngineError::validation("channel participants must be distinct"));
		}

		let mut seen = std::collections::BTreeSet::new();
		for sc in &initial_subchannels {
			if !seen.insert(sc.token_id) {
				return Err(EngineError::validation(format!(
					"duplicate token_id {} in initial subchannels",
					sc.token_id
				)));
			}
			if sc.ondelta != 0 || sc.offdelta != 0 {
				return Err(EngineError::validation(
					"genesis subchannels must start at zero balance",
				));
			}
		}

		let canonical_left = left.min(right);
		let canonical_right = left.max(right);
		let flip = canonical_left != left;

		let mut subchannels = BTreeMap::new();
		for sc in initial_subchannels {
			let sc = if flip {
				Subchannel {
					token_id: sc.token_id,
					collateral: sc.collateral,
					ondelta: -sc.ondelta,
					offdelta: -sc.offdelta,
					left_credit_limit: sc.right_credit_limit,
					right_credit_limit: sc.left_credit_limit,
				}
			} else {
				sc
			};
			subchannels.insert(sc.token_id, sc);
		}

		Ok(Channel {
			participants: (canonical_left, canonical_right),
			subchannels,
			nonce: 0,
			signatures: [None, None],
			pending_htlcs: BTreeMap::new(),
			status: ChannelStatus::Negotiating,
			next_htlc_id: 0,
		})
	}

	pub fn left(&self) -> Address {
		self.participants.0
	}

	pub fn right(&self) -> Address {
		self.participants.1
	}

	/// Resolve `from`/`to` (an unordered participant pair naming a payer
	/// and payee) to a canonical [`Direction`]. Errors if either address
	/// isn't a participant, or they name the same side twice.
	fn direction_of(&self, from: Address, to: Address) -> Result<Direction, EngineError> {
		if from == to {
			return Err(EngineError::validation("payer and payee must differ"));
		}
		match (from == self.left(), from == self.right(), to == self.left(), to == self.right()) {
			(true, false, false, true) => Ok(Direction::LeftToRight),
			(false, true, true, false) => Ok(Direction::RightToLeft),
			_ => Err(EngineError::validation("from/to are not this channel's participants")),
		}
	}

	fn subchannel(&self, token_id: TokenId) -> Result<&Subchannel, EngineError> {
		self.subchannels
			.get(&token_id)
			.ok_or_else(|| EngineError::validation(format!("unknown token_id {}", token_id)))
	}

	fn require_open_or_negotiating(&self) -> Result<(), EngineError> {
		match self.status {
			ChannelStatus::Closed | ChannelStatus::Closing | ChannelStatus::Disputed => {
				Err(EngineError::channel_closed(format!("channel status is {:?}", self.status)))
			},
			ChannelStatus::Negotiating | ChannelStatus::Open => Ok(()),
		}
	}

	/// Apply a bilateral payment. Always per-subchannel: there is no
	/// implicit cross-asset netting. Bumps the nonce and clears both
	/// signatures so both sides must re-sign. Rejects a zero-amount
	/// payment; a payment that would exactly equal a bound is accepted.
	pub fn pay(&self, spec: PaySpec) -> Result<Channel, EngineError> {
		self.require_open_or_negotiating()?;
		if spec.amount == 0 {
			return Err(EngineError::validation("zero-amount payment rejected"));
		}
		let direction = self.direction_of(spec.from, spec.to)?;
		let sc = self.subchannel(spec.token_id)?;

		let delta = spec.amount as i128;
		let new_balance = match direction {
			Direction::LeftToRight => sc.balance() + delta,
			Direction::RightToLeft => sc.balance() - delta,
		};
		sc.check_bounds(new_balance)?;

		let mut next = self.clone();
		{
			let sc = next.subchannels.get_mut(&spec.token_id).expect("checked above");
			sc.offdelta = new_balance - sc.ondelta;
		}
		next.nonce += 1;
		next.signatures = [None, None];
		next.status = ChannelStatus::Negotiating;
		Ok(next)
	}

	/// Reserve `amount` against the payer's available credit for an HTLC,
	/// without moving any balance yet. The reservation plus the payer's
	/// existing exposure (current balance plus already-reserved pending
	/// HTLCs in the same direction) must stay within the credit bound
	/// granted to the payer.
	pub fn open_htlc(&self, spec: HtlcSpec) -> Result<Channel, EngineError> {
		self.require_open_or_negotiating()?;
		if spec.amount == 0 {
			return Err(EngineError::validation("zero-amount HTLC rejected"));
		}
		let direction = self.direction_of(spec.from, spec.to)?;
		let sc = self.subchannel(spec.token_id)?;

		let already_reserved: i128 = self
			.pending_htlcs
			.values()
			.filter(|h| h.token_id == spec.token_id && h.direction == direction && h.is_pending())
			.map(|h| h.amount as i128)
			.sum();

		let hypothetical = match direction {
			Direction::LeftToRight => sc.balance() + already_reserved + spec.amount as i128,
			Direction::RightToLeft => sc.balance() - already_reserved - spec.amount as i128,
		};
		sc.check_bounds(hypothetical)?;

		let mut next = self.clone();
		let id = next.next_htlc_id;
		next.next_htlc_id += 1;
		next.pending_htlcs.insert(
			id,
			Htlc {
				id,
				token_id: spec.token_id,
				amount: spec.amount,
				direction,
				hashlock: spec.hashlock,
				timelock: spec.timelock,
				state: HtlcState::Pending,
			},
		);
		next.nonce += 1;
		next.signatures = [None, None];
		next.status = ChannelStatus::Negotiating;
		Ok(next)
	}

	/// Settle a pending HTLC by revealing its preimage. Only valid while
	/// `state == Pending` and `now < timelock`; moves the reserved amount
	/// into `offdelta`.
	pub fn settle_htlc(&self, htlc_id: HtlcId, preimage: &[u8; 32], now: u64) -> Result<Channel, EngineError> {
		let htlc = self
			.pending_htlcs
			.get(&htlc_id)
			.ok_or_else(|| EngineError::validation(format!("unknown htlc {}", htlc_id)))?;
		if !htlc.is_pending() {
			return Err(EngineError::double_release(format!(
				"htlc {} already in terminal state {:?}",
				htlc_id, htlc.state
			)));
		}
		if crypto::hash(preimage) != htlc.hashlock {
			return Err(EngineError::validation("preimage does not match hashlock"));
		}
		if now >= htlc.timelock {
			return Err(EngineError::validation("timelock has passed, settlement window closed"));
		}

		let token_id = htlc.token_id;
		let amount = htlc.amount as i128;
		let direction = htlc.direction;

		let mut next = self.clone();
		{
			let sc = next
				.subchannels
				.get_mut(&token_id)
				.ok_or_else(|| EngineError::validation(format!("unknown token_id {}", token_id)))?;
			let new_balance = match direction {
				Direction::LeftToRight => sc.balance() + amount,
				Direction::RightToLeft => sc.balance() - amount,
			};
			sc.check_bounds(new_balance)?;
			sc.offdelta = new_balance - sc.ondelta;
		}
		next.pending_htlcs.get_mut(&htlc_id).expect("checked above").state = HtlcState::Settled;
		next.nonce += 1;
		next.signatures = [None, None];
		next.status = ChannelStatus::Negotiating;
		Ok(next)
	}

	/// Refund a pending HTLC once its timelock has elapsed. Releases the
	/// reservation without shifting any balance.
	pub fn refund_htlc(&self, htlc_id: HtlcId, now: u64) -> Result<Channel, EngineError> {
		let htlc = self
			.pending_htlcs
			.get(&htlc_id)
			.ok_or_else(|| EngineError::validation(format!("unknown htlc {}", htlc_id)))?;
		if !htlc.is_pending() {
			return Err(EngineError::double_release(format!(
				"htlc {} already in terminal state {:?}",
				htlc_id, htlc.state
			)));
		}
		if now < htlc.timelock {
			return Err(EngineError::validation("timelock has not elapsed yet"));
		}

		let mut next = self.clone();
		next.pending_htlcs.get_mut(&htlc_id).expect("checked above").state = HtlcState::Refunded;
		next.nonce += 1;
		next.signatures = [None, None];
		next.status = ChannelStatus::Negotiating;
		Ok(next)
	}

	/// Compute the canonical state hash (excluding signatures) and sign it
	/// with `wallet`, placing the signature in the slot for whichever
	/// participant `wallet` is. Idempotent: signing the same state twice
	/// with the same wallet produces the same signature in the same slot.
	pub fn sign(&self, wallet: &Wallet) -> Result<Channel, EngineError> {
		let slot = if wallet.address() == self.left() {
			0
		} else if wallet.address() == self.right() {
			1
		} else {
			return Err(EngineError::validation("wallet is not a participant of this channel"));
		};
		let hash = crypto::state_hash(self);
		let sig = crypto::sign(wallet, &hash);
		let mut next = self.clone();
		next.signatures[slot] = Some(sig);
		if next.signatures[0].is_some() && next.signatures[1].is_some() {
			next.status = ChannelStatus::Open;
		}
		Ok(next)
	}

	/// A channel in `Open` status has exactly two valid signatures over
	/// its current hash.
	pub fn verify(&self) -> bool {
		let hash = crypto::state_hash(self);
		let left_ok = match &self.signatures[0] {
			Some(sig) => crypto::verify(sig, &hash, self.left()),
			None => false,
		};
		let right_ok = match &self.signatures[1] {
			Some(sig) => crypto::verify(sig, &hash, self.right()),
			None => false,
		};
		left_ok && right_ok
	}

	/// Emit the final co-signed state for on-chain settlement. Requires
	/// both signatures present and valid.
	pub fn close(&self) -> Result<ClosureIntent, EngineError> {
		if !self.verify() {
			return Err(EngineError::validation(
				"channel is not fully co-signed; cannot emit closure intent",
			));
		}
		Ok(ClosureIntent { channel: self.clone(), state_hash: crypto::state_hash(self) })
	}

	/// Mark the channel as requesting closure: residual pending HTLCs must
	/// still be settled or refunded before `finalize_close`.
	pub fn request_close(&self) -> Result<Channel, EngineError> {
		if !self.verify() {
			return Err(EngineError::validation("channel must be fully co-signed to close"));
		}
		let mut next = self.clone();
		next.status = ChannelStatus::Closing;
		Ok(next)
	}

	/// Transition a closing channel to `Closed` once no HTLC is still
	/// pending.
	pub fn finalize_close(&self) -> Result<Channel, EngineError> {
		if self.status != ChannelStatus::Closing {
			return Err(EngineError::validation("channel is not in Closing status"));
		}
		if self.pending_htlcs.values().any(|h| h.is_pending()) {
			return Err(EngineError::validation("residual HTLCs still pending"));
		}
		let mut next = self.clone();
		next.status = ChannelStatus::Closed;
		Ok(next)
	}

	/// Mark a conflicting co-signed state detected on-chain. Sink state.
	pub fn mark_disputed(&self) -> Channel {
		let mut next = self.clone();
		next.status = ChannelStatus::Disputed;
		next
	}

	/// Reconcile against a counterparty-reported `(nonce, state_hash)` pair
	/// after a reconnect. Same nonce but a different hash indicates a
	/// conflicting, non-converged state and is rejected as
	/// [`crate::error::ErrorKind::NonceMismatch`]; a strictly higher remote
	/// nonce is out of scope here (the caller should request and `sign`
	/// the full remote state instead of relying on this check alone).
	pub fn reconcile(&self, remote_nonce: u64, remote_hash: Hash32) -> Result<(), EngineError> {
		if remote_nonce == self.nonce && remote_hash != crypto::state_hash(self) {
			return Err(EngineError::nonce_mismatch(self.nonce, remote_nonce));
		}
		Ok(())
	}

	pub fn id(&self) -> ChannelId {
		channel_id(self.left(), self.right())
	}
}

impl CanonicalEncode for Channel {
	fn encode_canonical(&self, buf: &mut Vec<u8>) {
		self.left().encode_canonical(buf);
		self.right().encode_canonical(buf);
		push_u64(buf, self.subchannels.len() as u64);
		for sc in self.subchannels.values() {
			sc.encode_canonical(buf);
		}
		push_u64(buf, self.nonce);
		push_u64(buf, self.next_htlc_id);
		push_u64(buf, self.pending_htlcs.len() as u64);
		for htlc in self.pending_htlcs.values() {
			htlc.encode_canonical(buf);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::keypair_from_seed;

	fn wallets() -> (Wallet, Wallet) {
		(keypair_from_seed(b"left-wallet"), keypair_from_seed(b"right-wallet"))
	}

	fn open_two_sided(
		left: Address, right: Address, left_limit: u128, right_limit: u128,
	) -> Channel {
		Channel::open(left, right, vec![Subchannel::new(1, 0, left_limit, right_limit)]).unwrap()
	}

	#[test]
	fn s1_zero_fund_receive() {
		let (hub, maria) = wallets();
		let channel = open_two_sided(hub.address(), maria.address(), 0, 1000);
		let channel = channel
			.pay(PaySpec { from: hub.address(), to: maria.address(), token_id: 1, amount: 50 })
			.unwrap();
		let sc = &channel.subchannels[&1];
		assert_eq!(sc.balance(), 50);
		assert_eq!(sc.right_receive_capacity(), 950);
		assert_eq!(sc.ondelta, 0);
	}

	#[test]
	fn s2_asymmetric_limits_consistent_numbers() {
		// Alice (left) grants Merchant (right) a 100-unit line; Merchant
		// (via left_credit_limit) grants Alice a 5000-unit line. Two small
		// Alice->Merchant payments succeed; a large Merchant->Alice payment
		// that would push the balance below -left_credit_limit is rejected;
		// a smaller one within bounds succeeds.
		let (alice, merchant) = wallets();
		let channel = open_two_sided(alice.address(), merchant.address(), 5000, 100);
		let channel = channel
			.pay(PaySpec { from: alice.address(), to: merchant.address(), token_id: 1, amount: 5 })
			.unwrap();
		assert_eq!(channel.subchannels[&1].balance(), 5);
		let channel = channel
			.pay(PaySpec { from: alice.address(), to: merchant.address(), token_id: 1, amount: 20 })
			.unwrap();
		assert_eq!(channel.subchannels[&1].balance(), 25);

		let rejected = channel.pay(PaySpec {
			from: merchant.address(),
			to: alice.address(),
			token_id: 1,
			amount: 5100,
		});
		assert!(rejected.is_err());

		let channel = channel
			.pay(PaySpec { from: merchant.address(), to: alice.address(), token_id: 1, amount: 50 })
			.unwrap();
		assert_eq!(channel.subchannels[&1].balance(), -25);
	}

	#[test]
	fn zero_amount_rejected() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		let err = channel
			.pay(PaySpec { from: l.address(), to: r.address(), token_id: 1, amount: 0 })
			.unwrap_err();
		assert_eq!(err.kind, crate::error::ErrorKind::Validation);
	}

	#[test]
	fn exact_limit_accepted() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		let channel = channel
			.pay(PaySpec { from: l.address(), to: r.address(), token_id: 1, amount: 100 })
			.unwrap();
		assert_eq!(channel.subchannels[&1].balance(), 100);
	}

	#[test]
	fn sign_and_verify_roundtrip() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		assert!(!channel.verify());
		let channel = channel.sign(&l).unwrap();
		assert_eq!(channel.status, ChannelStatus::Negotiating);
		assert!(!channel.verify());
		let channel = channel.sign(&r).unwrap();
		assert!(channel.verify());
		assert_eq!(channel.status, ChannelStatus::Open);
	}

	#[test]
	fn sign_idempotent_same_slot() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		let once = channel.sign(&l).unwrap();
		let twice = once.sign(&l).unwrap();
		assert_eq!(once.signatures[0], twice.signatures[0]);
	}

	#[test]
	fn pay_clears_signatures_and_bumps_nonce() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		let channel = channel.sign(&l).unwrap().sign(&r).unwrap();
		assert!(channel.verify());
		let channel =
			channel.pay(PaySpec { from: l.address(), to: r.address(), token_id: 1, amount: 1 }).unwrap();
		assert_eq!(channel.nonce, 1);
		assert!(channel.signatures[0].is_none() && channel.signatures[1].is_none());
		assert_eq!(channel.status, ChannelStatus::Negotiating);
	}

	#[test]
	fn htlc_settle_moves_balance_and_refund_does_not() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		let preimage = [7u8; 32];
		let hashlock = crypto::hash(&preimage);
		let channel = channel
			.open_htlc(HtlcSpec {
				from: l.address(),
				to: r.address(),
				token_id: 1,
				amount: 40,
				hashlock,
				timelock: 1000,
			})
			.unwrap();
		assert_eq!(channel.pending_htlcs.len(), 1);
		let settled = channel.settle_htlc(0, &preimage, 500).unwrap();
		assert_eq!(settled.subchannels[&1].balance(), 40);
		assert_eq!(settled.pending_htlcs[&0].state, HtlcState::Settled);

		let other_preimage = [9u8; 32];
		let other_hashlock = crypto::hash(&other_preimage);
		let with_second = settled
			.open_htlc(HtlcSpec {
				from: l.address(),
				to: r.address(),
				token_id: 1,
				amount: 10,
				hashlock: other_hashlock,
				timelock: 10,
			})
			.unwrap();
		let refunded = with_second.refund_htlc(1, 10).unwrap();
		assert_eq!(refunded.subchannels[&1].balance(), 40);
		assert_eq!(refunded.pending_htlcs[&1].state, HtlcState::Refunded);
	}

	#[test]
	fn double_settle_is_double_release() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		let preimage = [1u8; 32];
		let hashlock = crypto::hash(&preimage);
		let channel = channel
			.open_htlc(HtlcSpec {
				from: l.address(),
				to: r.address(),
				token_id: 1,
				amount: 5,
				hashlock,
				timelock: 1000,
			})
			.unwrap();
		let settled = channel.settle_htlc(0, &preimage, 500).unwrap();
		let err = settled.settle_htlc(0, &preimage, 500).unwrap_err();
		assert_eq!(err.kind, crate::error::ErrorKind::DoubleRelease);
		assert!(err.is_fatal());
	}

	#[test]
	fn settle_after_timelock_rejected() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		let preimage = [1u8; 32];
		let hashlock = crypto::hash(&preimage);
		let channel = channel
			.open_htlc(HtlcSpec {
				from: l.address(),
				to: r.address(),
				token_id: 1,
				amount: 5,
				hashlock,
				timelock: 100,
			})
			.unwrap();
		assert!(channel.settle_htlc(0, &preimage, 100).is_err());
		assert!(channel.settle_htlc(0, &preimage, 200).is_err());
	}

	#[test]
	fn wrong_preimage_rejected() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		let preimage = [1u8; 32];
		let hashlock = crypto::hash(&preimage);
		let channel = channel
			.open_htlc(HtlcSpec {
				from: l.address(),
				to: r.address(),
				token_id: 1,
				amount: 5,
				hashlock,
				timelock: 1000,
			})
			.unwrap();
		assert!(channel.settle_htlc(0, &[2u8; 32], 1).is_err());
	}

	#[test]
	fn htlc_reservation_blocks_exceeding_credit() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		let channel = channel
			.open_htlc(HtlcSpec {
				from: l.address(),
				to: r.address(),
				token_id: 1,
				amount: 80,
				hashlock: crypto::hash(b"a"),
				timelock: 1000,
			})
			.unwrap();
		// A second in-flight HTLC in the same direction would, if both
		// settled, push the balance past the upper bound (100).
		let err = channel.open_htlc(HtlcSpec {
			from: l.address(),
			to: r.address(),
			token_id: 1,
			amount: 30,
			hashlock: crypto::hash(b"b"),
			timelock: 1000,
		});
		assert!(err.is_err());
	}

	#[test]
	fn open_canonicalizes_participant_order() {
		let (l, r) = wallets();
		let (a, b) = if l.address() < r.address() { (l.address(), r.address()) } else { (r.address(), l.address()) };
		// Pass participants in reverse of canonical order and check the
		// credit limits follow the original (non-canonical) labeling.
		let channel = Channel::open(b, a, vec![Subchannel::new(1, 0, 7, 9)]).unwrap();
		assert_eq!(channel.left(), a);
		assert_eq!(channel.right(), b);
		// `b` was the caller's "left" with left_credit_limit=7, so after
		// the flip, `a` (canonical left) must carry right_credit_limit=7
		// (the limit that bounds b's/right's debt).
		assert_eq!(channel.subchannels[&1].right_credit_limit, 7);
		assert_eq!(channel.subchannels[&1].left_credit_limit, 9);
	}

	#[test]
	fn reconcile_detects_conflicting_same_nonce_state() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		let other_hash = [0xABu8; 32];
		assert!(channel.reconcile(0, other_hash).is_err());
		assert!(channel.reconcile(0, crypto::state_hash(&channel)).is_ok());
	}

	#[test]
	fn close_requires_full_signatures() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100);
		assert!(channel.close().is_err());
		let channel = channel.sign(&l).unwrap().sign(&r).unwrap();
		let intent = channel.close().unwrap();
		assert_eq!(intent.state_hash, crypto::state_hash(&channel));
	}

	#[test]
	fn json_round_trip_preserves_state_and_hash() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100).sign(&l).unwrap().sign(&r).unwrap();
		let json = serde_json::to_vec(&channel).unwrap();
		let restored: Channel = serde_json::from_slice(&json).unwrap();
		assert_eq!(restored.nonce, channel.nonce);
		assert_eq!(restored.participants, channel.participants);
		assert_eq!(restored.subchannels, channel.subchannels);
		assert_eq!(crypto::state_hash(&restored), crypto::state_hash(&channel));
	}

	#[test]
	fn close_lifecycle() {
		let (l, r) = wallets();
		let channel = open_two_sided(l.address(), r.address(), 100, 100).sign(&l).unwrap().sign(&r).unwrap();
		let closing = channel.request_close().unwrap();
		assert_eq!(closing.status, ChannelStatus::Closing);
		let closed = closing.finalize_close().unwrap();
		assert_eq!(closed.status, ChannelStatus::Closed);
	}
}
