//! Hashed time-locked contracts pending within a channel.

use serde::{Deserialize, Serialize};

use crate::crypto::{push_u128, push_u64, CanonicalEncode, Hash32};
use crate::channel::subchannel::TokenId;

pub type HtlcId = u64;

/// Which participant is the payer on this hop: the balance moves from
/// `LeftToRight`'s perspective meaning left pays right, and vice versa.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
	LeftToRight,
	RightToLeft,
}

impl Direction {
	fn tag(self) -> u8 {
		match self {
			Direction::LeftToRight => 0,
			Direction::RightToLeft => 1,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcState {
	Pending,
	Settled,
	Refunded,
}

impl HtlcState {
	fn tag(self) -> u8 {
		match self {
			HtlcState::Pending => 0,
			HtlcState::Settled => 1,
			HtlcState::Refunded => 2,
		}
	}
}

/// A payment conditioned on preimage revelation before `timelock`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Htlc {
	pub id: HtlcId,
	pub token_id: TokenId,
	pub amount: u128,
	pub direction: Direction,
	pub hashlock: Hash32,
	/// Absolute expiry on the monotone clock used by the host (unix
	/// seconds in this implementation).
	pub timelock: u64,
	pub state: HtlcState,
}

impl Htlc {
	pub fn is_pending(&self) -> bool {
		matches!(self.state, HtlcState::Pending)
	}
}

impl CanonicalEncode for Htlc {
	fn encode_canonical(&self, buf: &mut Vec<u8>) {
		push_u64(buf, self.id);
		push_u64(buf, self.token_id);
		push_u128(buf, self.amount);
		buf.push(self.direction.tag());
		buf.extend_from_slice(&self.hashlock);
		push_u64(buf, self.timelock);
		buf.push(self.state.tag());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn direction_tags_are_distinct() {
		assert_ne!(Direction::LeftToRight.tag(), Direction::RightToLeft.tag());
	}
}
