//! Per-asset state within a bilateral channel.

use serde::{Deserialize, Serialize};

use crate::crypto::{push_i128, push_u128, push_u64, CanonicalEncode};
use crate::error::EngineError;

/// Integer asset identifier.
pub type TokenId = u64;

/// One asset's slice of a bilateral channel.
///
/// Effective balance = `ondelta + offdelta`. Positive means the right
/// participant owes the left; negative means the left owes the right.
/// Invariant: `-left_credit_limit <= ondelta + offdelta <= collateral +
/// right_credit_limit`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subchannel {
	pub token_id: TokenId,
	pub collateral: u128,
	pub ondelta: i128,
	pub offdelta: i128,
	pub left_credit_limit: u128,
	pub right_credit_limit: u128,
}

impl Subchannel {
	pub fn new(token_id: TokenId, collateral: u128, left_credit_limit: u128, right_credit_limit: u128) -> Self {
		Self { token_id, collateral, ondelta: 0, offdelta: 0, left_credit_limit, right_credit_limit }
	}

	/// `ondelta + offdelta`.
	pub fn balance(&self) -> i128 {
		self.ondelta + self.offdelta
	}

	/// Lower bound the balance may reach: `-left_credit_limit`.
	pub fn lower_bound(&self) -> i128 {
		-(self.left_credit_limit as i128)
	}

	/// Upper bound the balance may reach: `collateral + right_credit_limit`.
	pub fn upper_bound(&self) -> i128 {
		self.collateral as i128 + self.right_credit_limit as i128
	}

	/// Check the credit-bounds invariant against a hypothetical balance,
	/// without mutating `self`.
	pub fn check_bounds(&self, hypothetical_balance: i128) -> Result<(), EngineError> {
		if hypothetical_balance < self.lower_bound() {
			return Err(EngineError::credit_exceeded(format!(
				"balance {} below lower bound {} for token {}",
				hypothetical_balance,
				self.lower_bound(),
				self.token_id
			)));
		}
		if hypothetical_balance > self.upper_bound() {
			return Err(EngineError::credit_exceeded(format!(
				"balance {} above upper bound {} for token {}",
				hypothetical_balance,
				self.upper_bound(),
				self.token_id
			)));
		}
		Ok(())
	}

	/// Remaining capacity for the left participant to receive (pay into)
	/// this subchannel before hitting the right's credit limit, i.e. how
	/// much `offdelta` can still decrease.
	pub fn left_receive_capacity(&self) -> u128 {
		(self.balance() - self.lower_bound()).max(0) as u128
	}

	/// Remaining capacity for the right participant to receive, i.e. how
	/// much `offdelta` can still increase before the upper bound.
	pub fn right_receive_capacity(&self) -> u128 {
		(self.upper_bound() - self.balance()).max(0) as u128
	}
}

impl CanonicalEncode for Subchannel {
	fn encode_canonical(&self, buf: &mut Vec<u8>) {
		push_u64(buf, self.token_id);
		push_u128(buf, self.collateral);
		push_i128(buf, self.ondelta);
		push_i128(buf, self.offdelta);
		push_u128(buf, self.left_credit_limit);
		push_u128(buf, self.right_credit_limit);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bounds_follow_invariant() {
		let sc = Subchannel::new(1, 1000, 500, 100);
		assert_eq!(sc.lower_bound(), -500);
		assert_eq!(sc.upper_bound(), 1100);
		assert!(sc.check_bounds(-500).is_ok());
		assert!(sc.check_bounds(1100).is_ok());
		assert!(sc.check_bounds(-501).is_err());
		assert!(sc.check_bounds(1101).is_err());
	}

	#[test]
	fn receive_capacities() {
		let sc = Subchannel::new(1, 1000, 500, 100);
		assert_eq!(sc.left_receive_capacity(), 500);
		assert_eq!(sc.right_receive_capacity(), 1100);
	}
}
