//! Hub economics: fractional-reserve admission control and exposure
//! tracking across a hub's channels.
//!
//! A hub is an entity that operates many channels and extends credit under
//! a reserve policy: the reserve ratio is a soft admission gate, not a
//! solvency guarantee. Solvency against counterparty default is out of
//! scope here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channel::subchannel::TokenId;
use crate::crypto::Address;
use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
	Low,
	Medium,
	High,
}

/// `max_single_exposure`, `max_total_exposure`, `buffer` bound admission
/// independent of the reserve ratio check.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RiskParameters {
	pub max_single_exposure: u128,
	pub max_total_exposure: u128,
	/// Added to `target_reserve_ratio` when computing the admission cap,
	/// giving the hub headroom below its hard max before the soft gate
	/// bites.
	pub buffer: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hub {
	pub address: Address,
	pub reserves: BTreeMap<TokenId, u128>,
	/// `(0, 1]`.
	pub target_reserve_ratio: f64,
	pub risk_parameters: RiskParameters,
	/// Credit extended to each counterparty, per asset.
	pub exposures: BTreeMap<Address, BTreeMap<TokenId, u128>>,
}

impl Hub {
	pub fn new(
		address: Address, target_reserve_ratio: f64, risk_parameters: RiskParameters,
	) -> Result<Hub, EngineError> {
		if !(target_reserve_ratio > 0.0 && target_reserve_ratio <= 1.0) {
			return Err(EngineError::validation("target_reserve_ratio must be in (0, 1]"));
		}
		Ok(Hub {
			address,
			reserves: BTreeMap::new(),
			target_reserve_ratio,
			risk_parameters,
			exposures: BTreeMap::new(),
		})
	}

	pub fn reserves_for(&self, token_id: TokenId) -> u128 {
		*self.reserves.get(&token_id).unwrap_or(&0)
	}

	pub fn exposure_of(&self, counterparty: Address, token_id: TokenId) -> u128 {
		self.exposures.get(&counterparty).and_then(|m| m.get(&token_id)).copied().unwrap_or(0)
	}

	pub fn total_exposure(&self, token_id: TokenId) -> u128 {
		self.exposures.values().filter_map(|m| m.get(&token_id)).sum()
	}

	/// `reserves / (target_reserve_ratio + buffer)`.
	pub fn max_total_exposure(&self, token_id: TokenId) -> u128 {
		let denom = self.target_reserve_ratio + self.risk_parameters.buffer;
		((self.reserves_for(token_id) as f64) / denom) as u128
	}

	/// Whether granting `amount` of additional credit to `counterparty` in
	/// `token_id` stays within both the per-counterparty cap and the
	/// reserve-backed aggregate cap.
	pub fn can_provide_liquidity(
		&self, counterparty: Address, token_id: TokenId, amount: u128,
	) -> Result<(), EngineError> {
		let single = self.exposure_of(counterparty, token_id) + amount;
		if single > self.risk_parameters.max_single_exposure {
			return Err(EngineError::credit_exceeded(format!(
				"single-counterparty exposure {} exceeds max {}",
				single, self.risk_parameters.max_single_exposure
			)));
		}
		let total = self.total_exposure(token_id) + amount;
		let cap = self.max_total_exposure(token_id).min(self.risk_parameters.max_total_exposure);
		if total > cap {
			return Err(EngineError::credit_exceeded(format!(
				"total exposure {} would exceed max {}",
				total, cap
			)));
		}
		Ok(())
	}

	/// Admit `amount` of new credit to `counterparty`, incrementing its
	/// exposure. Callers must call [`Hub::can_provide_liquidity`] first;
	/// this does not re-check admission.
	pub fn record_exposure_increase(&mut self, counterparty: Address, token_id: TokenId, amount: u128) {
		*self.exposures.entry(counterparty).or_default().entry(token_id).or_insert(0) += amount;
	}

	/// Release `amount` of previously-recorded exposure (debt paid down or
	/// channel closed). Saturates at zero rather than underflowing.
	pub fn record_exposure_decrease(&mut self, counterparty: Address, token_id: TokenId, amount: u128) {
		if let Some(by_token) = self.exposures.get_mut(&counterparty) {
			if let Some(existing) = by_token.get_mut(&token_id) {
				*existing = existing.saturating_sub(amount);
			}
		}
	}

	pub fn utilization(&self, token_id: TokenId) -> f64 {
		let max = self.max_total_exposure(token_id);
		if max == 0 {
			return 0.0;
		}
		self.total_exposure(token_id) as f64 / max as f64
	}

	pub fn leverage(&self, token_id: TokenId) -> f64 {
		let reserves = self.reserves_for(token_id);
		if reserves == 0 {
			return 0.0;
		}
		self.total_exposure(token_id) as f64 / reserves as f64
	}

	pub fn risk_level(&self, token_id: TokenId) -> RiskLevel {
		let u = self.utilization(token_id);
		if u >= 0.8 {
			RiskLevel::High
		} else if u >= 0.5 {
			RiskLevel::Medium
		} else {
			RiskLevel::Low
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::keypair_from_seed;

	fn hub_with_reserves(reserves: u128, ratio: f64, buffer: f64) -> Hub {
		let addr = keypair_from_seed(b"hub").address();
		let mut hub = Hub::new(
			addr,
			ratio,
			RiskParameters { max_single_exposure: u128::MAX, max_total_exposure: u128::MAX, buffer },
		)
		.unwrap();
		hub.reserves.insert(1, reserves);
		hub
	}

	#[test]
	fn s6_hub_admission_gate() {
		let hub = hub_with_reserves(10_000, 0.2, 0.05);
		assert_eq!(hub.max_total_exposure(1), 40_000);
		let counterparty = keypair_from_seed(b"merchant").address();
		assert!(hub.can_provide_liquidity(counterparty, 1, 50_000).is_err());
		assert!(hub.can_provide_liquidity(counterparty, 1, 30_000).is_ok());
	}

	#[test]
	fn exposure_increase_and_decrease_roundtrip() {
		let mut hub = hub_with_reserves(10_000, 0.2, 0.05);
		let counterparty = keypair_from_seed(b"merchant").address();
		hub.record_exposure_increase(counterparty, 1, 1_000);
		assert_eq!(hub.exposure_of(counterparty, 1), 1_000);
		hub.record_exposure_decrease(counterparty, 1, 400);
		assert_eq!(hub.exposure_of(counterparty, 1), 600);
		hub.record_exposure_decrease(counterparty, 1, 10_000);
		assert_eq!(hub.exposure_of(counterparty, 1), 0);
	}

	#[test]
	fn risk_level_thresholds() {
		let mut hub = hub_with_reserves(1_000, 1.0, 0.0);
		let counterparty = keypair_from_seed(b"merchant").address();
		assert_eq!(hub.risk_level(1), RiskLevel::Low);
		hub.record_exposure_increase(counterparty, 1, 600);
		assert_eq!(hub.risk_level(1), RiskLevel::Medium);
		hub.record_exposure_increase(counterparty, 1, 250);
		assert_eq!(hub.risk_level(1), RiskLevel::High);
	}

	#[test]
	fn single_counterparty_cap_enforced_independent_of_total() {
		let addr = keypair_from_seed(b"hub").address();
		let mut hub = Hub::new(
			addr,
			0.2,
			RiskParameters { max_single_exposure: 500, max_total_exposure: u128::MAX, buffer: 0.05 },
		)
		.unwrap();
		hub.reserves.insert(1, 1_000_000);
		let counterparty = keypair_from_seed(b"merchant").address();
		assert!(hub.can_provide_liquidity(counterparty, 1, 500).is_ok());
		assert!(hub.can_provide_liquidity(counterparty, 1, 501).is_err());
	}
}
