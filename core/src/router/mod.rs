//! HTLC multi-hop routing: path selection over channel credit capacity,
//! onion-wrapped per-hop instructions, and atomic lock/settle/refund
//! execution.
//!
//! The channel engine and hub economics are owned per-entity in a real
//! deployment; this module's [`Topology`] is the router's local view of
//! the network's channels, used both to compute a path and (in-process,
//! for a single routing attempt) to apply the locks/settles/refunds of
//! that path atomically. A production host would instead dispatch each
//! hop's lock/settle/refund through its owning entity's consensus input
//! queue; the state transitions themselves are identical either way.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, HtlcSpec, TokenId};
use crate::crypto::{self, Address, Hash32};
use crate::error::EngineError;

/// Minimum gap between one hop's timelock and the next, covering clock
/// skew between replicas plus the settlement window a hop needs to react
/// to a revealed preimage before its own timelock. Zero routing fees (see
/// [`HOP_FEE`]) do not affect this.
pub const TIMELOCK_DELTA: u64 = 40;

/// Flat per-hop routing fee. Fee accounting is specified as zero in this
/// implementation: routing is not monetized in v1, only the destination's
/// requested amount is forwarded unchanged hop to hop.
pub const HOP_FEE: u128 = 0;

/// The router's view of the network: one [`Channel`] per undirected
/// participant pair, keyed by the pair in canonical order.
#[derive(Clone, Debug, Default)]
pub struct Topology {
	channels: BTreeMap<(Address, Address), Channel>,
}

impl Topology {
	pub fn new() -> Self {
		Topology { channels: BTreeMap::new() }
	}

	pub fn insert(&mut self, channel: Channel) {
		self.channels.insert((channel.left(), channel.right()), channel);
	}

	pub fn get(&self, a: Address, b: Address) -> Option<&Channel> {
		let key = if a < b { (a, b) } else { (b, a) };
		self.channels.get(&key)
	}

	fn get_mut(&mut self, a: Address, b: Address) -> Option<&mut Channel> {
		let key = if a < b { (a, b) } else { (b, a) };
		self.channels.get_mut(&key)
	}

	/// Neighbors reachable from `from` that can currently receive `amount`
	/// of `token_id` (i.e. the subchannel's remaining receive capacity on
	/// `from`'s side covers `amount`).
	fn neighbors_with_capacity(&self, from: Address, token_id: TokenId, amount: u128) -> Vec<Address> {
		let mut out = Vec::new();
		for ((l, r), channel) in &self.channels {
			let (other, capacity) = if *l == from {
				(*r, channel.subchannels.get(&token_id).map(|sc| sc.right_receive_capacity()))
			} else if *r == from {
				(*l, channel.subchannels.get(&token_id).map(|sc| sc.left_receive_capacity()))
			} else {
				continue;
			};
			if let Some(capacity) = capacity {
				if capacity >= amount {
					out.push(other);
				}
			}
		}
		out
	}
}

/// A computed path: hop addresses from source (exclusive) to destination
/// (inclusive), i.e. `hops[0]` is the first intermediary and `hops.last()
/// == destination`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
	pub hops: Vec<Address>,
}

/// Breadth-first shortest-hop-count search for a path able to carry
/// `amount` of `token_id` from `source` to `destination` within
/// `max_hops`, with required downstream fees folded in (zero per
/// [`HOP_FEE`], but the accounting is kept general). Ties among
/// equal-length paths are broken by, in order: higher aggregate remaining
/// credit along the path, lower aggregate utilization, lexicographically
/// smallest hub address sequence.
pub fn find_path(
	topology: &Topology, source: Address, destination: Address, token_id: TokenId, amount: u128,
	max_hops: usize,
) -> Result<Path, EngineError> {
	if source == destination {
		return Err(EngineError::validation("source and destination must differ"));
	}

	// BFS layer by layer so every candidate found at the first layer that
	// reaches `destination` has minimal hop count; collect all such paths
	// at that depth before applying the tie-break.
	let mut frontier: Vec<Vec<Address>> = vec![vec![source]];
	let mut candidates: Vec<Vec<Address>> = Vec::new();

	for _ in 0..=max_hops {
		if !candidates.is_empty() {
			break;
		}
		let mut next_frontier = Vec::new();
		for path in &frontier {
			let tail = *path.last().expect("path always has at least source");
			// The amount that must still be deliverable at this hop
			// equals `amount` since HOP_FEE is zero; kept as an explicit
			// required-at-hop value so a future nonzero fee schedule only
			// changes this one line.
			let required = amount + HOP_FEE * (path.len() as u128 - 1);
			for next in topology.neighbors_with_capacity(tail, token_id, required) {
				if path.contains(&next) {
					continue;
				}
				let mut extended = path.clone();
				extended.push(next);
				if next == destination {
					candidates.push(extended);
				} else {
					next_frontier.push(extended);
				}
			}
		}
		frontier = next_frontier;
		if frontier.is_empty() && candidates.is_empty() {
			break;
		}
	}

	if candidates.is_empty() {
		return Err(EngineError::route_failed(format!(
			"no path from {} to {} within {} hops",
			source, destination, max_hops
		)));
	}

	candidates.sort_by(|a, b| {
		let score_a = path_score(topology, a, token_id);
		let score_b = path_score(topology, b, token_id);
		// Higher aggregate remaining credit first, then lower aggregate
		// utilization, then lexicographic hop sequence.
		score_b
			.0
			.cmp(&score_a.0)
			.then(score_a.1.partial_cmp(&score_b.1).unwrap_or(std::cmp::Ordering::Equal))
			.then_with(|| a.cmp(b))
	});

	Ok(Path { hops: candidates.remove(0).into_iter().skip(1).collect() })
}

/// `(aggregate remaining credit, aggregate utilization)` along a full
/// node sequence including the source, used only for tie-breaking paths
/// of equal hop count.
fn path_score(topology: &Topology, nodes: &[Address], token_id: TokenId) -> (u128, f64) {
	let mut credit_sum: u128 = 0;
	let mut utilization_sum: f64 = 0.0;
	for pair in nodes.windows(2) {
		if let Some(channel) = topology.get(pair[0], pair[1]) {
			if let Some(sc) = channel.subchannels.get(&token_id) {
				let remaining = if pair[0] == channel.left() {
					sc.right_receive_capacity()
				} else {
					sc.left_receive_capacity()
				};
				credit_sum += remaining;
				let capacity = (sc.upper_bound() - sc.lower_bound()).max(1) as f64;
				let used = (sc.balance() - sc.lower_bound()).max(0) as f64;
				utilization_sum += used / capacity;
			}
		}
	}
	(credit_sum, utilization_sum)
}

/// One layer of the onion: what the hop at `hops[i]` learns. The
/// destination's layer carries `final_hop = true` and no forwarding
/// address.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OnionLayer {
	pub next: Option<Address>,
	pub forward_amount: u128,
	pub timelock: u64,
	pub final_hop: bool,
}

/// Build the per-hop onion layers for a path, source-to-destination.
/// Timelocks decrease by [`TIMELOCK_DELTA`] per hop from `now + t_total`.
pub fn build_onion(hops: &[Address], amount: u128, now: u64, t_total: u64) -> Vec<OnionLayer> {
	hops.iter()
		.enumerate()
		.map(|(i, &addr)| {
			let is_last = i + 1 == hops.len();
			OnionLayer {
				next: if is_last { None } else { Some(hops[i + 1]) },
				forward_amount: amount + HOP_FEE * (hops.len() - 1 - i) as u128,
				timelock: now + t_total - (i as u64) * TIMELOCK_DELTA,
				final_hop: is_last,
			}
		})
		.collect()
}

/// The outcome of a routing attempt: either every locked hop settled, or
/// every locked hop was refunded. A partial/mixed outcome is a bug in
/// this function, never a possible return value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
	Settled,
	Refunded,
}

/// Execute an atomic multi-hop payment from `source` to `destination`
/// over `path` (as returned by [`find_path`]), mutating `topology` in
/// place. Locks forward hop-by-hop; if every lock succeeds, settles
/// backward from the destination; if any lock fails, refunds every hop
/// already locked (once each hop's timelock elapses — modeled here by
/// calling `refund_htlc` with `now` equal to each hop's own timelock,
/// since nothing earlier is needed without the preimage).
pub fn route_payment(
	topology: &mut Topology, source: Address, path: &Path, token_id: TokenId, amount: u128, now: u64,
	t_total: u64,
) -> Result<RouteOutcome, EngineError> {
	let preimage = crypto::random_32();
	let hashlock = crypto::hash(&preimage);

	let mut nodes = Vec::with_capacity(path.hops.len() + 1);
	nodes.push(source);
	nodes.extend(path.hops.iter().copied());
	let onion = build_onion(&path.hops, amount, now, t_total);

	// locked.len() tracks how many hops (edges nodes[i]->nodes[i+1]) hold
	// a live HTLC with id locked_ids[i], so a mid-path failure knows
	// exactly which hops to unwind.
	let mut locked_ids: Vec<(Address, Address, crate::channel::HtlcId)> = Vec::new();

	for (i, window) in nodes.windows(2).enumerate() {
		let (from, to) = (window[0], window[1]);
		let layer = &onion[i];
		let spec = HtlcSpec {
			from,
			to,
			token_id,
			amount: layer.forward_amount,
			hashlock,
			timelock: layer.timelock,
		};
		let channel = match topology.get_mut(from, to) {
			Some(c) => c,
			None => {
				unwind(topology, &locked_ids, now);
				return Err(EngineError::route_failed(format!("channel {}-{} vanished", from, to)));
			},
		};
		match channel.open_htlc(spec) {
			Ok(next) => {
				let id = *next.pending_htlcs.keys().next_back().expect("just inserted");
				*channel = next;
				locked_ids.push((from, to, id));
			},
			Err(_) => {
				unwind(topology, &locked_ids, now);
				return Ok(RouteOutcome::Refunded);
			},
		}
	}

	// All hops locked: settle back from the destination toward the
	// source, each settlement revealing the shared preimage.
	for (from, to, id) in locked_ids.iter().rev() {
		let channel = topology.get_mut(*from, *to).expect("locked above");
		let settled = channel.settle_htlc(*id, &preimage, now).expect(
			"settlement cannot fail once every hop is locked on the same hashlock before its timelock",
		);
		*channel = settled;
	}

	Ok(RouteOutcome::Settled)
}

fn unwind(topology: &mut Topology, locked: &[(Address, Address, crate::channel::HtlcId)], now: u64) {
	for (from, to, id) in locked {
		if let Some(channel) = topology.get_mut(*from, *to) {
			let timelock = channel.pending_htlcs.get(id).map(|h| h.timelock).unwrap_or(now);
			if let Ok(refunded) = channel.refund_htlc(*id, timelock.max(now)) {
				*channel = refunded;
			}
		}
	}
}

/// Hash used to correlate an onion layer with its routing attempt in
/// logs; not part of the wire format.
pub fn onion_digest(layers: &[OnionLayer]) -> Hash32 {
	let mut buf = Vec::new();
	for layer in layers {
		buf.extend_from_slice(&layer.timelock.to_be_bytes());
		buf.extend_from_slice(&layer.forward_amount.to_be_bytes());
	}
	crypto::hash(&buf)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::channel::{Channel, PaySpec, Subchannel};
	use crate::crypto::keypair_from_seed;

	fn channel_with(left: Address, right: Address, left_limit: u128, right_limit: u128) -> Channel {
		Channel::open(left, right, vec![Subchannel::new(1, 0, left_limit, right_limit)]).unwrap()
	}

	#[test]
	fn s3_atomic_three_hop_route() {
		let a = keypair_from_seed(b"alice").address();
		let h1 = keypair_from_seed(b"hub1").address();
		let h2 = keypair_from_seed(b"hub2").address();
		let b = keypair_from_seed(b"bob").address();

		let mut topo = Topology::new();
		topo.insert(channel_with(a, h1, 0, 1000));
		topo.insert(channel_with(h1, h2, 1000, 1000));
		topo.insert(channel_with(h2, b, 0, 1000));

		let path = find_path(&topo, a, b, 1, 100, 5).unwrap();
		assert_eq!(path.hops, vec![h1, h2, b]);

		let outcome = route_payment(&mut topo, a, &path, 1, 100, 1_000, 500).unwrap();
		assert_eq!(outcome, RouteOutcome::Settled);

		let leg1 = topo.get(a, h1).unwrap().subchannels[&1].balance();
		let leg2 = topo.get(h1, h2).unwrap().subchannels[&1].balance();
		let leg3 = topo.get(h2, b).unwrap().subchannels[&1].balance();
		assert_eq!(leg1, 100);
		assert_eq!(leg2, 100);
		assert_eq!(leg3, 100);

		for (l, r) in [(a, h1), (h1, h2), (h2, b)] {
			let channel = topo.get(l, r).unwrap();
			assert!(channel.pending_htlcs.values().all(|h| h.state == crate::channel::HtlcState::Settled));
		}
	}

	#[test]
	fn route_fails_cleanly_with_no_path() {
		let a = keypair_from_seed(b"alice").address();
		let b = keypair_from_seed(b"bob").address();
		let topo = Topology::new();
		assert!(find_path(&topo, a, b, 1, 10, 5).is_err());
	}

	#[test]
	fn route_refunds_every_hop_on_mid_path_failure() {
		let a = keypair_from_seed(b"alice").address();
		let h1 = keypair_from_seed(b"hub1").address();
		let b = keypair_from_seed(b"bob").address();

		let mut topo = Topology::new();
		topo.insert(channel_with(a, h1, 0, 1000));
		// h1->b has no room: right_credit_limit too small once combined
		// with collateral=0, so the second hop's lock must fail.
		topo.insert(channel_with(h1, b, 0, 10));

		let path = Path { hops: vec![h1, b] };
		let outcome = route_payment(&mut topo, a, &path, 1, 100, 1_000, 500).unwrap();
		assert_eq!(outcome, RouteOutcome::Refunded);

		let leg1 = topo.get(a, h1).unwrap();
		assert!(leg1.pending_htlcs.values().all(|h| h.state == crate::channel::HtlcState::Refunded));
	}

	#[test]
	fn onion_timelocks_decrease_by_delta_per_hop() {
		let h1 = keypair_from_seed(b"h1").address();
		let h2 = keypair_from_seed(b"h2").address();
		let b = keypair_from_seed(b"b").address();
		let layers = build_onion(&[h1, h2, b], 100, 1_000, 500);
		assert_eq!(layers[0].timelock, 1_500);
		assert_eq!(layers[1].timelock, 1_500 - TIMELOCK_DELTA);
		assert_eq!(layers[2].timelock, 1_500 - 2 * TIMELOCK_DELTA);
		assert!(layers[2].final_hop);
		assert!(!layers[0].final_hop);
	}

	#[test]
	fn tie_break_prefers_higher_remaining_credit() {
		let a = keypair_from_seed(b"a").address();
		let rich = keypair_from_seed(b"rich").address();
		let poor = keypair_from_seed(b"poor").address();
		let b = keypair_from_seed(b"b").address();

		let mut topo = Topology::new();
		topo.insert(channel_with(a, rich, 0, 1000));
		topo.insert(channel_with(rich, b, 1000, 1000));
		topo.insert(channel_with(a, poor, 0, 200));
		topo.insert(channel_with(poor, b, 200, 200));

		let path = find_path(&topo, a, b, 1, 100, 5).unwrap();
		assert_eq!(path.hops, vec![rich, b]);
	}

	#[test]
	fn direct_pay_still_respects_limits() {
		let a = keypair_from_seed(b"a").address();
		let b = keypair_from_seed(b"b").address();
		let channel = channel_with(a, b, 0, 100);
		let err = channel.pay(PaySpec { from: b, to: a, token_id: 1, amount: 1 }).unwrap_err();
		assert_eq!(err.kind, crate::error::ErrorKind::CreditExceeded);
	}
}
