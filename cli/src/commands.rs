//! Handlers for each CLI subcommand. Each takes the resolved [`Config`] plus
//! its own argument struct and returns an [`entityd_core::Result`]; `main`
//! maps the error kind to a stable process exit code.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;

use entityd_core::channel::Subchannel;
use entityd_core::consensus::{ConsensusMode, EntityConfig, EntityId};
use entityd_core::crypto::keypair_from_seed;
use entityd_core::error::EngineError;
use entityd_core::router::{find_path, route_payment, Topology};
use entityd_core::wal::{entity_dir, ChannelRecordPayload, Wal, WalRecord};
use entityd_core::{Address, Channel, PaySpec, Result};

use crate::config::Config;

fn now_unix() -> u64 {
	chrono::Utc::now().timestamp().max(0) as u64
}

/// Resolve a user-typed entity reference (a raw `0x`-prefixed 32-byte id, a
/// small decimal ordinal, or an arbitrary name) into an [`EntityId`], the
/// way `entity_id_from_arg` mirrors [`EntityId::classify`] for input a
/// human types rather than an id already derived and round-tripped.
fn entity_id_from_arg(s: &str) -> Result<EntityId> {
	if s.starts_with("0x") && s.len() == 66 {
		return EntityId::from_str(s);
	}
	if let Ok(n) = s.parse::<u64>() {
		return EntityId::numbered(n);
	}
	Ok(EntityId::named(s))
}

fn entity_record_path(dir: &PathBuf) -> PathBuf {
	dir.join("entity.json")
}

fn load_entity_config(dir: &PathBuf) -> Result<EntityConfig> {
	let path = entity_record_path(dir);
	let bytes = fs::read(&path).map_err(|e| {
		EngineError::validation(format!(
			"entity not registered at {}: {} (run register-entity first)",
			path.display(),
			e
		))
	})?;
	let config: EntityConfig = serde_json::from_slice(&bytes)?;
	Ok(config)
}

fn resolve_entity(data_dir: &PathBuf, entity_arg: &str) -> Result<(PathBuf, EntityConfig)> {
	let id = entity_id_from_arg(entity_arg)?;
	let dir = entity_dir(data_dir, &id.0);
	let config = load_entity_config(&dir)?;
	Ok((dir, config))
}

#[derive(Args, Debug)]
pub struct RegisterEntityArgs {
	/// Human name for this entity (Named kind). Mutually exclusive with `--numbered`.
	#[arg(long)]
	pub name: Option<String>,

	/// Small externally-registered ordinal in [1, 1_000_000) (Numbered kind).
	#[arg(long)]
	pub numbered: Option<u64>,

	/// Validator address and its share, as `addr=share`. Repeatable.
	#[arg(long = "validator", required = true)]
	pub validators: Vec<String>,

	/// Weighted share threshold required to commit a frame.
	#[arg(long)]
	pub threshold: u64,

	/// Address of the designated proposer; must be one of `--validator`.
	#[arg(long)]
	pub proposer: String,
}

pub fn register_entity(config: &Config, args: &RegisterEntityArgs) -> Result<()> {
	if args.name.is_some() && args.numbered.is_some() {
		return Err(EngineError::validation("specify at most one of --name / --numbered"));
	}

	let mut validators = Vec::with_capacity(args.validators.len());
	let mut shares = std::collections::BTreeMap::new();
	for entry in &args.validators {
		let (addr_str, share_str) = entry
			.split_once('=')
			.ok_or_else(|| EngineError::validation(format!("--validator {} must be addr=share", entry)))?;
		let addr = Address::from_str(addr_str)?;
		let share: u64 = share_str
			.parse()
			.map_err(|_| EngineError::validation(format!("invalid share in --validator {}", entry)))?;
		validators.push(addr);
		shares.insert(addr, share);
	}

	let proposer = Address::from_str(&args.proposer)?;
	if !validators.contains(&proposer) {
		return Err(EngineError::validation("--proposer must be one of --validator"));
	}

	let entity_config =
		EntityConfig { validators, shares, threshold: args.threshold, mode: ConsensusMode::ProposerBased, proposer };

	let id = match (&args.name, args.numbered) {
		(Some(name), None) => EntityId::named(name),
		(None, Some(n)) => EntityId::numbered(n)?,
		(None, None) => EntityId::lazy(&entity_config.validators, entity_config.threshold),
		(Some(_), Some(_)) => unreachable!("checked above"),
	};

	let dir = entity_dir(&config.data_dir, &id.0);
	fs::create_dir_all(&dir)?;
	let tmp = dir.join("entity.json.tmp");
	fs::write(&tmp, serde_json::to_vec_pretty(&entity_config)?)?;
	fs::rename(&tmp, entity_record_path(&dir))?;
	Wal::open(&dir)?;

	println!("registered entity {} at {}", id, dir.display());
	Ok(())
}

#[derive(Args, Debug)]
pub struct OpenChannelArgs {
	/// Entity to persist this channel under.
	#[arg(long)]
	pub entity: String,

	/// Seed for one participant. `Channel::open` canonicalizes the pair by
	/// address, so it does not matter which seed is passed as left vs.
	/// right; use `show-state` to see which ended up canonical-left.
	#[arg(long)]
	pub left_seed: String,

	/// Seed for the other participant.
	#[arg(long)]
	pub right_seed: String,

	#[arg(long)]
	pub token_id: u64,

	#[arg(long, default_value_t = 0)]
	pub collateral: u128,

	#[arg(long, default_value_t = 0)]
	pub left_credit_limit: u128,

	#[arg(long, default_value_t = 0)]
	pub right_credit_limit: u128,
}

pub fn open_channel(config: &Config, args: &OpenChannelArgs) -> Result<()> {
	let (dir, _entity_config) = resolve_entity(&config.data_dir, &args.entity)?;

	let left = keypair_from_seed(args.left_seed.as_bytes());
	let right = keypair_from_seed(args.right_seed.as_bytes());
	let subchannel = Subchannel::new(args.token_id, args.collateral, args.left_credit_limit, args.right_credit_limit);
	let channel = Channel::open(left.address(), right.address(), vec![subchannel])?;
	let channel = channel.sign(&left)?.sign(&right)?;

	let mut wal = Wal::open(&dir)?;
	wal.append(&WalRecord::CreateChannel {
		timestamp: now_unix(),
		payload: ChannelRecordPayload { channel_id: channel.id(), channel: channel.clone() },
	})?;

	println!("opened channel 0x{} ({} <-> {})", hex::encode(channel.id()), channel.left(), channel.right());
	Ok(())
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub enum Direction {
	LeftToRight,
	RightToLeft,
}

#[derive(Args, Debug)]
pub struct PayArgs {
	#[arg(long)]
	pub entity: String,

	/// Channel id, as printed by `open-channel`.
	#[arg(long)]
	pub channel_id: String,

	#[arg(long)]
	pub left_seed: String,

	#[arg(long)]
	pub right_seed: String,

	#[arg(long, value_enum)]
	pub direction: Direction,

	#[arg(long)]
	pub token_id: u64,

	#[arg(long)]
	pub amount: u128,
}

pub fn pay(config: &Config, args: &PayArgs) -> Result<()> {
	let (dir, entity_config) = resolve_entity(&config.data_dir, &args.entity)?;
	let state = Wal::replay(&dir, &entity_config)?;

	let channel_id = parse_channel_id(&args.channel_id)?;
	let channel = state
		.channels
		.get(&channel_id)
		.ok_or_else(|| EngineError::validation(format!("unknown channel 0x{}", args.channel_id)))?
		.clone();

	let left = keypair_from_seed(args.left_seed.as_bytes());
	let right = keypair_from_seed(args.right_seed.as_bytes());
	if left.address() != channel.left() || right.address() != channel.right() {
		return Err(EngineError::validation("left/right seeds do not match this channel's participants"));
	}

	let (from, to) = match args.direction {
		Direction::LeftToRight => (left.address(), right.address()),
		Direction::RightToLeft => (right.address(), left.address()),
	};
	let paid = channel.pay(PaySpec { from, to, token_id: args.token_id, amount: args.amount })?;
	let paid = paid.sign(&left)?.sign(&right)?;

	let mut wal = Wal::open(&dir)?;
	wal.append(&WalRecord::Pay {
		timestamp: now_unix(),
		payload: ChannelRecordPayload { channel_id, channel: paid.clone() },
	})?;

	println!("paid; new balance on token {} = {}", args.token_id, paid.subchannels[&args.token_id].balance());
	Ok(())
}

#[derive(Args, Debug)]
pub struct RouteArgs {
	#[arg(long)]
	pub entity: String,

	#[arg(long)]
	pub source: String,

	#[arg(long)]
	pub destination: String,

	#[arg(long)]
	pub token_id: u64,

	#[arg(long)]
	pub amount: u128,

	#[arg(long, default_value_t = 6)]
	pub max_hops: usize,

	/// Total timelock budget from `now`, spent down by `TIMELOCK_DELTA` per hop.
	#[arg(long, default_value_t = 500)]
	pub t_total: u64,
}

pub fn route(config: &Config, args: &RouteArgs) -> Result<()> {
	let (dir, entity_config) = resolve_entity(&config.data_dir, &args.entity)?;
	let state = Wal::replay(&dir, &entity_config)?;

	let source = Address::from_str(&args.source)?;
	let destination = Address::from_str(&args.destination)?;

	let mut topology = Topology::new();
	for channel in state.channels.values() {
		topology.insert(channel.clone());
	}

	let path = find_path(&topology, source, destination, args.token_id, args.amount, args.max_hops)?;
	let now = now_unix();
	let outcome = route_payment(&mut topology, source, &path, args.token_id, args.amount, now, args.t_total)?;

	let mut nodes = Vec::with_capacity(path.hops.len() + 1);
	nodes.push(source);
	nodes.extend(path.hops.iter().copied());

	let mut wal = Wal::open(&dir)?;
	for window in nodes.windows(2) {
		let channel = topology
			.get(window[0], window[1])
			.expect("every hop on the path was touched by route_payment")
			.clone();
		wal.append(&WalRecord::PayAsset {
			timestamp: now,
			payload: ChannelRecordPayload { channel_id: channel.id(), channel },
		})?;
	}

	println!("route {:?} -> {:?}", path.hops, outcome);
	Ok(())
}

#[derive(Args, Debug)]
pub struct ShowStateArgs {
	#[arg(long)]
	pub entity: String,
}

pub fn show_state(config: &Config, args: &ShowStateArgs) -> Result<()> {
	let (dir, entity_config) = resolve_entity(&config.data_dir, &args.entity)?;
	let state = Wal::replay(&dir, &entity_config)?;
	println!("{}", serde_json::to_string_pretty(&state)?);
	Ok(())
}

#[derive(Args, Debug)]
pub struct SnapshotArgs {
	#[arg(long)]
	pub entity: String,
}

pub fn snapshot(config: &Config, args: &SnapshotArgs) -> Result<()> {
	let (dir, entity_config) = resolve_entity(&config.data_dir, &args.entity)?;
	let state = Wal::replay(&dir, &entity_config)?;
	let mut wal = Wal::open(&dir)?;
	wal.checkpoint(&state, now_unix())?;
	println!("checkpointed at height {}, hash 0x{}", state.height, hex::encode(entityd_core::consensus::state_hash(&state)));
	Ok(())
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
	#[arg(long)]
	pub entity: String,
}

pub fn replay(config: &Config, args: &ReplayArgs) -> Result<()> {
	let (dir, entity_config) = resolve_entity(&config.data_dir, &args.entity)?;
	let state = Wal::replay(&dir, &entity_config)?;
	println!(
		"replayed to height {}, hash 0x{}, {} channels",
		state.height,
		hex::encode(entityd_core::consensus::state_hash(&state)),
		state.channels.len()
	);
	Ok(())
}

fn parse_channel_id(s: &str) -> Result<[u8; 32]> {
	let stripped = s.strip_prefix("0x").unwrap_or(s);
	let bytes = hex::decode(stripped).map_err(|e| EngineError::validation(format!("invalid channel id hex: {}", e)))?;
	if bytes.len() != 32 {
		return Err(EngineError::validation("channel id must be 32 bytes"));
	}
	let mut out = [0u8; 32];
	out.copy_from_slice(&bytes);
	Ok(out)
}
