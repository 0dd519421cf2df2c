//! `entityd-cli`: operator tooling for a single entityd node — register an
//! entity, open/pay channels, route a multi-hop payment, and inspect or
//! snapshot an entity's persisted state.
//!
//! Errors are never panics: every subcommand returns a
//! [`entityd_core::error::EngineError`], and `main` maps its kind to the
//! exit codes an operator script can branch on (0 success; 2 invalid
//! arguments; 3 invariant violation; 4 I/O error; 5 consensus-timeout).

mod commands;
mod config;

use clap::{Parser, Subcommand};

use commands::{OpenChannelArgs, PayArgs, RegisterEntityArgs, ReplayArgs, RouteArgs, ShowStateArgs, SnapshotArgs};
use config::ArgsConfig;
use entityd_core::error::{EngineError, ErrorKind};

#[derive(Parser, Debug)]
#[command(name = "entityd-cli", version, about = "entityd operator CLI")]
struct Cli {
	#[command(flatten)]
	global: ArgsConfig,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Register a new entity (validator set, shares, threshold, proposer).
	RegisterEntity(RegisterEntityArgs),
	/// Open a bilateral credit-line channel between two locally-held seeds.
	OpenChannel(OpenChannelArgs),
	/// Apply a bilateral payment on an existing channel.
	Pay(PayArgs),
	/// Route an atomic multi-hop payment across the entity's known channels.
	Route(RouteArgs),
	/// Print an entity's replayed state as JSON.
	ShowState(ShowStateArgs),
	/// Checkpoint an entity's current state and compact its WAL.
	Snapshot(SnapshotArgs),
	/// Replay an entity's WAL and print the resulting height/hash.
	Replay(ReplayArgs),
}

/// Map an error's stable kind to its assigned process exit code.
fn exit_code_for(err: &EngineError) -> i32 {
	match err.kind {
		ErrorKind::Validation | ErrorKind::RouteFailed => 2,
		ErrorKind::ConsensusTimeout | ErrorKind::ThresholdNotReached => 5,
		ErrorKind::Io | ErrorKind::WalCorruption | ErrorKind::CheckpointMissing => 4,
		ErrorKind::InsufficientFunds
		| ErrorKind::CreditExceeded
		| ErrorKind::InvalidSignature
		| ErrorKind::NonceMismatch
		| ErrorKind::ChannelClosed
		| ErrorKind::HubUnavailable
		| ErrorKind::StateHashMismatch
		| ErrorKind::MempoolFull
		| ErrorKind::DoubleRelease => 3,
	}
}

fn main() {
	let cli = Cli::parse();
	let config = match config::load_config(&cli.global) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("entityd-cli: invalid configuration: {}", e);
			std::process::exit(2);
		},
	};

	env_logger::Builder::new().filter_level(config.log_level).init();

	let result = match &cli.command {
		Command::RegisterEntity(args) => commands::register_entity(&config, args),
		Command::OpenChannel(args) => commands::open_channel(&config, args),
		Command::Pay(args) => commands::pay(&config, args),
		Command::Route(args) => commands::route(&config, args),
		Command::ShowState(args) => commands::show_state(&config, args),
		Command::Snapshot(args) => commands::snapshot(&config, args),
		Command::Replay(args) => commands::replay(&config, args),
	};

	if let Err(err) = result {
		log::error!("{}: {}", err.kind, err.message);
		eprintln!("entityd-cli: {}: {}", err.kind, err.message);
		std::process::exit(exit_code_for(&err));
	}
}
