//! Config file + CLI flag merging: a `TomlConfig` mirrors the on-disk
//! shape, `ArgsConfig` flattens into the top-level `clap::Parser`, and
//! `ConfigBuilder` resolves precedence (explicit CLI flag wins, else TOML,
//! else default).

use std::fs;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use serde::Deserialize;

fn get_default_data_dir() -> PathBuf {
	PathBuf::from("./entityd-data")
}

fn get_default_config_path() -> PathBuf {
	PathBuf::from("./entityd.toml")
}

/// On-disk config shape, `[node]`/`[log]` tables.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
	node: Option<TomlNode>,
	log: Option<TomlLog>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlNode {
	data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlLog {
	level: Option<String>,
}

/// Resolved configuration the rest of the binary operates on.
#[derive(Debug, Clone)]
pub struct Config {
	pub data_dir: PathBuf,
	pub log_level: log::LevelFilter,
}

/// Global CLI flags, flattened into the top-level [`clap::Parser`] and
/// merged with any TOML file found at `--config` (or the default path, if
/// present).
#[derive(Args, Debug)]
pub struct ArgsConfig {
	/// Path to a TOML config file. Defaults to ./entityd.toml if present.
	#[arg(long, global = true, env = "ENTITYD_CONFIG")]
	pub config_file: Option<String>,

	/// Directory holding this node's WAL, snapshot, and channel files.
	#[arg(long, global = true, env = "ENTITYD_DATA_DIR")]
	pub data_dir: Option<String>,

	/// Log level: error, warn, info, debug, trace.
	#[arg(long, global = true, env = "ENTITYD_LOG_LEVEL")]
	pub log_level: Option<String>,
}

struct ConfigBuilder {
	data_dir: Option<PathBuf>,
	log_level: Option<log::LevelFilter>,
}

impl ConfigBuilder {
	fn new() -> Self {
		ConfigBuilder { data_dir: None, log_level: None }
	}

	fn merge_toml(&mut self, toml: &TomlConfig) {
		if let Some(node) = &toml.node {
			if let Some(data_dir) = &node.data_dir {
				self.data_dir = Some(PathBuf::from(data_dir));
			}
		}
		if let Some(log) = &toml.log {
			if let Some(level) = &log.level {
				if let Ok(level) = log::LevelFilter::from_str(level) {
					self.log_level = Some(level);
				}
			}
		}
	}

	fn merge_args(&mut self, args: &ArgsConfig) -> io::Result<()> {
		if let Some(data_dir) = &args.data_dir {
			self.data_dir = Some(PathBuf::from(data_dir));
		}
		if let Some(level) = &args.log_level {
			self.log_level = Some(
				log::LevelFilter::from_str(level)
					.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?,
			);
		}
		Ok(())
	}

	fn build(self) -> Config {
		Config {
			data_dir: self.data_dir.unwrap_or_else(get_default_data_dir),
			log_level: self.log_level.unwrap_or(log::LevelFilter::Info),
		}
	}
}

/// Resolve the config file path, then parse it (if it exists), then layer
/// `args` on top. CLI flags always win over the file; the file always wins
/// over built-in defaults.
pub fn load_config(args: &ArgsConfig) -> io::Result<Config> {
	let config_path =
		args.config_file.as_ref().map(PathBuf::from).unwrap_or_else(get_default_config_path);

	let mut builder = ConfigBuilder::new();
	if config_path.exists() {
		let contents = fs::read_to_string(&config_path)?;
		let toml_config: TomlConfig = toml::from_str(&contents)
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
		builder.merge_toml(&toml_config);
	}
	builder.merge_args(args)?;
	Ok(builder.build())
}
