//! Bridge configuration loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tether_process::ProcessRole;
use tether_rpc::BackoffPolicy;
use thiserror::Error;

use crate::deletion::DeletionSettings;
use crate::poller::PollSettings;
use crate::range::{ShardId, partition_range};

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error reading {path}: {error}")]
	Io { path: PathBuf, error: std::io::Error },

	#[error("failed to parse configuration: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("invalid value for {field}: {reason}")]
	Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
	pub rpc: RpcConfig,
	pub paths: PathsConfig,
	pub target: TargetConfig,
	pub deletion: DeletionConfig,
	pub refresh: RefreshConfig,
	pub checkpoint: CheckpointConfig,
	pub process: ProcessConfig,
	/// Shards opened at startup.
	pub shards: Vec<ShardConfig>,
}

impl BridgeConfig {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&raw)
	}

	pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(raw)?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		let invalid = |field, reason: &str| {
			Err(ConfigError::Invalid {
				field,
				reason: reason.to_string(),
			})
		};
		if self.rpc.max_attempts == 0 {
			return invalid("rpc.max_attempts", "at least one attempt is required");
		}
		if self.rpc.multiplier == 0 {
			return invalid("rpc.multiplier", "must be positive");
		}
		for (field, value) in [
			("target.poll_interval_ms", self.target.poll_interval_ms),
			("refresh.interval_ms", self.refresh.interval_ms),
			("deletion.retry_interval_ms", self.deletion.retry_interval_ms),
			("process.health_interval_ms", self.process.health_interval_ms),
		] {
			if value == 0 {
				return invalid(field, "interval must be positive");
			}
		}
		if self.deletion.max_retries == 0 {
			return invalid("deletion.max_retries", "at least one attempt is required");
		}
		if let Some(role) = self.process.roles.iter().find(|r| r.signature.trim().is_empty()) {
			return Err(ConfigError::Invalid {
				field: "process.roles",
				reason: format!("role {} has an empty signature", role.name),
			});
		}

		let mut seen = std::collections::HashSet::new();
		for shard in &self.shards {
			if partition_range(shard.shard_count, shard.index).is_err() {
				return Err(ConfigError::Invalid {
					field: "shards",
					reason: format!("shard {} of {} does not exist for table {}", shard.index, shard.shard_count, shard.table),
				});
			}
			if !seen.insert(shard.id()) {
				return Err(ConfigError::Invalid {
					field: "shards",
					reason: format!("{} is listed twice", shard.id()),
				});
			}
		}
		Ok(())
	}
}

/// One shard hosted by this node.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardConfig {
	pub table: String,
	pub index: u32,
	pub shard_count: u32,
	/// File in which the document store keeps its durable local checkpoint
	/// as a decimal integer.
	pub checkpoint_file: PathBuf,
}

impl ShardConfig {
	pub fn id(&self) -> ShardId {
		ShardId::new(self.table.clone(), self.index)
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcConfig {
	/// Searcher endpoint as `host:port`.
	pub address: String,
	pub request_timeout_ms: u64,
	pub base_delay_ms: u64,
	pub multiplier: u32,
	pub max_attempts: u32,
	pub max_delay_ms: u64,
}

impl Default for RpcConfig {
	fn default() -> Self {
		Self {
			address: "127.0.0.1:39300".to_string(),
			request_timeout_ms: 10_000,
			base_delay_ms: 50,
			multiplier: 2,
			max_attempts: 10,
			max_delay_ms: 5_000,
		}
	}
}

impl RpcConfig {
	pub fn backoff(&self) -> BackoffPolicy {
		BackoffPolicy {
			base: Duration::from_millis(self.base_delay_ms),
			multiplier: self.multiplier,
			max_attempts: self.max_attempts,
			max_delay: Duration::from_millis(self.max_delay_ms),
		}
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
	/// Root of the engine's runtime data.
	pub runtime_root: PathBuf,
	/// Directory holding one commit metadata file per shard.
	pub commit_dir: PathBuf,
}

impl Default for PathsConfig {
	fn default() -> Self {
		Self {
			runtime_root: PathBuf::from("runtime"),
			commit_dir: PathBuf::from("commit"),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
	pub poll_interval_ms: u64,
	pub timeout_ms: u64,
	/// Target-state document re-read on every sync request.
	pub document: Option<PathBuf>,
}

impl Default for TargetConfig {
	fn default() -> Self {
		Self {
			poll_interval_ms: 1_000,
			timeout_ms: 60_000,
			document: None,
		}
	}
}

impl TargetConfig {
	pub fn poll_settings(&self) -> PollSettings {
		PollSettings {
			interval: Duration::from_millis(self.poll_interval_ms),
			timeout: Duration::from_millis(self.timeout_ms),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeletionConfig {
	pub max_retries: u32,
	pub retry_interval_ms: u64,
}

impl Default for DeletionConfig {
	fn default() -> Self {
		Self {
			max_retries: 30,
			retry_interval_ms: 1_000,
		}
	}
}

impl DeletionConfig {
	pub fn settings(&self) -> DeletionSettings {
		DeletionSettings {
			max_retries: self.max_retries,
			retry_interval: Duration::from_millis(self.retry_interval_ms),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshConfig {
	pub interval_ms: u64,
}

impl Default for RefreshConfig {
	fn default() -> Self {
		Self { interval_ms: 1_000 }
	}
}

impl RefreshConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms)
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
	pub max_samples: usize,
	pub max_age_secs: u64,
}

impl CheckpointConfig {
	pub fn max_age(&self) -> Duration {
		Duration::from_secs(self.max_age_secs)
	}
}

impl Default for CheckpointConfig {
	fn default() -> Self {
		Self {
			max_samples: crate::checkpoint::DEFAULT_MAX_SAMPLES,
			max_age_secs: crate::checkpoint::DEFAULT_MAX_AGE.as_secs(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessConfig {
	pub roles: Vec<ProcessRole>,
	pub health_interval_ms: u64,
	pub stop_timeout_ms: u64,
}

impl Default for ProcessConfig {
	fn default() -> Self {
		Self {
			roles: Vec::new(),
			health_interval_ms: 5_000,
			stop_timeout_ms: 10_000,
		}
	}
}

impl ProcessConfig {
	pub fn health_interval(&self) -> Duration {
		Duration::from_millis(self.health_interval_ms)
	}

	pub fn stop_timeout(&self) -> Duration {
		Duration::from_millis(self.stop_timeout_ms)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use rstest::rstest;

	use super::*;

	#[test]
	fn empty_file_uses_defaults() {
		let config = BridgeConfig::from_toml_str("").unwrap();

		assert_eq!(config.rpc.address, "127.0.0.1:39300");
		assert_eq!(config.rpc.backoff(), BackoffPolicy::default());
		assert_eq!(config.target.poll_settings(), PollSettings::default());
		assert_eq!(config.deletion.settings(), DeletionSettings::default());
		assert_eq!(config.checkpoint.max_age_secs, 1800);
		assert!(config.process.roles.is_empty());
	}

	#[test]
	fn sections_override_defaults() {
		let config = BridgeConfig::from_toml_str(
			r#"
			[rpc]
			address = "10.0.0.5:4000"
			max_attempts = 3

			[paths]
			runtime_root = "/var/lib/searcher/runtime"

			[[process.roles]]
			name = "searcher"
			start_command = "exec /opt/searcher/bin/searcher --port 4000"
			signature = "/opt/searcher/bin/searcher"
			"#,
		)
		.unwrap();

		assert_eq!(config.rpc.address, "10.0.0.5:4000");
		assert_eq!(config.rpc.backoff().max_attempts, 3);
		assert_eq!(config.rpc.base_delay_ms, 50);
		assert_eq!(config.paths.runtime_root, PathBuf::from("/var/lib/searcher/runtime"));
		assert_eq!(config.paths.commit_dir, PathBuf::from("commit"));
		assert_eq!(config.process.roles[0].name, "searcher");
	}

	#[test]
	fn unknown_keys_are_rejected() {
		assert!(matches!(BridgeConfig::from_toml_str("[rpc]\nadress = \"x\""), Err(ConfigError::Parse(_))));
	}

	#[test]
	fn zero_attempts_is_invalid() {
		let err = BridgeConfig::from_toml_str("[rpc]\nmax_attempts = 0").unwrap_err();
		assert!(matches!(err, ConfigError::Invalid { field: "rpc.max_attempts", .. }));
	}

	#[rstest]
	#[case("[target]\npoll_interval_ms = 0", "target.poll_interval_ms")]
	#[case("[refresh]\ninterval_ms = 0", "refresh.interval_ms")]
	#[case("[deletion]\nretry_interval_ms = 0", "deletion.retry_interval_ms")]
	#[case("[deletion]\nmax_retries = 0", "deletion.max_retries")]
	#[case("[process]\nhealth_interval_ms = 0", "process.health_interval_ms")]
	fn zero_intervals_are_invalid(#[case] raw: &str, #[case] expected: &str) {
		match BridgeConfig::from_toml_str(raw) {
			Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
			other => panic!("expected {expected} to be rejected, got {other:?}"),
		}
	}

	#[test]
	fn shards_are_parsed_and_checked() {
		let config = BridgeConfig::from_toml_str(
			r#"
			[[shards]]
			table = "orders"
			index = 1
			shard_count = 2
			checkpoint_file = "/var/lib/store/orders_1.checkpoint"
			"#,
		)
		.unwrap();
		assert_eq!(config.shards[0].id(), ShardId::new("orders", 1));

		let out_of_range = "[[shards]]\ntable = \"orders\"\nindex = 2\nshard_count = 2\ncheckpoint_file = \"c\"";
		assert!(matches!(BridgeConfig::from_toml_str(out_of_range), Err(ConfigError::Invalid { field: "shards", .. })));

		let twice = "[[shards]]\ntable = \"t\"\nindex = 0\nshard_count = 1\ncheckpoint_file = \"a\"\n\
			[[shards]]\ntable = \"t\"\nindex = 0\nshard_count = 1\ncheckpoint_file = \"b\"";
		assert!(matches!(BridgeConfig::from_toml_str(twice), Err(ConfigError::Invalid { field: "shards", .. })));
	}

	#[test]
	fn missing_file_reports_path() {
		let err = BridgeConfig::load(Path::new("/nonexistent/tether.toml")).unwrap_err();
		assert!(err.to_string().contains("/nonexistent/tether.toml"));
	}
}
