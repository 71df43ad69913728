use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::range::ShardId;

/// Errors crossing the shard boundary or surfacing from bridge setup.
#[derive(Debug, Error)]
pub enum Error {
	/// The gateway gave up on a call: fatal response, exhausted retries or cancellation.
	#[error(transparent)]
	Rpc(#[from] tether_rpc::Error),

	/// The shard engine was failed by an earlier fatal error.
	#[error("engine for shard {shard} has failed: {reason}")]
	EngineFailed { shard: ShardId, reason: String },

	#[error("engine for shard {0} is closed")]
	Closed(ShardId),

	#[error("timed out after {waited:?} waiting for {condition}")]
	Timeout { condition: String, waited: Duration },

	#[error("interrupted while waiting for {0}")]
	Interrupted(String),

	#[error("I/O error at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("malformed JSON at {path}: {source}")]
	Json {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	/// The target-state document violates its structural invariants.
	#[error("invalid target state: {0}")]
	InvalidTargetState(String),

	#[error("shard {index} is outside a layout of {count} shards")]
	InvalidShard { index: u32, count: u32 },

	#[error("engine for shard {0} is already registered")]
	DuplicateShard(ShardId),
}

impl Error {
	pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Self::Io { path: path.into(), source }
	}

	/// Returns `true` for cancellation, which is never retried.
	pub fn is_interrupted(&self) -> bool {
		match self {
			Self::Interrupted(_) => true,
			Self::Rpc(err) => err.is_interrupted(),
			_ => false,
		}
	}
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
