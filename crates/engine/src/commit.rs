//! Per-shard commit bookkeeping.
//!
//! [`CommitInfo`] is the last durability point both sides agree on: the
//! engine has persisted version `version` at `timestamp`, and every local
//! operation up to `checkpoint` was durable by then. The tracker advances it
//! on refresh ticks and persists it as [`CommitMetadata`] when flushed.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointCalc;
use crate::layout::VersionMarker;
use crate::{Error, Result};

/// Last mutually confirmed durability point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
	/// Engine persist time in milliseconds.
	pub timestamp: i64,
	/// Engine on-disk version.
	pub version: i64,
	/// Local checkpoint durable at `timestamp`.
	pub checkpoint: i64,
}

impl From<CommitMetadata> for CommitInfo {
	fn from(meta: CommitMetadata) -> Self {
		Self {
			timestamp: meta.commit_timestamp,
			version: meta.commit_version,
			checkpoint: meta.local_checkpoint,
		}
	}
}

/// Durable commit record of one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
	#[serde(default = "unset")]
	pub commit_timestamp: i64,
	#[serde(default)]
	pub commit_version: i64,
	#[serde(default = "unset")]
	pub local_checkpoint: i64,
}

fn unset() -> i64 {
	-1
}

impl Default for CommitMetadata {
	fn default() -> Self {
		Self {
			commit_timestamp: -1,
			commit_version: 0,
			local_checkpoint: -1,
		}
	}
}

impl From<CommitInfo> for CommitMetadata {
	fn from(info: CommitInfo) -> Self {
		Self {
			commit_timestamp: info.timestamp,
			commit_version: info.version,
			local_checkpoint: info.checkpoint,
		}
	}
}

/// Durable home of a shard's [`CommitMetadata`].
pub trait CommitStore: Send + Sync + 'static {
	/// Loads the last stored record, or the default when nothing was stored yet.
	fn load(&self) -> Result<CommitMetadata>;

	fn store(&self, meta: &CommitMetadata) -> Result<()>;
}

/// JSON file store replaced atomically through a temporary sibling.
#[derive(Debug, Clone)]
pub struct FileCommitStore {
	path: PathBuf,
}

impl FileCommitStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl CommitStore for FileCommitStore {
	fn load(&self) -> Result<CommitMetadata> {
		match std::fs::read(&self.path) {
			Ok(raw) => serde_json::from_slice(&raw).map_err(|source| Error::Json {
				path: self.path.clone(),
				source,
			}),
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(CommitMetadata::default()),
			Err(err) => Err(Error::io(&self.path, err)),
		}
	}

	fn store(&self, meta: &CommitMetadata) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
		}
		let tmp = self.path.with_extension("json.tmp");
		let body = serde_json::to_vec_pretty(meta).map_err(|source| Error::Json {
			path: self.path.clone(),
			source,
		})?;
		let mut file = std::fs::File::create(&tmp).map_err(|err| Error::io(&tmp, err))?;
		file.write_all(&body).map_err(|err| Error::io(&tmp, err))?;
		file.sync_all().map_err(|err| Error::io(&tmp, err))?;
		std::fs::rename(&tmp, &self.path).map_err(|err| Error::io(&self.path, err))?;
		Ok(())
	}
}

/// In-memory store, used by embedders without local metadata and by tests.
#[derive(Debug, Default)]
pub struct MemoryCommitStore {
	meta: Mutex<Option<CommitMetadata>>,
	writes: Mutex<usize>,
}

impl MemoryCommitStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(meta: CommitMetadata) -> Self {
		Self {
			meta: Mutex::new(Some(meta)),
			writes: Mutex::new(0),
		}
	}

	/// Number of successful [`CommitStore::store`] calls.
	pub fn writes(&self) -> usize {
		*self.writes.lock()
	}
}

impl CommitStore for MemoryCommitStore {
	fn load(&self) -> Result<CommitMetadata> {
		Ok(self.meta.lock().unwrap_or_default())
	}

	fn store(&self, meta: &CommitMetadata) -> Result<()> {
		*self.meta.lock() = Some(*meta);
		*self.writes.lock() += 1;
		Ok(())
	}
}

/// Commit/flush decision state for one shard.
///
/// Mutated only by refresh ticks, which the owning shard serializes. The
/// current [`CommitInfo`] is published through an [`ArcSwap`] so readers
/// never contend with a tick.
pub struct CommitTracker {
	calc: CheckpointCalc,
	last: Arc<ArcSwap<CommitInfo>>,
	persisted_timestamp: i64,
	store: Arc<dyn CommitStore>,
}

impl std::fmt::Debug for CommitTracker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CommitTracker")
			.field("last", &**self.last.load())
			.field("persisted_timestamp", &self.persisted_timestamp)
			.field("samples", &self.calc.len())
			.finish_non_exhaustive()
	}
}

impl CommitTracker {
	/// Seeds a tracker from the store. A record with a known timestamp and
	/// checkpoint also seeds the checkpoint history.
	pub fn open(store: Arc<dyn CommitStore>, mut calc: CheckpointCalc) -> Result<Self> {
		let meta = store.load()?;
		if meta.commit_timestamp >= 0 && meta.local_checkpoint >= 0 {
			calc.add_checkpoint(meta.commit_timestamp, meta.local_checkpoint);
		}
		Ok(Self {
			calc,
			last: Arc::new(ArcSwap::from_pointee(CommitInfo::from(meta))),
			persisted_timestamp: meta.commit_timestamp,
			store,
		})
	}

	/// Current commit info.
	pub fn commit_info(&self) -> CommitInfo {
		**self.last.load()
	}

	/// Shared handle to the published commit info.
	pub fn published(&self) -> Arc<ArcSwap<CommitInfo>> {
		self.last.clone()
	}

	pub fn checkpoints(&self) -> &CheckpointCalc {
		&self.calc
	}

	/// Records that `checkpoint` was durable locally at `now_ms`.
	pub fn sample(&mut self, now_ms: i64, checkpoint: i64) -> bool {
		self.calc.add_checkpoint(now_ms, checkpoint)
	}

	/// Advances the commit info from the engine's newest marker.
	///
	/// Returns `true` when the commit info changed.
	pub fn observe(&mut self, marker: Option<VersionMarker>) -> bool {
		let Some(marker) = marker else {
			return false;
		};
		let timestamp = marker.timestamp_ms.unwrap_or(-1);
		let candidate = self.calc.get_checkpoint(timestamp);
		let last = self.commit_info();
		tracing::debug!(timestamp, version = marker.version, ?candidate, last = last.checkpoint, "commit.observe");

		match candidate {
			Some(checkpoint) if checkpoint >= 0 && checkpoint > last.checkpoint => {
				tracing::info!(timestamp, version = marker.version, checkpoint, previous = last.checkpoint, "commit.advanced");
				self.last.store(Arc::new(CommitInfo {
					timestamp,
					version: marker.version,
					checkpoint,
				}));
				true
			}
			_ => false,
		}
	}

	/// One refresh tick: sample the local checkpoint, then observe the marker.
	pub fn refresh(&mut self, now_ms: i64, local_checkpoint: i64, marker: Option<VersionMarker>) -> bool {
		self.sample(now_ms, local_checkpoint);
		self.observe(marker)
	}

	/// `true` when the in-memory commit is newer than the stored one.
	pub fn needs_flush(&self) -> bool {
		let last = self.commit_info();
		last.timestamp > 0 && last.timestamp > self.persisted_timestamp
	}

	/// Persists the current commit info. Returns `false` without writing when
	/// its checkpoint is still unknown.
	pub fn persist_commit_data(&mut self) -> Result<bool> {
		let info = self.commit_info();
		if info.checkpoint < 0 {
			return Ok(false);
		}
		self.store.store(&CommitMetadata::from(info))?;
		self.persisted_timestamp = info.timestamp;
		tracing::info!(timestamp = info.timestamp, version = info.version, checkpoint = info.checkpoint, "commit.persisted");
		Ok(true)
	}
}
