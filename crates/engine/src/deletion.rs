//! Confirmed reclamation of engine runtime storage.
//!
//! A table or shard directory may only be removed once the engine's target
//! state shows it released. Each key gets one background saga: wait for
//! absence, remove the tree, and on timeout or I/O failure try again after a
//! fixed pause. The advisory lock for the key is held by the saga's guard and
//! released exactly once when the saga ends, however it ends.

use std::collections::HashSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_rpc::PartitionRange;
use tether_worker::{TaskClass, TaskToken, WorkerRuntime};
use tokio::task::JoinHandle;

use crate::layout::RuntimeLayout;
use crate::poller::TargetStatePoller;
use crate::range::partition_id;
use crate::target::TargetCondition;

/// What a reclamation saga removes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeletionKey {
	/// Every generation of a table.
	Table(String),
	/// One partition of a table.
	Shard { table: String, range: PartitionRange },
}

impl DeletionKey {
	fn condition(&self) -> TargetCondition {
		match self {
			Self::Table(table) => TargetCondition::Absence {
				table: table.clone(),
				partition: None,
			},
			Self::Shard { table, range } => TargetCondition::Absence {
				table: table.clone(),
				partition: Some(partition_id(*range)),
			},
		}
	}

	fn path(&self, layout: &RuntimeLayout) -> PathBuf {
		match self {
			Self::Table(table) => layout.table_dir(table),
			Self::Shard { table, range } => layout.partition_dir(table, *range),
		}
	}
}

impl fmt::Display for DeletionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Table(table) => write!(f, "table {table}"),
			Self::Shard { table, range } => write!(f, "shard {table}/{}", partition_id(*range)),
		}
	}
}

/// Advisory lock table: at most one in-flight saga per key.
#[derive(Debug, Default)]
pub struct DeletionLocks {
	held: Mutex<HashSet<DeletionKey>>,
	acquired: AtomicU64,
	released: AtomicU64,
}

impl DeletionLocks {
	pub fn new() -> Self {
		Self::default()
	}

	/// Atomically takes the lock for `key` if nobody holds it.
	pub fn try_acquire(self: &Arc<Self>, key: DeletionKey) -> Option<DeletionGuard> {
		if !self.held.lock().insert(key.clone()) {
			return None;
		}
		self.acquired.fetch_add(1, Ordering::AcqRel);
		Some(DeletionGuard {
			locks: self.clone(),
			key,
		})
	}

	pub fn is_held(&self, key: &DeletionKey) -> bool {
		self.held.lock().contains(key)
	}

	pub fn acquired(&self) -> u64 {
		self.acquired.load(Ordering::Acquire)
	}

	pub fn released(&self) -> u64 {
		self.released.load(Ordering::Acquire)
	}
}

/// Held lock on one [`DeletionKey`]; dropping it releases the key.
#[derive(Debug)]
pub struct DeletionGuard {
	locks: Arc<DeletionLocks>,
	key: DeletionKey,
}

impl DeletionGuard {
	pub fn key(&self) -> &DeletionKey {
		&self.key
	}
}

impl Drop for DeletionGuard {
	fn drop(&mut self) {
		if self.locks.held.lock().remove(&self.key) {
			self.locks.released.fetch_add(1, Ordering::AcqRel);
			tracing::debug!(key = %self.key, "deletion.lock_released");
		}
	}
}

/// Removes a directory tree.
#[async_trait]
pub trait Reclaimer: Send + Sync + 'static {
	/// Removes `path` recursively. A path that is already gone counts as removed.
	async fn remove(&self, path: &Path) -> std::io::Result<()>;
}

/// Filesystem reclaimer.
#[derive(Debug, Clone, Default)]
pub struct FsReclaimer;

#[async_trait]
impl Reclaimer for FsReclaimer {
	async fn remove(&self, path: &Path) -> std::io::Result<()> {
		match tokio::fs::remove_dir_all(path).await {
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
			other => other,
		}
	}
}

/// Retry tunables of a reclamation saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionSettings {
	pub max_retries: u32,
	pub retry_interval: Duration,
}

impl Default for DeletionSettings {
	fn default() -> Self {
		Self {
			max_retries: 30,
			retry_interval: Duration::from_secs(1),
		}
	}
}

/// Terminal state of one saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
	Removed { attempts: u32 },
	/// Every attempt failed; the directory is left behind.
	Abandoned { attempts: u32, last_error: String },
	Interrupted,
	/// Zero retries or a zero interval; nothing was attempted.
	InvalidSettings,
}

/// Starts and tracks reclamation sagas.
#[derive(Clone)]
pub struct DeletionCoordinator {
	locks: Arc<DeletionLocks>,
	poller: TargetStatePoller,
	reclaimer: Arc<dyn Reclaimer>,
	layout: RuntimeLayout,
	settings: DeletionSettings,
	runtime: WorkerRuntime,
}

impl fmt::Debug for DeletionCoordinator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DeletionCoordinator")
			.field("layout", &self.layout)
			.field("settings", &self.settings)
			.finish_non_exhaustive()
	}
}

impl DeletionCoordinator {
	pub fn new(
		poller: TargetStatePoller,
		reclaimer: Arc<dyn Reclaimer>,
		layout: RuntimeLayout,
		settings: DeletionSettings,
		runtime: WorkerRuntime,
	) -> Self {
		Self {
			locks: Arc::new(DeletionLocks::new()),
			poller,
			reclaimer,
			layout,
			settings,
			runtime,
		}
	}

	pub fn locks(&self) -> &Arc<DeletionLocks> {
		&self.locks
	}

	/// Starts reclaiming a whole table.
	pub fn request_table(&self, table: impl Into<String>) -> Option<JoinHandle<DeletionOutcome>> {
		self.request(DeletionKey::Table(table.into()))
	}

	/// Starts reclaiming one partition of a table.
	pub fn request_shard(&self, table: impl Into<String>, range: PartitionRange) -> Option<JoinHandle<DeletionOutcome>> {
		self.request(DeletionKey::Shard { table: table.into(), range })
	}

	/// Starts a saga for `key`, or returns `None` without polling when one is
	/// already in flight for the same key.
	pub fn request(&self, key: DeletionKey) -> Option<JoinHandle<DeletionOutcome>> {
		let Some(guard) = self.locks.try_acquire(key.clone()) else {
			tracing::info!(%key, "deletion.already_in_progress");
			return None;
		};
		let this = self.clone();
		Some(self.runtime.spawn_tracked(TaskClass::Reclaim, format!("reclaim {key}"), move |token| async move {
			this.run_saga(guard, token).await
		}))
	}

	async fn run_saga(&self, guard: DeletionGuard, token: TaskToken) -> DeletionOutcome {
		let key = guard.key().clone();
		let DeletionSettings {
			max_retries,
			retry_interval,
		} = self.settings;
		if max_retries == 0 || retry_interval.is_zero() {
			tracing::warn!(%key, max_retries, interval_ms = retry_interval.as_millis() as u64, "deletion.invalid_settings");
			return DeletionOutcome::InvalidSettings;
		}

		let condition = key.condition();
		let path = key.path(&self.layout);
		let mut last_error = String::new();

		for attempt in 1..=max_retries {
			if token.is_cancelled() {
				tracing::info!(%key, attempt, "deletion.interrupted");
				return DeletionOutcome::Interrupted;
			}
			match self.poller.wait_until(&condition, token.cancellation()).await {
				Err(err) if err.is_interrupted() => {
					tracing::info!(%key, attempt, "deletion.interrupted");
					return DeletionOutcome::Interrupted;
				}
				Ok(()) if token.is_cancelled() => {
					tracing::info!(%key, attempt, "deletion.interrupted_before_remove");
					return DeletionOutcome::Interrupted;
				}
				Err(err) => {
					tracing::warn!(%key, attempt, error = %err, "deletion.not_released");
					last_error = err.to_string();
				}
				Ok(()) => match self.reclaimer.remove(&path).await {
					Ok(()) => {
						tracing::info!(%key, attempt, path = %path.display(), "deletion.removed");
						return DeletionOutcome::Removed { attempts: attempt };
					}
					Err(err) => {
						tracing::warn!(%key, attempt, path = %path.display(), error = %err, "deletion.remove_failed");
						last_error = err.to_string();
					}
				},
			}

			if attempt < max_retries {
				tokio::select! {
					biased;
					_ = token.cancelled() => {
						tracing::info!(%key, attempt, "deletion.interrupted");
						return DeletionOutcome::Interrupted;
					}
					_ = tokio::time::sleep(retry_interval) => {}
				}
			}
		}

		tracing::error!(%key, attempts = max_retries, path = %path.display(), error = %last_error, "deletion.abandoned");
		DeletionOutcome::Abandoned {
			attempts: max_retries,
			last_error,
		}
	}
}
