//! Engine-published target state.
//!
//! The document maps table name to generation id to the partitions that
//! generation serves:
//!
//! ```json
//! { "orders": { "0": { "partitions": { "0_65535": {} } } } }
//! ```
//!
//! Snapshots are replaced whole; the numerically largest generation of a
//! table is authoritative.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::Deserialize;
use tether_worker::{TaskClass, WorkerRuntime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Partitions served by one generation of a table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
	pub partitions: HashMap<String, serde_json::Value>,
}

impl Generation {
	pub fn contains(&self, partition: &str) -> bool {
		self.partitions.contains_key(partition)
	}
}

/// Validated snapshot of the target-state document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetState {
	tables: HashMap<String, BTreeMap<u64, Generation>>,
}

#[derive(Deserialize)]
struct RawGeneration {
	#[serde(default)]
	partitions: HashMap<String, serde_json::Value>,
}

impl TargetState {
	/// Builds a snapshot, rejecting non-numeric generation ids and ids that
	/// collide numerically (e.g. `"1"` and `"01"`).
	pub fn from_document(doc: serde_json::Value) -> Result<Self> {
		let raw: HashMap<String, HashMap<String, RawGeneration>> =
			serde_json::from_value(doc).map_err(|e| Error::InvalidTargetState(e.to_string()))?;

		let mut tables = HashMap::with_capacity(raw.len());
		for (table, generations) in raw {
			let mut by_id = BTreeMap::new();
			for (id, generation) in generations {
				let numeric = parse_generation(&table, &id)?;
				let generation = Generation {
					partitions: generation.partitions,
				};
				if by_id.insert(numeric, generation).is_some() {
					return Err(Error::InvalidTargetState(format!("table {table} has two generations numbered {numeric}")));
				}
			}
			tables.insert(table, by_id);
		}
		Ok(Self { tables })
	}

	pub fn from_json(raw: &str) -> Result<Self> {
		let doc = serde_json::from_str(raw).map_err(|e| Error::InvalidTargetState(e.to_string()))?;
		Self::from_document(doc)
	}

	pub fn contains_table(&self, table: &str) -> bool {
		self.tables.contains_key(table)
	}

	/// Highest generation of `table`.
	pub fn latest_generation(&self, table: &str) -> Option<(u64, &Generation)> {
		self.tables.get(table)?.iter().next_back().map(|(id, g)| (*id, g))
	}

	pub fn tables(&self) -> impl Iterator<Item = &str> {
		self.tables.keys().map(String::as_str)
	}
}

fn parse_generation(table: &str, id: &str) -> Result<u64> {
	if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
		return Err(Error::InvalidTargetState(format!("table {table} has non-numeric generation id {id:?}")));
	}
	id.parse()
		.map_err(|_| Error::InvalidTargetState(format!("table {table} generation id {id} out of range")))
}

/// Predicate over a target-state snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetCondition {
	/// Table present and its latest generation serves the partition.
	Presence { table: String, partition: String },
	/// Table absent, or its latest generation lacks the partition. With no
	/// partition, only whole-table absence counts.
	Absence { table: String, partition: Option<String> },
}

impl TargetCondition {
	/// Evaluates against a snapshot. An absent snapshot satisfies nothing.
	pub fn holds(&self, state: Option<&TargetState>) -> bool {
		let Some(state) = state else {
			return false;
		};
		match self {
			Self::Presence { table, partition } => state.latest_generation(table).is_some_and(|(_, g)| g.contains(partition)),
			Self::Absence { table, partition: None } => !state.contains_table(table),
			Self::Absence {
				table,
				partition: Some(partition),
			} => match state.latest_generation(table) {
				None => true,
				Some((_, g)) => !g.contains(partition),
			},
		}
	}
}

impl fmt::Display for TargetCondition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Presence { table, partition } => write!(f, "presence of {table}/{partition}"),
			Self::Absence { table, partition: None } => write!(f, "absence of {table}"),
			Self::Absence {
				table,
				partition: Some(partition),
			} => write!(f, "absence of {table}/{partition}"),
		}
	}
}

/// Read-only handle to the process-wide target state.
pub trait TargetStateSource: Send + Sync + 'static {
	/// Latest snapshot, or `None` if none was received yet.
	fn snapshot(&self) -> Option<Arc<TargetState>>;

	/// Asks the external channel to refresh the snapshot soon.
	fn request_sync(&self);
}

/// In-process target state populated by whoever owns the external channel.
#[derive(Debug, Default)]
pub struct SharedTargetState {
	current: ArcSwapOption<TargetState>,
	sync: Notify,
	sync_requests: AtomicU64,
}

impl SharedTargetState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replaces the snapshot.
	pub fn publish(&self, state: TargetState) {
		self.current.store(Some(Arc::new(state)));
	}

	/// Drops the snapshot, as if none had been received.
	pub fn clear(&self) {
		self.current.store(None);
	}

	/// Resolves after the next [`TargetStateSource::request_sync`] call, or
	/// immediately if one is already pending.
	pub async fn sync_requested(&self) {
		self.sync.notified().await;
	}

	/// Total sync requests received.
	pub fn sync_requests(&self) -> u64 {
		self.sync_requests.load(Ordering::Acquire)
	}

	/// Spawns a task that reloads the document at `path` every `interval`
	/// and whenever a sync is requested.
	pub fn spawn_file_sync(self: &Arc<Self>, runtime: &WorkerRuntime, path: PathBuf, interval: Duration) -> JoinHandle<()> {
		let shared = self.clone();
		runtime.spawn_tracked(TaskClass::Background, "target-file-sync", move |token| async move {
			loop {
				match tokio::fs::read_to_string(&path).await {
					Ok(raw) => match TargetState::from_json(&raw) {
						Ok(state) => shared.publish(state),
						Err(err) => tracing::warn!(path = %path.display(), error = %err, "target.document_invalid"),
					},
					Err(err) => tracing::debug!(path = %path.display(), error = %err, "target.document_unreadable"),
				}
				tokio::select! {
					_ = token.cancelled() => break,
					_ = shared.sync_requested() => {}
					_ = tokio::time::sleep(interval) => {}
				}
			}
		})
	}
}

impl TargetStateSource for SharedTargetState {
	fn snapshot(&self) -> Option<Arc<TargetState>> {
		self.current.load_full()
	}

	fn request_sync(&self) {
		self.sync_requests.fetch_add(1, Ordering::AcqRel);
		self.sync.notify_one();
	}
}
