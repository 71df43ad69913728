use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::TaskClass;

/// Snapshot for one in-flight worker task.
#[derive(Debug, Clone)]
pub struct TaskRecord {
	pub id: u64,
	pub name: String,
	pub class: TaskClass,
	pub started: Instant,
}

/// In-memory registry of in-flight worker tasks for status snapshots.
#[derive(Debug, Default, Clone)]
pub struct WorkerRegistry {
	inner: Arc<RwLock<HashMap<u64, TaskRecord>>>,
	idle: Arc<Notify>,
}

impl WorkerRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts or replaces one record.
	pub fn upsert(&self, record: TaskRecord) {
		self.inner.write().insert(record.id, record);
	}

	/// Removes one record. Removing an unknown id is a no-op.
	pub fn remove(&self, id: u64) -> bool {
		let mut inner = self.inner.write();
		let removed = inner.remove(&id).is_some();
		if removed && inner.is_empty() {
			self.idle.notify_waiters();
		}
		removed
	}

	/// Waits until no task is in flight.
	pub async fn wait_idle(&self) {
		loop {
			let notified = self.idle.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();
			if self.is_empty() {
				return;
			}
			notified.await;
		}
	}

	/// Returns the number of in-flight tasks.
	pub fn len(&self) -> usize {
		self.inner.read().len()
	}

	/// Returns `true` if no task is in flight.
	pub fn is_empty(&self) -> bool {
		self.inner.read().is_empty()
	}

	/// Returns snapshots sorted by name, then id.
	pub fn snapshots(&self) -> Vec<TaskRecord> {
		let mut records: Vec<_> = self.inner.read().values().cloned().collect();
		records.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
		records
	}
}
