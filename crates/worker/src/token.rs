use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Monotonic id source for spawned worker tasks.
#[derive(Debug, Default, Clone)]
pub struct TaskIdClock {
	next: Arc<AtomicU64>,
}

impl TaskIdClock {
	/// Creates a clock whose first id is 1.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next task id.
	pub fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}
}

/// Id-scoped cancellation handle for one worker task.
///
/// Cancelling the runtime root cancels every task token derived from it;
/// cancelling a task token only affects that task and its children.
#[derive(Debug, Clone)]
pub struct TaskToken {
	id: u64,
	cancel: CancellationToken,
}

impl TaskToken {
	/// Creates a task token.
	pub fn new(id: u64, cancel: CancellationToken) -> Self {
		Self { id, cancel }
	}

	/// Returns the task id.
	pub const fn id(&self) -> u64 {
		self.id
	}

	/// Returns true when cancellation is requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Requests cancellation.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Future resolving when cancellation is requested.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}

	/// Returns the underlying cancellation token.
	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Creates a child token with the same id.
	pub fn child(&self) -> Self {
		Self {
			id: self.id,
			cancel: self.cancel.child_token(),
		}
	}
}
