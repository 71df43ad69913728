use std::future::Future;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::{TaskRecord, WorkerRegistry};
use crate::token::{TaskIdClock, TaskToken};
use crate::{TaskClass, spawn};

/// How long [`WorkerRuntime::shutdown`] waits for tracked tasks to wind down.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runtime entrypoint for bridge task execution.
///
/// Owns a root cancellation token. Tasks started with [`Self::spawn_tracked`]
/// receive a child [`TaskToken`] and stay visible in [`Self::registry`] until
/// they finish, so shutdown can cancel them and wait for them.
#[derive(Debug, Clone)]
pub struct WorkerRuntime {
	registry: WorkerRegistry,
	ids: TaskIdClock,
	root: CancellationToken,
}

impl Default for WorkerRuntime {
	fn default() -> Self {
		Self::new()
	}
}

impl WorkerRuntime {
	pub fn new() -> Self {
		Self::with_root(CancellationToken::new())
	}

	/// Creates a runtime whose tasks are cancelled together with `root`.
	pub fn with_root(root: CancellationToken) -> Self {
		Self {
			registry: WorkerRegistry::new(),
			ids: TaskIdClock::new(),
			root,
		}
	}

	/// Spawns a named task that receives its own child cancellation token.
	///
	/// The task is registered before it starts and deregistered when the
	/// future completes, whether or not it observed cancellation.
	pub fn spawn_tracked<F, Fut>(&self, class: TaskClass, name: impl Into<String>, f: F) -> JoinHandle<Fut::Output>
	where
		F: FnOnce(TaskToken) -> Fut,
		Fut: Future + Send + 'static,
		Fut::Output: Send + 'static,
	{
		let token = self.child_token();
		let id = token.id();
		let name = name.into();
		self.registry.upsert(TaskRecord {
			id,
			name: name.clone(),
			class,
			started: Instant::now(),
		});

		let registry = self.registry.clone();
		let fut = f(token);
		spawn(class, async move {
			let out = fut.await;
			registry.remove(id);
			tracing::trace!(task_id = id, task = %name, "worker.task.done");
			out
		})
	}

	/// Returns a fresh task token derived from the runtime root.
	pub fn child_token(&self) -> TaskToken {
		TaskToken::new(self.ids.next(), self.root.child_token())
	}

	pub fn root(&self) -> &CancellationToken {
		&self.root
	}

	/// Cancels the root token and waits up to [`SHUTDOWN_GRACE`] for tracked
	/// tasks to finish. Returns the number still running afterwards.
	pub async fn shutdown(&self) -> usize {
		self.shutdown_within(SHUTDOWN_GRACE).await
	}

	pub async fn shutdown_within(&self, grace: Duration) -> usize {
		tracing::debug!(in_flight = self.registry.len(), "worker.shutdown");
		self.root.cancel();
		if tokio::time::timeout(grace, self.registry.wait_idle()).await.is_err() {
			let stuck: Vec<_> = self.registry.snapshots().into_iter().map(|r| r.name).collect();
			tracing::warn!(?stuck, grace_ms = grace.as_millis() as u64, "worker.shutdown.stuck");
		}
		self.registry.len()
	}

	pub fn registry(&self) -> &WorkerRegistry {
		&self.registry
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

	use super::*;

	#[tokio::test]
	async fn tracked_task_deregisters_on_completion() {
		let rt = WorkerRuntime::new();
		let hits = Arc::new(AtomicUsize::new(0));
		let seen = hits.clone();
		let handle = rt.spawn_tracked(TaskClass::Background, "tick", move |_token| async move {
			seen.fetch_add(1, Ordering::SeqCst);
		});
		handle.await.expect("task join");
		assert_eq!(hits.load(Ordering::SeqCst), 1);
		assert!(rt.registry().is_empty());
	}

	#[tokio::test]
	async fn shutdown_cancels_tracked_tasks() {
		let rt = WorkerRuntime::new();
		let handle = rt.spawn_tracked(TaskClass::Reclaim, "wait", |token| async move {
			token.cancelled().await;
			"cancelled"
		});
		assert_eq!(rt.registry().snapshots()[0].name, "wait");
		assert_eq!(rt.shutdown().await, 0);
		assert_eq!(handle.await.expect("task join"), "cancelled");
		assert!(rt.registry().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_waits_for_cleanup_after_cancellation() {
		let rt = WorkerRuntime::new();
		let cleaned = Arc::new(AtomicBool::new(false));
		let flag = cleaned.clone();
		rt.spawn_tracked(TaskClass::Background, "cleanup", move |token| async move {
			token.cancelled().await;
			tokio::time::sleep(Duration::from_millis(200)).await;
			flag.store(true, Ordering::SeqCst);
		});

		assert_eq!(rt.shutdown().await, 0);
		assert!(cleaned.load(Ordering::SeqCst));
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_gives_up_on_tasks_ignoring_cancellation() {
		let rt = WorkerRuntime::new();
		rt.spawn_tracked(TaskClass::Background, "stubborn", |_token| async move {
			tokio::time::sleep(Duration::from_secs(3600)).await;
		});

		assert_eq!(rt.shutdown_within(Duration::from_secs(1)).await, 1);
		assert_eq!(rt.registry().snapshots()[0].name, "stubborn");
	}
}
