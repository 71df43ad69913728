use std::future::Future;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::TaskClass;

/// Spawns `fut` on the current tokio runtime inside a `worker.task` span.
///
/// Panics when called outside a runtime, like [`tokio::spawn`].
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	let span = tracing::debug_span!("worker.task", class = class.as_str());
	tokio::spawn(fut.instrument(span))
}

/// Runs `f` on the blocking pool inside a `worker.blocking` span.
pub fn spawn_blocking<F, R>(class: TaskClass, f: F) -> JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let span = tracing::debug_span!("worker.blocking", class = class.as_str());
	tokio::task::spawn_blocking(move || span.in_scope(f))
}
