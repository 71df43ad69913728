//! Classified background task runtime shared by the bridge components.
//!
//! Every long-running piece of the bridge (per-shard refresh loops, per-key
//! reclamation workflows, process health checks) runs as a task spawned
//! through this crate so it carries a [`TaskClass`], a cancellation token
//! derived from the runtime root, and an entry in the [`WorkerRegistry`].
//!
//! * [`WorkerRuntime`]: tracked spawning and graceful shutdown
//! * [`TaskToken`]: id-scoped cancellation handle handed to each task
//! * [`WorkerRegistry`]: in-flight task snapshots for status reporting

mod class;
mod registry;
mod runtime;
mod spawn;
mod token;

pub use class::TaskClass;
pub use registry::{TaskRecord, WorkerRegistry};
pub use runtime::{SHUTDOWN_GRACE, WorkerRuntime};
pub use spawn::{spawn, spawn_blocking};
pub use token::{TaskIdClock, TaskToken};
