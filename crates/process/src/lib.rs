//! Lifecycle management for the externally managed searcher process.
//!
//! The bridge never owns the searcher's process handle. Every check re-derives
//! the set of matching processes from the OS process table through a
//! [`ProcessProbe`], so restarts of the bridge itself do not lose track of a
//! running searcher.

mod disk;
mod error;
mod launcher;
mod probe;
mod role;
mod supervisor;

#[doc(hidden)]
pub mod test_helpers;

pub use disk::disk_usage;
pub use error::{Error, Result};
pub use launcher::{ProcessLauncher, ShellLauncher};
pub use probe::{ProcessInfo, ProcessProbe, SysinfoProbe};
pub use role::ProcessRole;
pub use supervisor::{HealthEvent, ProcessSupervisor, StartOutcome, StopOutcome};
