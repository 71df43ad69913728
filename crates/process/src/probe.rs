//! OS process table access.

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};

/// One entry of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
	pub pid: u32,
	/// Full command line, arguments joined by spaces.
	pub command: String,
}

/// Capability to enumerate and signal OS processes.
///
/// Calls may block; the supervisor runs them on the blocking pool.
pub trait ProcessProbe: Send + Sync + 'static {
	/// Returns a fresh snapshot of the process table.
	fn processes(&self) -> Vec<ProcessInfo>;

	/// Sends a termination request, or a kill when `force` is set.
	///
	/// Returns `false` if the process no longer exists or could not be signalled.
	fn terminate(&self, pid: u32, force: bool) -> bool;
}

/// Production probe backed by `sysinfo`.
pub struct SysinfoProbe {
	system: Mutex<System>,
}

impl std::fmt::Debug for SysinfoProbe {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SysinfoProbe").finish_non_exhaustive()
	}
}

impl Default for SysinfoProbe {
	fn default() -> Self {
		Self::new()
	}
}

impl SysinfoProbe {
	pub fn new() -> Self {
		Self {
			system: Mutex::new(System::new()),
		}
	}

	fn refresh(system: &mut System) {
		system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always));
	}
}

impl ProcessProbe for SysinfoProbe {
	fn processes(&self) -> Vec<ProcessInfo> {
		let mut system = self.system.lock();
		Self::refresh(&mut system);
		system
			.processes()
			.iter()
			// On Linux every thread shows up as its own entry carrying the
			// parent's command line.
			.filter(|(_, process)| process.thread_kind().is_none())
			.map(|(pid, process)| {
				let command = process
					.cmd()
					.iter()
					.map(|arg| arg.to_string_lossy())
					.collect::<Vec<_>>()
					.join(" ");
				ProcessInfo { pid: pid.as_u32(), command }
			})
			.filter(|info| !info.command.is_empty())
			.collect()
	}

	fn terminate(&self, pid: u32, force: bool) -> bool {
		let system = self.system.lock();
		let Some(process) = system.process(Pid::from_u32(pid)) else {
			return false;
		};
		if force {
			process.kill()
		} else {
			process.kill_with(Signal::Term).unwrap_or_else(|| process.kill())
		}
	}
}
