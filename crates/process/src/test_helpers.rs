//! Synthetic process tables and launchers for supervisor tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::{Error, ProcessInfo, ProcessLauncher, ProcessProbe, ProcessRole, Result};

/// In-memory process table.
#[derive(Debug)]
pub struct FakeProbe {
	table: Mutex<Vec<ProcessInfo>>,
	signals: Mutex<Vec<(u32, bool)>>,
	next_pid: AtomicU32,
	ignore_term: bool,
}

impl Default for FakeProbe {
	fn default() -> Self {
		Self::new()
	}
}

impl FakeProbe {
	pub fn new() -> Self {
		Self {
			table: Mutex::new(Vec::new()),
			signals: Mutex::new(Vec::new()),
			next_pid: AtomicU32::new(1000),
			ignore_term: false,
		}
	}

	/// Probe whose processes survive graceful termination requests.
	pub fn stubborn() -> Self {
		Self {
			ignore_term: true,
			..Self::new()
		}
	}

	/// Adds a process with the given command line and returns its pid.
	pub fn add(&self, command: impl Into<String>) -> u32 {
		let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
		self.table.lock().push(ProcessInfo { pid, command: command.into() });
		pid
	}

	/// Removes every process, as if they all crashed.
	pub fn clear(&self) {
		self.table.lock().clear();
	}

	pub fn len(&self) -> usize {
		self.table.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.table.lock().is_empty()
	}

	/// Signals received so far as `(pid, force)`.
	pub fn signals(&self) -> Vec<(u32, bool)> {
		self.signals.lock().clone()
	}
}

impl ProcessProbe for FakeProbe {
	fn processes(&self) -> Vec<ProcessInfo> {
		self.table.lock().clone()
	}

	fn terminate(&self, pid: u32, force: bool) -> bool {
		self.signals.lock().push((pid, force));
		let mut table = self.table.lock();
		let Some(pos) = table.iter().position(|p| p.pid == pid) else {
			return false;
		};
		if force || !self.ignore_term {
			table.remove(pos);
		}
		true
	}
}

/// Launcher that registers a process in a [`FakeProbe`] instead of spawning one.
#[derive(Debug)]
pub struct TestLauncher {
	probe: Arc<FakeProbe>,
	launches: Mutex<Vec<String>>,
	fail: bool,
}

impl TestLauncher {
	pub fn new(probe: Arc<FakeProbe>) -> Self {
		Self {
			probe,
			launches: Mutex::new(Vec::new()),
			fail: false,
		}
	}

	/// Launcher whose every launch fails.
	pub fn failing(probe: Arc<FakeProbe>) -> Self {
		Self { fail: true, ..Self::new(probe) }
	}

	/// Role names launched so far.
	pub fn launches(&self) -> Vec<String> {
		self.launches.lock().clone()
	}
}

impl ProcessLauncher for TestLauncher {
	fn launch(&self, role: &ProcessRole) -> Result<()> {
		self.launches.lock().push(role.name.clone());
		if self.fail {
			return Err(Error::Launch {
				role: role.name.clone(),
				source: std::io::Error::other("launch refused"),
			});
		}
		self.probe.add(format!("{} --role {}", role.signature, role.name));
		Ok(())
	}
}
