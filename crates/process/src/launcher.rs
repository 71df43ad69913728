//! Process launch abstraction for production and testing.

use std::process::Stdio;

use crate::{Error, ProcessRole, Result};

/// Starts a role's process without waiting for it.
pub trait ProcessLauncher: Send + Sync + 'static {
	fn launch(&self, role: &ProcessRole) -> Result<()>;
}

/// Production launcher running the role's start command through `sh -c`.
///
/// The child is detached: the supervisor tracks it through the process
/// table, not through the returned handle.
#[derive(Debug, Clone, Default)]
pub struct ShellLauncher;

impl ProcessLauncher for ShellLauncher {
	fn launch(&self, role: &ProcessRole) -> Result<()> {
		let child = tokio::process::Command::new("sh")
			.arg("-c")
			.arg(&role.start_command)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.spawn()
			.map_err(|source| Error::Launch {
				role: role.name.clone(),
				source,
			})?;
		tracing::info!(role = %role.name, pid = child.id(), "process.launched");
		Ok(())
	}
}
