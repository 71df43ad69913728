use std::sync::Arc;
use std::time::Duration;

use tether_worker::{TaskClass, WorkerRuntime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{ProcessInfo, ProcessLauncher, ProcessProbe, ProcessRole, Result};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const EVENT_CAPACITY: usize = 64;

/// Health notifications published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
	/// No process matches the role.
	Dead { role: String },
	/// Several processes match the role. Left for an operator to resolve.
	Ambiguous { role: String, matches: usize },
	Restarted { role: String },
	RestartFailed { role: String, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
	/// At least one matching process already existed; nothing was launched.
	AlreadyRunning { matches: usize },
	Launched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
	NotRunning,
	/// Every matching process exited after the graceful request.
	Stopped,
	/// Processes still matching after the timeout were force killed.
	Killed { survivors: usize },
}

/// Start/stop/liveness control for externally managed processes.
#[derive(Clone)]
pub struct ProcessSupervisor {
	probe: Arc<dyn ProcessProbe>,
	launcher: Arc<dyn ProcessLauncher>,
	events: broadcast::Sender<HealthEvent>,
}

impl std::fmt::Debug for ProcessSupervisor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProcessSupervisor")
			.field("subscribers", &self.events.receiver_count())
			.finish_non_exhaustive()
	}
}

impl ProcessSupervisor {
	pub fn new(probe: Arc<dyn ProcessProbe>, launcher: Arc<dyn ProcessLauncher>) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self { probe, launcher, events }
	}

	/// Subscribes to health events.
	pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
		self.events.subscribe()
	}

	async fn matching(&self, role: &ProcessRole) -> Result<Vec<ProcessInfo>> {
		let probe = self.probe.clone();
		let role = role.clone();
		let matches = tether_worker::spawn_blocking(TaskClass::IoBlocking, move || {
			probe.processes().into_iter().filter(|p| role.matches(&p.command)).collect::<Vec<_>>()
		})
		.await?;
		Ok(matches)
	}

	async fn signal(&self, pids: Vec<u32>, force: bool) -> Result<()> {
		let probe = self.probe.clone();
		tether_worker::spawn_blocking(TaskClass::IoBlocking, move || {
			for pid in pids {
				if !probe.terminate(pid, force) {
					tracing::debug!(pid, force, "process.signal_missed");
				}
			}
		})
		.await?;
		Ok(())
	}

	/// Launches the role unless some matching process already exists.
	pub async fn start(&self, role: &ProcessRole) -> Result<StartOutcome> {
		role.validate()?;
		let existing = self.matching(role).await?.len();
		if existing > 0 {
			tracing::debug!(role = %role.name, matches = existing, "process.start.skipped");
			return Ok(StartOutcome::AlreadyRunning { matches: existing });
		}
		self.launcher.launch(role)?;
		Ok(StartOutcome::Launched)
	}

	/// Requests termination of every matching process and force kills any
	/// that remain after `stop_timeout`.
	pub async fn stop(&self, role: &ProcessRole, stop_timeout: Duration) -> Result<StopOutcome> {
		let pids: Vec<_> = self.matching(role).await?.into_iter().map(|p| p.pid).collect();
		if pids.is_empty() {
			return Ok(StopOutcome::NotRunning);
		}
		tracing::info!(role = %role.name, count = pids.len(), "process.stop");
		self.signal(pids, false).await?;

		let deadline = Instant::now() + stop_timeout;
		loop {
			let remaining = self.matching(role).await?;
			if remaining.is_empty() {
				return Ok(StopOutcome::Stopped);
			}
			let now = Instant::now();
			if now >= deadline {
				let survivors = remaining.len();
				tracing::warn!(role = %role.name, survivors, timeout_ms = stop_timeout.as_millis() as u64, "process.stop.force_kill");
				self.signal(remaining.into_iter().map(|p| p.pid).collect(), true).await?;
				return Ok(StopOutcome::Killed { survivors });
			}
			tokio::time::sleep(STOP_POLL_INTERVAL.min(deadline - now)).await;
		}
	}

	/// Returns `true` iff exactly one process matches the role.
	///
	/// Zero matches means the role is down; more than one means a stale or
	/// duplicate instance is competing for the same data and counts as unhealthy.
	pub async fn is_alive(&self, role: &ProcessRole) -> bool {
		match self.matching(role).await {
			Ok(matches) => matches.len() == 1,
			Err(err) => {
				tracing::warn!(role = %role.name, error = %err, "process.probe_failed");
				false
			}
		}
	}

	/// Checks one role and relaunches it when no process matches.
	///
	/// Several matches are reported as [`HealthEvent::Ambiguous`] and left
	/// running. Returns the final event published, or `None` if the role was
	/// healthy.
	pub async fn check_and_restore(&self, role: &ProcessRole) -> Option<HealthEvent> {
		let matches = match self.matching(role).await {
			Ok(matches) => matches.len(),
			Err(err) => {
				tracing::warn!(role = %role.name, error = %err, "process.probe_failed");
				return None;
			}
		};
		match matches {
			1 => return None,
			0 => {}
			_ => {
				tracing::error!(role = %role.name, matches, "process.ambiguous");
				let event = HealthEvent::Ambiguous {
					role: role.name.clone(),
					matches,
				};
				self.publish(event.clone());
				return Some(event);
			}
		}

		tracing::warn!(role = %role.name, "process.dead");
		self.publish(HealthEvent::Dead { role: role.name.clone() });

		let event = match self.start(role).await {
			Ok(_) => HealthEvent::Restarted { role: role.name.clone() },
			Err(err) => {
				tracing::error!(role = %role.name, error = %err, "process.restart_failed");
				HealthEvent::RestartFailed {
					role: role.name.clone(),
					error: err.to_string(),
				}
			}
		};
		self.publish(event.clone());
		Some(event)
	}

	fn publish(&self, event: HealthEvent) {
		// No subscribers is fine.
		let _ = self.events.send(event);
	}

	/// Spawns the periodic health check for `roles` on `runtime`.
	///
	/// The loop exits when the runtime root is cancelled.
	pub fn spawn_health_loop(&self, runtime: &WorkerRuntime, roles: Vec<ProcessRole>, interval: Duration) -> JoinHandle<()> {
		let supervisor = self.clone();
		runtime.spawn_tracked(TaskClass::Background, "process-health", move |token| async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			// The first tick completes immediately; startup owns the first launch.
			ticker.tick().await;
			loop {
				tokio::select! {
					_ = token.cancelled() => break,
					_ = ticker.tick() => {}
				}
				for role in &roles {
					supervisor.check_and_restore(role).await;
				}
			}
			tracing::debug!("process.health_loop.stopped");
		})
	}
}
