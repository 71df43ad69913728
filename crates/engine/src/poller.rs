//! Bounded polling over the eventually consistent target state.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::target::{TargetCondition, TargetState, TargetStateSource};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
	pub interval: Duration,
	pub timeout: Duration,
}

impl Default for PollSettings {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(1),
			timeout: Duration::from_secs(60),
		}
	}
}

/// Waits for conditions over a [`TargetStateSource`].
#[derive(Clone)]
pub struct TargetStatePoller {
	source: Arc<dyn TargetStateSource>,
	settings: PollSettings,
}

impl std::fmt::Debug for TargetStatePoller {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TargetStatePoller").field("settings", &self.settings).finish_non_exhaustive()
	}
}

impl TargetStatePoller {
	pub fn new(source: Arc<dyn TargetStateSource>, settings: PollSettings) -> Self {
		Self { source, settings }
	}

	pub fn settings(&self) -> PollSettings {
		self.settings
	}

	pub fn snapshot(&self) -> Option<Arc<TargetState>> {
		self.source.snapshot()
	}

	/// Requests a resync, then polls until `condition` holds.
	///
	/// Fails with [`Error::Timeout`] once the configured timeout elapses and
	/// with [`Error::Interrupted`] as soon as `cancel` fires, even when the
	/// condition already holds.
	pub async fn wait_until(&self, condition: &TargetCondition, cancel: &CancellationToken) -> Result<()> {
		self.source.request_sync();
		let start = Instant::now();
		let deadline = start + self.settings.timeout;
		let mut polls = 0u32;

		loop {
			if cancel.is_cancelled() {
				return Err(Error::Interrupted(condition.to_string()));
			}
			polls += 1;
			if condition.holds(self.source.snapshot().as_deref()) {
				tracing::debug!(%condition, polls, elapsed_ms = start.elapsed().as_millis() as u64, "target.condition_met");
				return Ok(());
			}
			let now = Instant::now();
			if now >= deadline {
				tracing::warn!(%condition, polls, timeout_ms = self.settings.timeout.as_millis() as u64, "target.wait_timeout");
				return Err(Error::Timeout {
					condition: condition.to_string(),
					waited: now - start,
				});
			}
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(Error::Interrupted(condition.to_string())),
				_ = tokio::time::sleep(self.settings.interval.min(deadline - now)) => {}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::target::SharedTargetState;

	fn poller(shared: &Arc<SharedTargetState>) -> TargetStatePoller {
		TargetStatePoller::new(shared.clone(), PollSettings::default())
	}

	fn absence_p1() -> TargetCondition {
		TargetCondition::Absence {
			table: "t".to_string(),
			partition: Some("p1".to_string()),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn condition_already_true_returns_without_sleeping() {
		let shared = Arc::new(SharedTargetState::new());
		shared.publish(
			TargetState::from_document(json!({
				"t": { "0": { "partitions": { "p1": {} } }, "1": { "partitions": {} } }
			}))
			.unwrap(),
		);
		let start = Instant::now();

		poller(&shared).wait_until(&absence_p1(), &CancellationToken::new()).await.unwrap();

		assert_eq!(start.elapsed(), Duration::ZERO);
		assert_eq!(shared.sync_requests(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn missing_snapshot_times_out() {
		let shared = Arc::new(SharedTargetState::new());
		let start = Instant::now();

		let err = poller(&shared).wait_until(&absence_p1(), &CancellationToken::new()).await.unwrap_err();

		assert!(matches!(err, Error::Timeout { .. }));
		assert_eq!(start.elapsed(), Duration::from_secs(60));
	}

	#[tokio::test(start_paused = true)]
	async fn condition_met_by_a_later_snapshot() {
		let shared = Arc::new(SharedTargetState::new());
		shared.publish(TargetState::from_document(json!({ "t": { "0": { "partitions": { "p1": {} } } } })).unwrap());
		let publisher = shared.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(2500)).await;
			publisher.publish(TargetState::default());
		});
		let start = Instant::now();

		poller(&shared).wait_until(&absence_p1(), &CancellationToken::new()).await.unwrap();

		assert_eq!(start.elapsed(), Duration::from_secs(3));
	}

	#[tokio::test(start_paused = true)]
	async fn cancellation_is_distinct_from_timeout() {
		let shared = Arc::new(SharedTargetState::new());
		let cancel = CancellationToken::new();
		let trigger = cancel.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(1500)).await;
			trigger.cancel();
		});

		let err = poller(&shared).wait_until(&absence_p1(), &cancel).await.unwrap_err();

		assert!(err.is_interrupted());
	}

	#[tokio::test(start_paused = true)]
	async fn fired_token_wins_over_a_holding_condition() {
		let shared = Arc::new(SharedTargetState::new());
		shared.publish(TargetState::default());
		let cancel = CancellationToken::new();
		cancel.cancel();

		let err = poller(&shared).wait_until(&absence_p1(), &cancel).await.unwrap_err();

		assert!(err.is_interrupted());
	}
}
