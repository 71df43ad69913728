//! Resilient wrapper around one logical searcher call.
//!
//! The gateway never raises for expected conditions. Every call yields a
//! [`GatewayResult`] carrying the last response together with a typed
//! [`CallOutcome`]; callers decide what each outcome means for them.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::classify::{Classification, classify};
use crate::error::{Error, Result};
use crate::messages::{ErrorCode, RpcResponse};

/// Terminal disposition of a gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
	Success,
	/// Non-retryable error returned by the searcher.
	Fatal,
	/// Every allowed attempt was retryable.
	Exhausted,
	/// Cancelled while sleeping between attempts.
	Interrupted,
}

/// Last response plus bookkeeping for one gateway call.
#[derive(Debug, Clone)]
pub struct GatewayResult<R> {
	pub response: R,
	pub outcome: CallOutcome,
	pub attempts: u32,
	pub elapsed: Duration,
}

impl<R: RpcResponse> GatewayResult<R> {
	/// Converts a non-success outcome into an [`Error`] tagged with `call`.
	pub fn into_result(self, call: &str) -> Result<R> {
		let code = self.response.error_code().unwrap_or(ErrorCode::Unknown);
		match self.outcome {
			CallOutcome::Success => Ok(self.response),
			CallOutcome::Fatal => Err(Error::Fatal {
				call: call.to_string(),
				code,
				message: self.response.error_message().to_string(),
			}),
			CallOutcome::Exhausted => Err(Error::Exhausted {
				call: call.to_string(),
				attempts: self.attempts,
				code,
				message: self.response.error_message().to_string(),
			}),
			CallOutcome::Interrupted => Err(Error::Interrupted {
				call: call.to_string(),
				attempts: self.attempts,
			}),
		}
	}
}

/// Retrying, classified RPC call wrapper.
#[derive(Debug, Clone, Default)]
pub struct RpcGateway {
	policy: BackoffPolicy,
}

impl RpcGateway {
	pub fn new(policy: BackoffPolicy) -> Self {
		Self { policy }
	}

	pub fn policy(&self) -> &BackoffPolicy {
		&self.policy
	}

	/// Invokes `call` until it succeeds, fails fatally, runs out of attempts
	/// or `cancel` fires during a backoff sleep.
	///
	/// The first invocation always happens. At most `max_attempts`
	/// invocations are made. Backoff sleeps only suspend the calling task.
	pub async fn call<R, F, Fut>(&self, label: &str, cancel: &CancellationToken, mut call: F) -> GatewayResult<R>
	where
		R: RpcResponse,
		F: FnMut() -> Fut,
		Fut: Future<Output = R>,
	{
		let start = Instant::now();
		let mut delays = self.policy.delays();
		let mut attempts = 0u32;

		loop {
			let response = call().await;
			attempts += 1;
			let classification = classify(&response);
			tracing::debug!(
				call = label,
				attempt = attempts,
				elapsed_ms = start.elapsed().as_millis() as u64,
				?classification,
				"rpc.attempt"
			);

			let outcome = match classification {
				Classification::Success => Some(CallOutcome::Success),
				Classification::Fatal => Some(CallOutcome::Fatal),
				Classification::Retryable => None,
			};
			if let Some(outcome) = outcome {
				if attempts > 1 {
					tracing::info!(call = label, attempts, elapsed_ms = start.elapsed().as_millis() as u64, ?outcome, "rpc.retry.done");
				}
				return GatewayResult {
					response,
					outcome,
					attempts,
					elapsed: start.elapsed(),
				};
			}

			let Some(delay) = delays.next() else {
				tracing::warn!(
					call = label,
					attempts,
					elapsed_ms = start.elapsed().as_millis() as u64,
					error = response.error_message(),
					"rpc.retry.exhausted"
				);
				return GatewayResult {
					response,
					outcome: CallOutcome::Exhausted,
					attempts,
					elapsed: start.elapsed(),
				};
			};

			tokio::select! {
				biased;
				_ = cancel.cancelled() => {
					tracing::info!(call = label, attempts, elapsed_ms = start.elapsed().as_millis() as u64, "rpc.retry.interrupted");
					return GatewayResult {
						response,
						outcome: CallOutcome::Interrupted,
						attempts,
						elapsed: start.elapsed(),
					};
				}
				_ = tokio::time::sleep(delay) => {}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;
	use crate::messages::WriteResponse;

	fn queue_full() -> WriteResponse {
		WriteResponse {
			error_code: Some(ErrorCode::Others),
			error_message: "doc queue is full".to_string(),
		}
	}

	/// Returns a call closure that fails with `queue full` for the first `failures` calls.
	fn flaky(failures: u32, calls: Arc<AtomicU32>) -> impl FnMut() -> std::future::Ready<WriteResponse> {
		move || {
			let n = calls.fetch_add(1, Ordering::SeqCst);
			std::future::ready(if n < failures { queue_full() } else { WriteResponse::default() })
		}
	}

	#[tokio::test(start_paused = true)]
	async fn succeeds_after_queue_full_retries() {
		let gateway = RpcGateway::default();
		let calls = Arc::new(AtomicU32::new(0));
		let start = Instant::now();

		let result = gateway.call("write", &CancellationToken::new(), flaky(3, calls.clone())).await;

		assert_eq!(result.outcome, CallOutcome::Success);
		assert_eq!(result.attempts, 4);
		assert_eq!(calls.load(Ordering::SeqCst), 4);
		assert_eq!(start.elapsed(), Duration::from_millis(50 + 100 + 200));
	}

	#[tokio::test(start_paused = true)]
	async fn exhaustion_bounds_calls_and_sleeps() {
		let gateway = RpcGateway::default();
		let calls = Arc::new(AtomicU32::new(0));
		let start = Instant::now();

		let result = gateway.call("write", &CancellationToken::new(), flaky(u32::MAX, calls.clone())).await;

		assert_eq!(result.outcome, CallOutcome::Exhausted);
		assert_eq!(calls.load(Ordering::SeqCst), 10);
		assert_eq!(start.elapsed(), gateway.policy().delays().sum::<Duration>());
		assert_eq!(result.response, queue_full());
	}

	#[tokio::test(start_paused = true)]
	async fn fatal_response_is_not_retried() {
		let gateway = RpcGateway::default();
		let calls = Arc::new(AtomicU32::new(0));
		let counter = calls.clone();
		let result = gateway
			.call("write", &CancellationToken::new(), move || {
				counter.fetch_add(1, Ordering::SeqCst);
				std::future::ready(WriteResponse {
					error_code: Some(ErrorCode::InvalidRequest),
					error_message: "bad payload".to_string(),
				})
			})
			.await;

		assert_eq!(result.outcome, CallOutcome::Fatal);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(matches!(result.into_result("write"), Err(Error::Fatal { code: ErrorCode::InvalidRequest, .. })));
	}

	#[tokio::test(start_paused = true)]
	async fn cancellation_during_sleep_returns_last_response() {
		let gateway = RpcGateway::default();
		let calls = Arc::new(AtomicU32::new(0));
		let cancel = CancellationToken::new();
		let trigger = cancel.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(75)).await;
			trigger.cancel();
		});

		let result = gateway.call("write", &cancel, flaky(u32::MAX, calls.clone())).await;

		assert_eq!(result.outcome, CallOutcome::Interrupted);
		assert_eq!(result.attempts, 2);
		assert_eq!(result.response, queue_full());
		assert!(result.into_result("write").is_err_and(|e| e.is_interrupted()));
	}
}
