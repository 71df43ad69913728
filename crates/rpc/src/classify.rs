//! Response classification driving the retry decision.

use crate::messages::{ErrorCode, RpcResponse};

const NULL_RESPONSE: &str = "response is null";
const QUEUE_FULL: &str = "doc queue is full";
const PARTITION_NOT_READY: &str = "no valid table/range";

/// Retry disposition of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
	Success,
	/// Transient condition; the same request may succeed later.
	Retryable,
	/// Any other error; retrying will not help.
	Fatal,
}

/// Classifies a response by error code and transient message patterns.
pub fn classify<R: RpcResponse + ?Sized>(response: &R) -> Classification {
	let Some(code) = response.error_code() else {
		return Classification::Success;
	};
	let message = response.error_message();
	let transient = match code {
		ErrorCode::Unknown => message.contains(NULL_RESPONSE),
		ErrorCode::Others => message.contains(QUEUE_FULL) || message.contains(PARTITION_NOT_READY),
		_ => false,
	};
	if transient { Classification::Retryable } else { Classification::Fatal }
}
