//! Error types for the RPC layer.

use thiserror::Error;

use crate::messages::ErrorCode;

/// Errors surfaced by the RPC layer once the gateway has given up on a call.
#[derive(Debug, Error)]
pub enum Error {
	/// The searcher answered with a non-retryable error.
	#[error("searcher rejected {call}: {code:?}: {message}")]
	Fatal {
		/// Logical call label.
		call: String,
		/// Error code reported by the searcher.
		code: ErrorCode,
		/// Error message reported by the searcher.
		message: String,
	},

	/// Every attempt allowed by the backoff policy returned a retryable error.
	#[error("{call} still failing after {attempts} attempts: {code:?}: {message}")]
	Exhausted {
		/// Logical call label.
		call: String,
		/// Number of calls made.
		attempts: u32,
		/// Error code of the last response.
		code: ErrorCode,
		/// Error message of the last response.
		message: String,
	},

	/// Cancellation was requested while waiting between attempts.
	#[error("{call} interrupted after {attempts} attempts")]
	Interrupted {
		/// Logical call label.
		call: String,
		/// Number of calls made before cancellation.
		attempts: u32,
	},

	/// Transport-level failure.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Malformed JSON line.
	#[error("codec error: {0}")]
	Codec(#[from] serde_json::Error),

	/// Peer closed the connection.
	#[error("connection closed")]
	Closed,
}

impl Error {
	/// Returns `true` if the call was abandoned because of cancellation.
	pub fn is_interrupted(&self) -> bool {
		matches!(self, Self::Interrupted { .. })
	}
}

/// Result alias for RPC operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
