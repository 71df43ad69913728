use thiserror::Error;

/// Errors raised while supervising the searcher process.
#[derive(Debug, Error)]
pub enum Error {
	/// The start command could not be spawned.
	#[error("failed to launch {role}: {source}")]
	Launch {
		role: String,
		#[source]
		source: std::io::Error,
	},

	/// The role has an empty start command or signature.
	#[error("role {0} is misconfigured: start command and signature must be non-empty")]
	InvalidRole(String),

	/// A blocking probe task panicked or was cancelled.
	#[error("process probe task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
