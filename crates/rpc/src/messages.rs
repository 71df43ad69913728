//! Request and response payloads exchanged with the searcher.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Error codes reported by the searcher. A response without a code succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// Unclassified failure; also used for missing or empty responses.
	Unknown,
	/// Catch-all server-side failure carrying a descriptive message.
	Others,
	/// Lookup matched no document.
	NoRecord,
	/// Request was malformed.
	InvalidRequest,
	/// Any code this client does not know about.
	#[serde(other)]
	Unrecognized,
}

/// Inclusive slice of the hash space owned by one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionRange {
	pub lo: u32,
	pub hi: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
	pub table: String,
	pub hash_id: u32,
	pub payload: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error_code: Option<ErrorCode>,
	#[serde(default)]
	pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
	pub table: String,
	pub partition_range: PartitionRange,
	pub doc_id: String,
}

/// One matched document: integer attributes plus string summary fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocValue {
	#[serde(default)]
	pub attrs: BTreeMap<String, i64>,
	#[serde(default)]
	pub summary: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error_code: Option<ErrorCode>,
	#[serde(default)]
	pub error_message: String,
	#[serde(default)]
	pub values: Vec<DocValue>,
}

/// Common view over searcher responses used for classification.
pub trait RpcResponse: Send + 'static {
	fn error_code(&self) -> Option<ErrorCode>;

	fn error_message(&self) -> &str;

	/// Response standing in for a missing reply or a transport failure.
	///
	/// Always classified as retryable.
	fn null_response(detail: &str) -> Self;
}

fn null_message(detail: &str) -> String {
	if detail.is_empty() {
		"response is null".to_string()
	} else {
		format!("response is null: {detail}")
	}
}

impl RpcResponse for WriteResponse {
	fn error_code(&self) -> Option<ErrorCode> {
		self.error_code
	}

	fn error_message(&self) -> &str {
		&self.error_message
	}

	fn null_response(detail: &str) -> Self {
		Self {
			error_code: Some(ErrorCode::Unknown),
			error_message: null_message(detail),
		}
	}
}

impl RpcResponse for QueryResponse {
	fn error_code(&self) -> Option<ErrorCode> {
		self.error_code
	}

	fn error_message(&self) -> &str {
		&self.error_message
	}

	fn null_response(detail: &str) -> Self {
		Self {
			error_code: Some(ErrorCode::Unknown),
			error_message: null_message(detail),
			values: Vec::new(),
		}
	}
}
