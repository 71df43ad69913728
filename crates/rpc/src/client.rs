//! Searcher client surface and its TCP implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use crate::codec::{self, Call};
use crate::error::Result;
use crate::messages::{QueryRequest, QueryResponse, RpcResponse, WriteRequest, WriteResponse};

/// Write and query-table operations exposed by the searcher.
///
/// Implementations never fail: a missing reply or transport error is
/// reported as [`RpcResponse::null_response`] so the gateway can retry it.
#[async_trait]
pub trait SearcherClient: Send + Sync + 'static {
	async fn write(&self, request: &WriteRequest) -> WriteResponse;

	async fn query_table(&self, request: &QueryRequest) -> QueryResponse;
}

struct Connection {
	reader: BufReader<OwnedReadHalf>,
	writer: OwnedWriteHalf,
}

/// Newline-delimited JSON client over one lazily (re)established TCP connection.
///
/// Calls are serialized on the connection; a failed exchange drops it so
/// the next call reconnects.
pub struct TcpSearcherClient {
	addr: String,
	request_timeout: Duration,
	conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for TcpSearcherClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TcpSearcherClient")
			.field("addr", &self.addr)
			.field("request_timeout", &self.request_timeout)
			.finish_non_exhaustive()
	}
}

impl TcpSearcherClient {
	pub fn new(addr: impl Into<String>, request_timeout: Duration) -> Self {
		Self {
			addr: addr.into(),
			request_timeout,
			conn: Mutex::new(None),
		}
	}

	pub fn addr(&self) -> &str {
		&self.addr
	}

	async fn exchange<T: DeserializeOwned>(&self, call: &Call) -> Result<T> {
		let mut guard = self.conn.lock().await;
		let mut conn = match guard.take() {
			Some(conn) => conn,
			None => {
				let stream = TcpStream::connect(&self.addr).await?;
				stream.set_nodelay(true)?;
				let (read, write) = stream.into_split();
				tracing::debug!(addr = %self.addr, "searcher.connected");
				Connection {
					reader: BufReader::new(read),
					writer: write,
				}
			}
		};

		codec::write_message(&mut conn.writer, call).await?;
		let response = codec::read_message(&mut conn.reader).await?;
		*guard = Some(conn);
		Ok(response)
	}

	async fn round_trip<T: RpcResponse + DeserializeOwned>(&self, call: Call) -> T {
		match tokio::time::timeout(self.request_timeout, self.exchange(&call)).await {
			Ok(Ok(response)) => response,
			Ok(Err(err)) => {
				tracing::debug!(addr = %self.addr, error = %err, "searcher.transport_failed");
				T::null_response(&err.to_string())
			}
			Err(_) => {
				// Dropping the exchange mid-flight also drops its connection.
				tracing::debug!(addr = %self.addr, timeout_ms = self.request_timeout.as_millis() as u64, "searcher.timeout");
				T::null_response("timed out")
			}
		}
	}
}

#[async_trait]
impl SearcherClient for TcpSearcherClient {
	async fn write(&self, request: &WriteRequest) -> WriteResponse {
		self.round_trip(Call::Write(request.clone())).await
	}

	async fn query_table(&self, request: &QueryRequest) -> QueryResponse {
		self.round_trip(Call::QueryTable(request.clone())).await
	}
}

#[cfg(test)]
mod tests {
	use tokio::net::TcpListener;

	use super::*;
	use crate::classify::{Classification, classify};
	use crate::messages::{DocValue, ErrorCode, PartitionRange};

	async fn serve_once(listener: TcpListener) {
		let (stream, _) = listener.accept().await.unwrap();
		let (read, mut write) = stream.into_split();
		let mut read = BufReader::new(read);
		while let Ok(call) = codec::read_message::<Call, _>(&mut read).await {
			match call {
				Call::Write(req) if req.payload.is_empty() => {
					let resp = WriteResponse {
						error_code: Some(ErrorCode::Others),
						error_message: "doc queue is full".to_string(),
					};
					codec::write_message(&mut write, &resp).await.unwrap();
				}
				Call::Write(_) => codec::write_message(&mut write, &WriteResponse::default()).await.unwrap(),
				Call::QueryTable(req) => {
					let mut value = DocValue::default();
					value.summary.insert("_id".to_string(), req.doc_id);
					let resp = QueryResponse {
						values: vec![value],
						..QueryResponse::default()
					};
					codec::write_message(&mut write, &resp).await.unwrap();
				}
			}
		}
	}

	#[tokio::test]
	async fn round_trips_against_a_line_server() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		tokio::spawn(serve_once(listener));

		let client = TcpSearcherClient::new(addr, Duration::from_secs(5));
		let ok = client
			.write(&WriteRequest {
				table: "t".to_string(),
				hash_id: 0,
				payload: "x".to_string(),
			})
			.await;
		assert_eq!(classify(&ok), Classification::Success);

		let busy = client
			.write(&WriteRequest {
				table: "t".to_string(),
				hash_id: 0,
				payload: String::new(),
			})
			.await;
		assert_eq!(classify(&busy), Classification::Retryable);

		let found = client
			.query_table(&QueryRequest {
				table: "t".to_string(),
				partition_range: PartitionRange { lo: 0, hi: 65535 },
				doc_id: "doc-1".to_string(),
			})
			.await;
		assert_eq!(found.values[0].summary["_id"], "doc-1");
	}

	#[tokio::test]
	async fn unreachable_searcher_yields_null_response() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		drop(listener);

		let client = TcpSearcherClient::new(addr, Duration::from_secs(5));
		let resp = client
			.write(&WriteRequest {
				table: "t".to_string(),
				hash_id: 0,
				payload: "x".to_string(),
			})
			.await;
		assert_eq!(resp.error_code, Some(ErrorCode::Unknown));
		assert!(resp.error_message.starts_with("response is null"));
	}

	#[tokio::test]
	async fn silent_searcher_times_out_as_retryable() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		let (release, held) = tokio::sync::oneshot::channel::<()>();
		tokio::spawn(async move {
			let (_stream, _) = listener.accept().await.unwrap();
			let _ = held.await;
		});

		let client = TcpSearcherClient::new(addr, Duration::from_millis(100));
		let resp = client
			.query_table(&QueryRequest {
				table: "t".to_string(),
				partition_range: PartitionRange { lo: 0, hi: 65535 },
				doc_id: "doc-1".to_string(),
			})
			.await;

		assert_eq!(resp.error_code, Some(ErrorCode::Unknown));
		assert!(resp.error_message.starts_with("response is null"));
		assert!(resp.error_message.contains("timed out"));
		assert_eq!(classify(&resp), Classification::Retryable);
		drop(release);
	}
}
