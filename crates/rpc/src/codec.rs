//! Newline-delimited JSON framing.
//!
//! One message per line. Requests are wrapped in a [`Call`] envelope tagged
//! by method; responses are written bare and matched to the request by order.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::messages::{QueryRequest, WriteRequest};

/// Request envelope sent to the searcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Call {
	Write(WriteRequest),
	QueryTable(QueryRequest),
}

/// Reads one JSON message terminated by `\n`.
///
/// Blank lines are skipped. A clean end of stream yields [`Error::Closed`].
pub async fn read_message<T, R>(input: &mut R) -> Result<T>
where
	T: DeserializeOwned,
	R: AsyncBufRead + Unpin + Send,
{
	let mut line = String::new();
	loop {
		line.clear();
		if input.read_line(&mut line).await? == 0 {
			return Err(Error::Closed);
		}
		let trimmed = line.trim();
		if !trimmed.is_empty() {
			return Ok(serde_json::from_str(trimmed)?);
		}
	}
}

/// Writes one JSON message followed by `\n` and flushes.
pub async fn write_message<T, W>(output: &mut W, msg: &T) -> Result<()>
where
	T: Serialize + ?Sized,
	W: AsyncWrite + Unpin + Send,
{
	let mut buf = serde_json::to_vec(msg)?;
	buf.push(b'\n');
	output.write_all(&buf).await?;
	output.flush().await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use tokio::io::BufReader;

	use super::*;
	use crate::messages::WriteResponse;

	#[tokio::test]
	async fn call_envelope_crosses_a_pipe() {
		let (client, server) = tokio::io::duplex(1024);
		let (_, mut client_tx) = tokio::io::split(client);
		let (server_rx, _) = tokio::io::split(server);
		let mut server_rx = BufReader::new(server_rx);

		let call = Call::Write(WriteRequest {
			table: "orders".to_string(),
			hash_id: 0,
			payload: "CMD=add\u{1F}\n\u{1E}\n".to_string(),
		});
		write_message(&mut client_tx, &call).await.unwrap();

		let received: Call = read_message(&mut server_rx).await.unwrap();
		assert_eq!(received, call);
	}

	#[tokio::test]
	async fn envelope_is_tagged_by_method() {
		let call = Call::Write(WriteRequest {
			table: "t".to_string(),
			hash_id: 7,
			payload: String::new(),
		});
		let json = serde_json::to_value(&call).unwrap();
		assert_eq!(json["method"], "write");
		assert_eq!(json["params"]["hash_id"], 7);
	}

	#[tokio::test]
	async fn blank_lines_are_skipped_and_eof_is_closed() {
		let input = b"\n\n{\"error_message\":\"\"}\n".to_vec();
		let mut reader = BufReader::new(input.as_slice());
		let resp: WriteResponse = read_message(&mut reader).await.unwrap();
		assert_eq!(resp, WriteResponse::default());
		let next: Result<WriteResponse> = read_message(&mut reader).await;
		assert!(matches!(next, Err(Error::Closed)));
	}
}
