//! RPC plumbing between the bridge and the external searcher process.
//!
//! * [`RpcGateway`]: wraps one logical call with classification, backoff and cancellation
//! * [`SearcherClient`]: write / query-table surface of the searcher
//! * [`TcpSearcherClient`]: newline-delimited JSON client over TCP
//! * [`codec`]: line framing shared by the client and test servers

pub mod backoff;
pub mod classify;
pub mod client;
pub mod codec;
pub mod error;
pub mod gateway;
pub mod messages;

pub use backoff::BackoffPolicy;
pub use classify::{Classification, classify};
pub use client::{SearcherClient, TcpSearcherClient};
pub use error::{Error, Result};
pub use gateway::{CallOutcome, GatewayResult, RpcGateway};
pub use messages::{DocValue, ErrorCode, PartitionRange, QueryRequest, QueryResponse, RpcResponse, WriteRequest, WriteResponse};
