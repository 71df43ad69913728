//! Node-level assembly of shard engines, reclamation and health handling
//! from one [`BridgeConfig`].

use std::path::PathBuf;
use std::sync::Arc;

use tether_process::HealthEvent;
use tether_rpc::{RpcGateway, SearcherClient, TcpSearcherClient};
use tether_worker::WorkerRuntime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::commit::FileCommitStore;
use crate::config::BridgeConfig;
use crate::deletion::{DeletionCoordinator, DeletionOutcome, FsReclaimer};
use crate::layout::RuntimeLayout;
use crate::poller::TargetStatePoller;
use crate::range::{ShardId, partition_range};
use crate::registry::EngineRegistry;
use crate::shard::{CheckpointSupplier, EngineContext, ShardEngine, ShardEngineConfig};
use crate::target::SharedTargetState;
use crate::{Error, Result};

/// Every shard engine of one node plus the reclamation coordinator they share.
pub struct Bridge {
	config: BridgeConfig,
	ctx: EngineContext,
	registry: Arc<EngineRegistry>,
	deletions: DeletionCoordinator,
	runtime: WorkerRuntime,
}

impl std::fmt::Debug for Bridge {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Bridge")
			.field("searcher", &self.config.rpc.address)
			.field("shards", &self.registry.shards())
			.finish_non_exhaustive()
	}
}

impl Bridge {
	/// Builds a bridge talking to the configured searcher over TCP.
	pub fn new(config: BridgeConfig, target: Arc<SharedTargetState>, runtime: WorkerRuntime) -> Self {
		let client = Arc::new(TcpSearcherClient::new(config.rpc.address.clone(), config.rpc.request_timeout()));
		Self::with_client(config, client, target, runtime)
	}

	pub fn with_client(config: BridgeConfig, client: Arc<dyn SearcherClient>, target: Arc<SharedTargetState>, runtime: WorkerRuntime) -> Self {
		let layout = RuntimeLayout::new(config.paths.runtime_root.clone());
		let poller = TargetStatePoller::new(target, config.target.poll_settings());
		let deletions = DeletionCoordinator::new(poller.clone(), Arc::new(FsReclaimer), layout.clone(), config.deletion.settings(), runtime.clone());
		let ctx = EngineContext {
			layout,
			client,
			gateway: RpcGateway::new(config.rpc.backoff()),
			poller,
		};
		Self {
			config,
			ctx,
			registry: Arc::new(EngineRegistry::new()),
			deletions,
			runtime,
		}
	}

	pub fn registry(&self) -> &Arc<EngineRegistry> {
		&self.registry
	}

	pub fn deletions(&self) -> &DeletionCoordinator {
		&self.deletions
	}

	/// Commit metadata file of `shard`: `<commit_dir>/<table>_<index>.json`.
	pub fn commit_path(&self, shard: &ShardId) -> PathBuf {
		self.config.paths.commit_dir.join(format!("{}_{}.json", shard.table, shard.index))
	}

	/// Opens, registers and starts refreshing one shard engine.
	pub async fn open_shard(&self, shard: ShardId, shard_count: u32, local_checkpoint: CheckpointSupplier) -> Result<Arc<ShardEngine>> {
		if self.registry.get(&shard).is_some() {
			return Err(Error::DuplicateShard(shard));
		}
		let store = Arc::new(FileCommitStore::new(self.commit_path(&shard)));
		let config = ShardEngineConfig {
			max_samples: self.config.checkpoint.max_samples,
			max_age: self.config.checkpoint.max_age(),
			..ShardEngineConfig::new(shard, shard_count)
		};
		let cancel = self.runtime.child_token().cancellation().clone();
		let engine = ShardEngine::open(self.ctx.clone(), config, store, local_checkpoint, cancel).await?;
		if let Err(err) = self.registry.register(engine.clone()) {
			engine.close();
			return Err(err);
		}
		engine.spawn_refresh_loop(&self.runtime, self.config.refresh.interval());
		Ok(engine)
	}

	/// Flushes and closes one shard engine. Closing an unknown shard is a no-op.
	pub fn close_shard(&self, shard: &ShardId) -> bool {
		let Some(engine) = self.registry.remove(shard) else {
			return false;
		};
		if let Err(err) = engine.flush(false) {
			tracing::warn!(%shard, error = %err, "bridge.final_flush_failed");
		}
		true
	}

	/// Closes every engine of `table`, then reclaims its runtime data once the
	/// searcher has dropped it. `None` when a reclamation is already running.
	pub fn delete_table(&self, table: &str) -> Option<JoinHandle<DeletionOutcome>> {
		for shard in self.registry.shards().into_iter().filter(|s| s.table == table) {
			self.close_shard(&shard);
		}
		self.deletions.request_table(table)
	}

	/// Closes one shard engine, then reclaims its partition.
	pub fn delete_shard(&self, shard: &ShardId, shard_count: u32) -> Result<Option<JoinHandle<DeletionOutcome>>> {
		let range = partition_range(shard_count, shard.index)?;
		self.close_shard(shard);
		Ok(self.deletions.request_shard(shard.table.clone(), range))
	}

	/// Fails every engine when the searcher cannot be brought back.
	pub fn watch_health(&self, events: broadcast::Receiver<HealthEvent>) -> JoinHandle<()> {
		self.registry.spawn_health_listener(&self.runtime, events)
	}

	/// Flushes and closes every engine, then stops background work.
	pub async fn shutdown(&self) {
		for shard in self.registry.shards() {
			self.close_shard(&shard);
		}
		let stuck = self.runtime.shutdown().await;
		tracing::info!(stuck, "bridge.shutdown");
	}
}

/// Reads a local checkpoint kept by the document store as a decimal integer
/// in `path`. A missing or unreadable file yields `-1`, which never commits.
pub fn file_checkpoint(path: impl Into<PathBuf>) -> CheckpointSupplier {
	let path = path.into();
	Arc::new(move || match std::fs::read_to_string(&path) {
		Ok(raw) => raw.trim().parse().unwrap_or_else(|err| {
			tracing::warn!(path = %path.display(), error = %err, "bridge.checkpoint_unparsable");
			-1
		}),
		Err(err) => {
			tracing::debug!(path = %path.display(), error = %err, "bridge.checkpoint_unreadable");
			-1
		}
	})
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use pretty_assertions::assert_eq;
	use serde_json::json;
	use tether_rpc::{QueryRequest, QueryResponse, WriteRequest, WriteResponse};

	use super::*;
	use crate::commit::CommitStore;
	use crate::target::TargetState;

	struct AcceptAll;

	#[async_trait::async_trait]
	impl SearcherClient for AcceptAll {
		async fn write(&self, _request: &WriteRequest) -> WriteResponse {
			WriteResponse::default()
		}

		async fn query_table(&self, _request: &QueryRequest) -> QueryResponse {
			QueryResponse::default()
		}
	}

	struct Node {
		bridge: Bridge,
		target: Arc<SharedTargetState>,
		dir: tempfile::TempDir,
	}

	fn node() -> Node {
		let dir = tempfile::tempdir().unwrap();
		let mut config = BridgeConfig::default();
		config.paths.runtime_root = dir.path().join("runtime");
		config.paths.commit_dir = dir.path().join("commit");
		config.target.poll_interval_ms = 10;
		config.target.timeout_ms = 2_000;
		config.refresh.interval_ms = 10;
		config.deletion.retry_interval_ms = 10;
		let target = Arc::new(SharedTargetState::new());
		let bridge = Bridge::with_client(config, Arc::new(AcceptAll), target.clone(), WorkerRuntime::new());
		Node { bridge, target, dir }
	}

	fn serving(table: &str) -> TargetState {
		TargetState::from_document(json!({ table: { "0": { "partitions": { "0_32767": {}, "32768_65535": {} } } } })).unwrap()
	}

	#[tokio::test]
	async fn opened_shards_are_registered_once() {
		let n = node();
		n.target.publish(serving("orders"));
		let shard = ShardId::new("orders", 1);

		let engine = n.bridge.open_shard(shard.clone(), 2, Arc::new(|| -1)).await.unwrap();
		assert_eq!(engine.range().lo, 32768);
		assert_eq!(n.bridge.registry().shards(), vec![shard.clone()]);

		let err = n.bridge.open_shard(shard.clone(), 2, Arc::new(|| -1)).await.unwrap_err();
		assert!(matches!(err, Error::DuplicateShard(_)));
		assert!(n.bridge.commit_path(&shard).ends_with("commit/orders_1.json"));

		n.bridge.shutdown().await;
		assert!(engine.is_closed());
		assert!(n.bridge.registry().is_empty());
	}

	#[tokio::test]
	async fn refresh_loop_commits_from_checkpoint_file() {
		let n = node();
		n.target.publish(serving("orders"));
		let shard = ShardId::new("orders", 0);
		let checkpoint = n.dir.path().join("orders_0.checkpoint");
		std::fs::write(&checkpoint, "7\n").unwrap();

		let engine = n.bridge.open_shard(shard.clone(), 2, file_checkpoint(&checkpoint)).await.unwrap();
		tokio::time::sleep(Duration::from_millis(50)).await;
		let part = n.dir.path().join("runtime/orders/generation_0/partition_0_32767");
		std::fs::create_dir_all(&part).unwrap();
		let persisted_us = (chrono::Utc::now().timestamp_millis() + 1_000) * 1_000;
		std::fs::write(part.join("version.4"), json!({ "timestamp": persisted_us }).to_string()).unwrap();

		tokio::time::timeout(Duration::from_secs(5), async {
			while engine.commit_local_checkpoint() != 7 {
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.unwrap();

		assert!(n.bridge.close_shard(&shard));
		assert!(!n.bridge.close_shard(&shard));
		let stored = FileCommitStore::new(n.bridge.commit_path(&shard)).load().unwrap();
		assert_eq!(stored.local_checkpoint, 7);
		n.bridge.shutdown().await;
	}

	#[tokio::test]
	async fn deleting_a_table_closes_its_engines_first() {
		let n = node();
		n.target.publish(serving("orders"));
		let engine = n.bridge.open_shard(ShardId::new("orders", 0), 2, Arc::new(|| -1)).await.unwrap();
		let table_dir = n.dir.path().join("runtime/orders");
		std::fs::create_dir_all(&table_dir).unwrap();

		let reclaim = n.bridge.delete_table("orders").unwrap();
		assert!(engine.is_closed());
		n.target.publish(TargetState::default());

		assert!(matches!(reclaim.await.unwrap(), DeletionOutcome::Removed { .. }));
		assert!(!table_dir.exists());
		n.bridge.shutdown().await;
	}

	#[tokio::test]
	async fn deleting_a_shard_outside_the_layout_fails() {
		let n = node();
		let err = n.bridge.delete_shard(&ShardId::new("orders", 3), 2).unwrap_err();
		assert!(matches!(err, Error::InvalidShard { index: 3, count: 2 }));
	}

	#[test]
	fn checkpoint_file_falls_back_to_unknown() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("cp");
		let supplier = file_checkpoint(&path);
		assert_eq!(supplier(), -1);

		std::fs::write(&path, "not a number").unwrap();
		assert_eq!(supplier(), -1);

		std::fs::write(&path, " 42\n").unwrap();
		assert_eq!(supplier(), 42);
	}
}
