//! Open shard engines of this node.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tether_process::HealthEvent;
use tether_worker::{TaskClass, WorkerRuntime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::range::ShardId;
use crate::shard::ShardEngine;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct EngineRegistry {
	engines: RwLock<HashMap<ShardId, Arc<ShardEngine>>>,
}

impl EngineRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, engine: Arc<ShardEngine>) -> Result<()> {
		let shard = engine.shard().clone();
		let mut engines = self.engines.write();
		if engines.contains_key(&shard) {
			return Err(Error::DuplicateShard(shard));
		}
		tracing::debug!(%shard, "registry.register");
		engines.insert(shard, engine);
		Ok(())
	}

	/// Removes and closes the engine for `shard`. Removing an unknown shard is
	/// a no-op.
	pub fn remove(&self, shard: &ShardId) -> Option<Arc<ShardEngine>> {
		let engine = self.engines.write().remove(shard)?;
		engine.close();
		tracing::debug!(%shard, "registry.remove");
		Some(engine)
	}

	pub fn get(&self, shard: &ShardId) -> Option<Arc<ShardEngine>> {
		self.engines.read().get(shard).cloned()
	}

	pub fn len(&self) -> usize {
		self.engines.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.engines.read().is_empty()
	}

	pub fn shards(&self) -> Vec<ShardId> {
		let mut shards: Vec<_> = self.engines.read().keys().cloned().collect();
		shards.sort();
		shards
	}

	/// Fails every registered engine with `reason`.
	pub fn fail_all(&self, reason: &str) -> usize {
		let engines: Vec<_> = self.engines.read().values().cloned().collect();
		for engine in &engines {
			engine.fail(reason);
		}
		engines.len()
	}

	/// Closes and drops every engine.
	pub fn close_all(&self) {
		let engines: Vec<_> = self.engines.write().drain().map(|(_, e)| e).collect();
		for engine in engines {
			engine.close();
		}
	}

	/// Reacts to searcher health events: a failed restart fails every engine.
	pub fn spawn_health_listener(
		self: &Arc<Self>,
		runtime: &WorkerRuntime,
		mut events: broadcast::Receiver<HealthEvent>,
	) -> JoinHandle<()> {
		let registry = self.clone();
		runtime.spawn_tracked(TaskClass::Background, "engine-health-listener", move |token| async move {
			loop {
				let event = tokio::select! {
					_ = token.cancelled() => break,
					event = events.recv() => event,
				};
				match event {
					Ok(HealthEvent::RestartFailed { role, error }) => {
						let failed = registry.fail_all(&format!("searcher role {role} could not be restarted: {error}"));
						tracing::error!(role, error, failed, "registry.searcher_lost");
					}
					Ok(HealthEvent::Dead { role }) => {
						tracing::warn!(role, "registry.searcher_down");
					}
					Ok(HealthEvent::Ambiguous { role, matches }) => {
						tracing::error!(role, matches, "registry.searcher_ambiguous");
					}
					Ok(HealthEvent::Restarted { role }) => {
						tracing::info!(role, "registry.searcher_restarted");
					}
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						tracing::warn!(skipped, "registry.health_events_lagged");
					}
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use serde_json::json;
	use tether_rpc::{BackoffPolicy, QueryRequest, QueryResponse, RpcGateway, SearcherClient, WriteRequest, WriteResponse};
	use tokio_util::sync::CancellationToken;

	use super::*;
	use crate::commit::MemoryCommitStore;
	use crate::layout::RuntimeLayout;
	use crate::poller::{PollSettings, TargetStatePoller};
	use crate::shard::{EngineContext, ShardEngineConfig};
	use crate::target::{SharedTargetState, TargetState};

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

	async fn open(index: u32) -> Arc<ShardEngine> {
		let shared = Arc::new(SharedTargetState::new());
		shared.publish(
			TargetState::from_document(json!({
				"orders": { "0": { "partitions": { "0_32767": {}, "32768_65535": {} } } }
			}))
			.unwrap(),
		);
		let ctx = EngineContext {
			layout: RuntimeLayout::new("/nonexistent"),
			client: Arc::new(AcceptAll),
			gateway: RpcGateway::new(BackoffPolicy::default()),
			poller: TargetStatePoller::new(shared, PollSettings::default()),
		};
		ShardEngine::open(
			ctx,
			ShardEngineConfig::new(ShardId::new("orders", index), 2),
			Arc::new(MemoryCommitStore::new()),
			Arc::new(|| -1),
			CancellationToken::new(),
		)
		.await
		.unwrap()
	}

	#[tokio::test]
	async fn duplicate_registration_is_rejected() {
		let registry = EngineRegistry::new();
		registry.register(open(0).await).unwrap();

		let err = registry.register(open(0).await).unwrap_err();

		assert!(matches!(err, Error::DuplicateShard(_)));
		assert_eq!(registry.len(), 1);
	}

	#[tokio::test]
	async fn removal_closes_and_tolerates_repeats() {
		let registry = EngineRegistry::new();
		let engine = open(1).await;
		registry.register(engine.clone()).unwrap();
		let shard = ShardId::new("orders", 1);

		assert!(registry.remove(&shard).is_some());
		assert!(registry.remove(&shard).is_none());
		assert!(engine.is_closed());
		assert!(registry.is_empty());
	}

	#[tokio::test]
	async fn failed_restart_fails_every_engine() {
		let registry = Arc::new(EngineRegistry::new());
		registry.register(open(0).await).unwrap();
		registry.register(open(1).await).unwrap();
		let runtime = WorkerRuntime::new();
		let (tx, rx) = broadcast::channel(8);
		let listener = registry.spawn_health_listener(&runtime, rx);

		tx.send(HealthEvent::Dead {
			role: "searcher".to_string(),
		})
		.unwrap();
		tx.send(HealthEvent::RestartFailed {
			role: "searcher".to_string(),
			error: "spawn failed".to_string(),
		})
		.unwrap();

		for shard in registry.shards() {
			let engine = registry.get(&shard).unwrap();
			while engine.failure().is_none() {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
			assert!(matches!(engine.index(&[("_id", "1")]).await, Err(Error::EngineFailed { .. })));
		}

		drop(tx);
		listener.await.unwrap();
		runtime.shutdown().await;
	}
}
