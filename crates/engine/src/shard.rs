//! One shard's bridge to the external engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tether_rpc::{CallOutcome, ErrorCode, PartitionRange, QueryRequest, RpcGateway, RpcResponse, SearcherClient, WriteRequest};
use tether_worker::{TaskClass, WorkerRuntime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointCalc;
use crate::commit::{CommitInfo, CommitStore, CommitTracker};
use crate::layout::RuntimeLayout;
use crate::payload::{self, Operation};
use crate::poller::TargetStatePoller;
use crate::range::{ShardId, partition_id, partition_range};
use crate::target::TargetCondition;
use crate::{Error, Result};

/// Reads the store's current durable local checkpoint.
pub type CheckpointSupplier = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Node-wide collaborators shared by every shard engine.
#[derive(Clone)]
pub struct EngineContext {
	pub layout: RuntimeLayout,
	pub client: Arc<dyn SearcherClient>,
	pub gateway: RpcGateway,
	pub poller: TargetStatePoller,
}

#[derive(Debug, Clone)]
pub struct ShardEngineConfig {
	pub shard: ShardId,
	/// Number of shards of the table, used to derive the partition range.
	pub shard_count: u32,
	pub max_samples: usize,
	pub max_age: Duration,
	/// Minimum age of cached docs stats before they are recomputed.
	pub stats_refresh: Duration,
}

impl ShardEngineConfig {
	pub fn new(shard: ShardId, shard_count: u32) -> Self {
		Self {
			shard,
			shard_count,
			max_samples: crate::checkpoint::DEFAULT_MAX_SAMPLES,
			max_age: crate::checkpoint::DEFAULT_MAX_AGE,
			stats_refresh: Duration::from_secs(1),
		}
	}
}

/// Document read back from the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetResult {
	pub seq_no: i64,
	pub primary_term: i64,
	pub version: i64,
	pub source: Option<String>,
	pub routing: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocsStats {
	pub indexed: u64,
	pub deleted: u64,
	/// Disk usage of the table's runtime data; `None` when it could not be measured.
	pub size_bytes: Option<u64>,
	pub commit_timestamp: i64,
}

#[derive(Debug)]
struct StatsCache {
	stats: DocsStats,
	computed: Instant,
}

pub struct ShardEngine {
	shard: ShardId,
	range: PartitionRange,
	ctx: EngineContext,
	tracker: Mutex<CommitTracker>,
	/// Held for a whole refresh tick.
	tick: tokio::sync::Mutex<()>,
	commit: Arc<ArcSwap<CommitInfo>>,
	local_checkpoint: CheckpointSupplier,
	failure: Mutex<Option<String>>,
	closed: AtomicBool,
	indexed: AtomicU64,
	deleted: AtomicU64,
	stats: Mutex<Option<StatsCache>>,
	stats_refresh: Duration,
	cancel: CancellationToken,
}

impl std::fmt::Debug for ShardEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ShardEngine")
			.field("shard", &self.shard)
			.field("range", &self.range)
			.field("commit", &**self.commit.load())
			.field("failed", &self.failure.lock().is_some())
			.field("closed", &self.closed.load(Ordering::Acquire))
			.finish_non_exhaustive()
	}
}

impl ShardEngine {
	/// Opens a shard engine.
	///
	/// Seeds commit bookkeeping from `store`, then waits until the target
	/// state shows the engine serving this shard's partition. A timeout here
	/// fails the open.
	pub async fn open(
		ctx: EngineContext,
		config: ShardEngineConfig,
		store: Arc<dyn CommitStore>,
		local_checkpoint: CheckpointSupplier,
		cancel: CancellationToken,
	) -> Result<Arc<Self>> {
		let range = partition_range(config.shard_count, config.shard.index)?;
		let tracker = CommitTracker::open(store, CheckpointCalc::new(config.max_samples, config.max_age))?;
		let info = tracker.commit_info();
		tracing::info!(
			shard = %config.shard,
			commit_timestamp = info.timestamp,
			commit_version = info.version,
			commit_checkpoint = info.checkpoint,
			"shard.open"
		);

		let ready = TargetCondition::Presence {
			table: config.shard.table.clone(),
			partition: partition_id(range),
		};
		if let Err(err) = ctx.poller.wait_until(&ready, &cancel).await {
			tracing::error!(shard = %config.shard, error = %err, "shard.activate_failed");
			return Err(err);
		}

		Ok(Arc::new(Self {
			shard: config.shard,
			range,
			commit: tracker.published(),
			tracker: Mutex::new(tracker),
			tick: tokio::sync::Mutex::new(()),
			ctx,
			local_checkpoint,
			failure: Mutex::new(None),
			closed: AtomicBool::new(false),
			indexed: AtomicU64::new(0),
			deleted: AtomicU64::new(0),
			stats: Mutex::new(None),
			stats_refresh: config.stats_refresh,
			cancel,
		}))
	}

	pub fn shard(&self) -> &ShardId {
		&self.shard
	}

	pub fn range(&self) -> PartitionRange {
		self.range
	}

	fn ensure_open(&self) -> Result<()> {
		if self.closed.load(Ordering::Acquire) {
			return Err(Error::Closed(self.shard.clone()));
		}
		if let Some(reason) = self.failure.lock().clone() {
			return Err(Error::EngineFailed {
				shard: self.shard.clone(),
				reason,
			});
		}
		Ok(())
	}

	/// Indexes one document given as flat `field=value` pairs.
	pub async fn index(&self, fields: &[(&str, &str)]) -> Result<()> {
		self.write(Operation::Index, fields).await?;
		self.indexed.fetch_add(1, Ordering::Relaxed);
		Ok(())
	}

	/// Deletes one document by id.
	pub async fn delete(&self, doc_id: &str) -> Result<()> {
		self.write(Operation::Delete, &[("_id", doc_id)]).await?;
		self.deleted.fetch_add(1, Ordering::Relaxed);
		Ok(())
	}

	async fn write(&self, op: Operation, fields: &[(&str, &str)]) -> Result<()> {
		self.ensure_open()?;
		let request = WriteRequest {
			table: self.shard.table.clone(),
			hash_id: self.range.lo,
			payload: payload::encode(op, fields.iter().copied()),
		};
		let client = &self.ctx.client;
		let result = self.ctx.gateway.call("write", &self.cancel, || client.write(&request)).await;
		match result.into_result("write") {
			Ok(_) => Ok(()),
			Err(err) if err.is_interrupted() => Err(err.into()),
			Err(err) => {
				self.fail(&err.to_string());
				Err(err.into())
			}
		}
	}

	/// Looks a document up by id. A `NO_RECORD` answer or an empty result is `None`.
	pub async fn get(&self, doc_id: &str) -> Result<Option<GetResult>> {
		self.ensure_open()?;
		let request = QueryRequest {
			table: self.shard.table.clone(),
			partition_range: self.range,
			doc_id: doc_id.to_string(),
		};
		let client = &self.ctx.client;
		let result = self.ctx.gateway.call("query_table", &self.cancel, || client.query_table(&request)).await;
		if result.outcome == CallOutcome::Fatal && result.response.error_code() == Some(ErrorCode::NoRecord) {
			return Ok(None);
		}
		let response = result.into_result("query_table")?;
		let Some(doc) = response.values.into_iter().next() else {
			return Ok(None);
		};
		let attr = |name: &str| doc.attrs.get(name).copied().unwrap_or(0);
		Ok(Some(GetResult {
			seq_no: attr("_seq_no"),
			primary_term: attr("_primary_term"),
			version: attr("_version"),
			source: doc.summary.get("_source").cloned(),
			routing: doc.summary.get("_routing").filter(|r| !r.is_empty()).cloned(),
		}))
	}

	/// One refresh tick. Returns `true` when the commit info advanced.
	///
	/// Ticks of one shard never overlap, so samples reach the checkpoint
	/// history in the order they were taken.
	pub async fn maybe_refresh(&self) -> Result<bool> {
		if self.ensure_open().is_err() {
			return Ok(false);
		}
		let _tick = self.tick.lock().await;
		let supplier = self.local_checkpoint.clone();
		let layout = self.ctx.layout.clone();
		let table = self.shard.table.clone();
		let range = self.range;
		// The checkpoint is read before the clock so a sample never claims more
		// than was durable at its timestamp.
		let (checkpoint, now_ms, marker) = tether_worker::spawn_blocking(TaskClass::IoBlocking, move || {
			let checkpoint = supplier();
			let now_ms = chrono::Utc::now().timestamp_millis();
			(checkpoint, now_ms, layout.read_marker(&table, range))
		})
		.await
		.map_err(|err| Error::io(self.ctx.layout.partition_dir(&self.shard.table, self.range), std::io::Error::other(err)))?;
		let marker = marker?;

		let changed = self.tracker.lock().refresh(now_ms, checkpoint, marker);
		tracing::trace!(shard = %self.shard, now_ms, checkpoint, ?marker, changed, "shard.refresh");
		Ok(changed)
	}

	/// `true` when a commit newer than the stored one is waiting to be flushed.
	pub fn should_periodically_flush(&self) -> bool {
		self.tracker.lock().needs_flush()
	}

	/// Persists the current commit info when it is newer than the stored one,
	/// or unconditionally with `force`. Returns whether anything was written.
	pub fn flush(&self, force: bool) -> Result<bool> {
		let mut tracker = self.tracker.lock();
		if !force && !tracker.needs_flush() {
			return Ok(false);
		}
		tracing::info!(shard = %self.shard, force, "shard.flush");
		tracker.persist_commit_data()
	}

	/// Local checkpoint confirmed durable on the engine side. May be ahead of
	/// the last flushed commit.
	pub fn commit_local_checkpoint(&self) -> i64 {
		self.commit.load().checkpoint
	}

	pub fn commit_info(&self) -> CommitInfo {
		**self.commit.load()
	}

	/// Marks the engine failed; later writes are refused. The first reason sticks.
	pub fn fail(&self, reason: &str) {
		let mut failure = self.failure.lock();
		if failure.is_none() {
			tracing::error!(shard = %self.shard, reason, "shard.failed");
			*failure = Some(reason.to_string());
		}
	}

	pub fn failure(&self) -> Option<String> {
		self.failure.lock().clone()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	/// Document counters and disk usage, recomputed at most every
	/// `stats_refresh` and only when counters or the commit changed.
	pub async fn docs_stats(&self) -> DocsStats {
		let indexed = self.indexed.load(Ordering::Relaxed);
		let deleted = self.deleted.load(Ordering::Relaxed);
		let commit_timestamp = self.commit.load().timestamp;

		if let Some(cached) = self.stats.lock().as_ref() {
			let fresh = cached.computed.elapsed() < self.stats_refresh;
			let unchanged = cached.stats.indexed == indexed
				&& cached.stats.deleted == deleted
				&& cached.stats.commit_timestamp == commit_timestamp
				&& cached.stats.size_bytes.is_some();
			if fresh || unchanged {
				return cached.stats;
			}
		}

		let size_bytes = tether_process::disk_usage(&self.ctx.layout.table_dir(&self.shard.table)).await;
		let stats = DocsStats {
			indexed,
			deleted,
			size_bytes,
			commit_timestamp,
		};
		*self.stats.lock() = Some(StatsCache {
			stats,
			computed: Instant::now(),
		});
		stats
	}

	/// Stops the refresh loop and refuses further operations. Idempotent.
	pub fn close(&self) {
		if !self.closed.swap(true, Ordering::AcqRel) {
			tracing::info!(shard = %self.shard, "shard.close");
			self.cancel.cancel();
		}
	}

	/// Spawns the periodic refresh-then-flush loop.
	pub fn spawn_refresh_loop(self: &Arc<Self>, runtime: &WorkerRuntime, interval: Duration) -> JoinHandle<()> {
		let engine = self.clone();
		runtime.spawn_tracked(TaskClass::Background, format!("refresh {}", self.shard), move |token| async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					_ = token.cancelled() => break,
					_ = engine.cancel.cancelled() => break,
					_ = ticker.tick() => {}
				}
				if let Err(err) = engine.maybe_refresh().await {
					tracing::warn!(shard = %engine.shard, error = %err, "shard.refresh_failed");
					continue;
				}
				if engine.should_periodically_flush()
					&& let Err(err) = engine.flush(false)
				{
					tracing::warn!(shard = %engine.shard, error = %err, "shard.flush_failed");
				}
			}
			tracing::debug!(shard = %engine.shard, "shard.refresh_loop.stopped");
		})
	}
}
