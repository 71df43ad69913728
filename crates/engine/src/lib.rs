//! Consistency bridge between a write-ahead-logged document store and an
//! externally managed search engine.
//!
//! # Purpose
//!
//! - Keep the store's durability bookkeeping in step with the engine's on-disk progress.
//! - Route per-shard writes and lookups through the retrying [`tether_rpc::RpcGateway`].
//! - Reclaim runtime storage only after the engine's published target state has released it.
//! - Exclude document field encoding, schema generation and query planning.
//!
//! # Mental model
//!
//! - The engine persists on its own schedule. The bridge learns about it by reading the
//!   newest `version.<N>` marker in the shard's runtime partition directory.
//! - A marker carries the engine's persist time. [`CheckpointCalc`] maps that time back to the
//!   local checkpoint that was durable then, which becomes the new [`CommitInfo`].
//! - The target state is a whole-document snapshot pushed by an external channel. The bridge
//!   only reads it and asks for resyncs; conditions over it are awaited with [`TargetStatePoller`].
//! - Reclamation is a per-key background saga behind an advisory lock.
//!
//! # Key types
//!
//! | Type | Meaning | Constraints | Constructed / mutated in |
//! |---|---|---|---|
//! | [`CheckpointCalc`] | Time to checkpoint history | MUST reject samples older than the newest | `CheckpointCalc::add_checkpoint` |
//! | [`CommitInfo`] | Last mutually confirmed durability point | MUST have non-decreasing checkpoint | `CommitTracker::observe` |
//! | [`CommitTracker`] | Per-shard commit/flush decisions | MUST be ticked under the shard's mutex | `ShardEngine::maybe_refresh` |
//! | [`TargetState`] | Engine-published table/generation/partition snapshot | MUST have distinct integer generation ids | `TargetState::from_document` |
//! | [`DeletionLocks`] | At most one reclamation per key | MUST release exactly once per workflow | `DeletionLocks::try_acquire` |
//! | [`ShardEngine`] | One shard's bridge to the engine | MUST refuse writes once failed | `ShardEngine::open` |
//! | [`EngineRegistry`] | Open engines keyed by shard | MUST tolerate repeated removal | `EngineRegistry::register`, `EngineRegistry::remove` |
//! | [`Bridge`] | Node assembly from [`BridgeConfig`] | MUST close a shard before reclaiming it | `Bridge::open_shard`, `Bridge::delete_table` |
//!
//! # Invariants
//!
//! 1. UNKNOWN checkpoints MUST never be committed.
//!    - Enforced in: `CommitTracker::observe`, `CommitTracker::persist_commit_data`
//!    - Tested by: `commit::tests::unknown_checkpoint_is_not_committed`
//!    - Failure symptom: the store truncates its write-ahead log past data the engine never persisted.
//!
//! 2. A deletion key MUST NOT be reclaimed by two workflows at once.
//!    - Enforced in: `DeletionCoordinator::request`
//!    - Tested by: `deletion::tests::duplicate_request_is_rejected_without_polling`
//!    - Failure symptom: a second workflow deletes a directory recreated by a new table.
//!
//! 3. Runtime data MUST only be removed once the target state shows the key absent.
//!    - Enforced in: `DeletionCoordinator::run_saga`
//!    - Tested by: `deletion::tests::waits_for_absence_before_removing`
//!    - Failure symptom: the engine crashes reading files deleted underneath it.
//!
//! 4. A fatal RPC error MUST mark the shard failed and block further writes.
//!    - Enforced in: `ShardEngine::write`
//!    - Tested by: `shard::tests::fatal_write_fails_engine`
//!    - Failure symptom: writes are acknowledged locally but silently missing from the engine.

pub mod bridge;
pub mod checkpoint;
pub mod commit;
pub mod config;
pub mod deletion;
mod error;
pub mod layout;
pub mod payload;
pub mod poller;
pub mod range;
pub mod registry;
pub mod shard;
pub mod target;

pub use bridge::{Bridge, file_checkpoint};
pub use checkpoint::{CheckpointCalc, CheckpointSample};
pub use commit::{CommitInfo, CommitMetadata, CommitStore, CommitTracker, FileCommitStore, MemoryCommitStore};
pub use config::{BridgeConfig, ConfigError, ShardConfig};
pub use deletion::{DeletionCoordinator, DeletionKey, DeletionLocks, DeletionOutcome, DeletionSettings, FsReclaimer, Reclaimer};
pub use error::{Error, Result};
pub use layout::{RuntimeLayout, VersionMarker};
pub use payload::Operation;
pub use poller::{PollSettings, TargetStatePoller};
pub use range::{ShardId, partition_range};
pub use registry::EngineRegistry;
pub use shard::{CheckpointSupplier, DocsStats, EngineContext, GetResult, ShardEngine, ShardEngineConfig};
pub use target::{SharedTargetState, TargetCondition, TargetState, TargetStateSource};
