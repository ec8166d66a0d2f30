//! Meltwater: coordinator-side shard enumeration for streaming change logs.
//!
//! This crate handles:
//! - Discovering the evolving shard tree of a DynamoDB Streams change log or
//!   Kinesis data stream
//! - Reconciling inconsistent `list_shards` snapshots into a complete lineage
//! - Assigning shards to reader subtasks with parent-before-child ordering
//! - Checkpointing assignment state so a job restarts without losing or
//!   duplicating shard work
//!
//! The record-polling reader side, the RPC client behind [`StreamProxy`],
//! and cluster integration live outside this crate.

pub mod config;
pub mod enumerator;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod shard;
pub mod split;
pub mod tracing;

// Re-export commonly used items
pub use crate::config::{InitialPosition, SourceConfig};
pub use crate::enumerator::{
    CoordinatorEvent, EnumeratorContext, EnumeratorState, ReaderInfo, ShardAssigner,
    ShardAssignerContext, ShardGraphTracker, SourceEvent, SplitTracker, SplitsAssignment,
    SplitsFinishedEvent, StreamSourceEnumerator, UniformShardAssigner,
};
pub use crate::error::SourceError;
pub use crate::proxy::{ListShardsResult, StreamProxy};
pub use crate::shard::{SequenceNumberRange, Shard, StreamStatus};
pub use crate::split::{ShardSplit, SplitAssignmentStatus, SplitWithStatus, StartingPosition};
pub use crate::tracing::init_tracing;
