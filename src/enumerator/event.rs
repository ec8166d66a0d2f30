//! Events exchanged between the enumerator and reader subtasks.

use indexmap::IndexMap;
use tokio::sync::oneshot;

use crate::error::SourceError;
use crate::proxy::ListShardsResult;
use crate::shard::Shard;
use crate::split::ShardSplit;

use super::state::EnumeratorState;

/// Identity of a registered reader subtask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderInfo {
    pub subtask_id: u32,
    /// Host location, used by locality-aware assigners.
    pub location: String,
}

/// One finished split reported by a reader, with the child shards observed
/// at the shard end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedSplitContext {
    pub split_id: String,
    pub child_splits: Vec<Shard>,
}

/// Sent by a reader once it has drained assigned splits to the shard end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitsFinishedEvent {
    pub finished_splits: Vec<FinishedSplitContext>,
}

/// Events a reader subtask can send to the enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    SplitsFinished(SplitsFinishedEvent),
}

/// A batch of split assignments pushed down to reader subtasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitsAssignment {
    pub assignment: IndexMap<u32, Vec<ShardSplit>>,
}

/// Messages drained by the enumerator's event loop.
///
/// All state mutation happens while handling these, on the coordinator's
/// single logical thread of control; discovery I/O completes on a worker
/// task and re-enters the loop as [`CoordinatorEvent::DiscoveryCompleted`].
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// A reader subtask registered with the coordinator.
    ReaderRegistered { subtask_id: u32, location: String },
    /// An event sent by a reader subtask.
    FromReader { subtask_id: u32, event: SourceEvent },
    /// A discovery round completed on the I/O pool.
    DiscoveryCompleted(Result<ListShardsResult, SourceError>),
    /// Checkpoint barrier: reply with a point-in-time state snapshot.
    Snapshot {
        checkpoint_id: u64,
        reply: oneshot::Sender<EnumeratorState>,
    },
}
