//! Coordinator-side orchestration of shard discovery and split assignment.
//!
//! The enumerator discovers the evolving shard tree through periodic
//! `list_shards` rounds, resolves listing inconsistencies, merges the result
//! into the [`SplitTracker`], and pushes eligible splits to reader subtasks
//! while preserving parent-before-child ordering. All state mutation happens
//! on a single event loop; discovery I/O runs on worker tasks and re-enters
//! the loop through the coordinator queue.

pub mod assigner;
pub mod event;
pub mod state;
pub mod tracker;

pub use assigner::{ShardAssigner, ShardAssignerContext, UniformShardAssigner};
pub use event::{
    CoordinatorEvent, FinishedSplitContext, ReaderInfo, SourceEvent, SplitsAssignment,
    SplitsFinishedEvent,
};
pub use state::EnumeratorState;
pub use tracker::{ShardGraphTracker, SplitTracker};

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use snafu::ResultExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SourceConfig;
use crate::error::{self, SourceError};
use crate::metrics::{
    FinishedSplitsEvicted, InconsistencyResolutionRounds, InternalEvent, ShardsDiscovered,
    SplitsAssigned, SplitsFinished, TrackedSplits,
};
use crate::proxy::{ListShardsResult, StreamProxy};
use crate::shard::{Shard, StreamStatus};
use crate::split::ShardSplit;

/// Coordinator-facing facilities for one enumerator: the registered readers
/// and the channel assignments are delivered on.
pub struct EnumeratorContext {
    registered_readers: BTreeMap<u32, ReaderInfo>,
    parallelism: usize,
    assignment_tx: mpsc::UnboundedSender<SplitsAssignment>,
}

impl EnumeratorContext {
    pub fn new(parallelism: usize, assignment_tx: mpsc::UnboundedSender<SplitsAssignment>) -> Self {
        Self {
            registered_readers: BTreeMap::new(),
            parallelism,
            assignment_tx,
        }
    }

    pub fn registered_readers(&self) -> &BTreeMap<u32, ReaderInfo> {
        &self.registered_readers
    }

    pub fn current_parallelism(&self) -> usize {
        self.parallelism
    }

    fn register_reader(&mut self, info: ReaderInfo) {
        self.registered_readers.insert(info.subtask_id, info);
    }

    fn assign_splits(&self, assignment: SplitsAssignment) -> Result<(), SourceError> {
        self.assignment_tx
            .send(assignment)
            .map_err(|_| error::AssignmentChannelClosedSnafu.build())
    }
}

/// Discovers splits of a change-log stream and assigns them to subtasks.
/// Runs on the job coordinator.
pub struct StreamSourceEnumerator<P: StreamProxy> {
    context: EnumeratorContext,
    stream_arn: String,
    config: SourceConfig,
    proxy: Arc<P>,
    assigner: Box<dyn ShardAssigner>,
    split_tracker: SplitTracker,
    start_timestamp: DateTime<Utc>,
    /// Committed assignment per subtask, mirror of what readers hold.
    split_assignment: BTreeMap<u32, IndexSet<ShardSplit>>,
    inbox_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    inbox_rx: Option<mpsc::UnboundedReceiver<CoordinatorEvent>>,
}

impl<P: StreamProxy> StreamSourceEnumerator<P> {
    /// Create an enumerator, optionally restoring from checkpointed state.
    ///
    /// With prior state the start timestamp is restored from it; otherwise
    /// the job start is now.
    pub fn new(
        context: EnumeratorContext,
        config: SourceConfig,
        proxy: Arc<P>,
        assigner: Box<dyn ShardAssigner>,
        prior_state: Option<EnumeratorState>,
    ) -> Self {
        let stream_arn = config.stream_arn.clone();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (start_timestamp, initial_splits) = match prior_state {
            Some(state) => (
                state.start_timestamp.unwrap_or_else(Utc::now),
                state.known_splits,
            ),
            None => (Utc::now(), Vec::new()),
        };
        let split_tracker = SplitTracker::from_state(
            initial_splits,
            stream_arn.clone(),
            config.initial_position,
            config.position_anchor(start_timestamp),
        );
        Self {
            context,
            stream_arn,
            config,
            proxy,
            assigner,
            split_tracker,
            start_timestamp,
            split_assignment: BTreeMap::new(),
            inbox_tx,
            inbox_rx: Some(inbox_rx),
        }
    }

    /// Handle for feeding [`CoordinatorEvent`]s into the event loop.
    pub fn handle(&self) -> mpsc::UnboundedSender<CoordinatorEvent> {
        self.inbox_tx.clone()
    }

    /// Kick off the initial discovery round. Periodic rounds are driven by
    /// [`run`](Self::run).
    pub fn start(&self) {
        info!(stream_arn = %self.stream_arn, "Starting shard discovery");
        self.spawn_discovery();
    }

    fn spawn_discovery(&self) {
        let proxy = Arc::clone(&self.proxy);
        let stream_arn = self.stream_arn.clone();
        let retry_count = self
            .config
            .describe_stream_inconsistency_resolution_retry_count;
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = Self::discover_splits(proxy, &stream_arn, retry_count).await;
            // the enumerator may have shut down while we were listing; a
            // result nobody drains is simply dropped
            let _ = inbox.send(CoordinatorEvent::DiscoveryCompleted(result));
        });
    }

    /// List shards and resolve listing inconsistencies by re-listing from
    /// closed-leaf anchors until the graph converges, the stream is
    /// disabled, or the retry budget runs out. Runs off the coordinator
    /// loop; mutates no shared state.
    pub async fn discover_splits(
        proxy: Arc<P>,
        stream_arn: &str,
        retry_count: u32,
    ) -> Result<ListShardsResult, SourceError> {
        let initial = proxy
            .list_shards(stream_arn, None)
            .await
            .context(error::ListShardsSnafu { stream_arn })?;
        let stream_status = initial.stream_status;
        let inconsistency_detected = initial.inconsistency_detected;

        let mut graph = ShardGraphTracker::new();
        graph.add_nodes(initial.shards);

        // a disabled stream grows no further children, so its closed leaves
        // are final rather than inconsistent
        let stream_disabled = stream_status == StreamStatus::Disabled;
        let mut rounds: u32 = 0;
        while rounds < retry_count && !stream_disabled && graph.inconsistency_detected() {
            let Some(anchor) = graph.earliest_closed_leaf().map(str::to_string) else {
                break;
            };
            warn!(
                stream_arn,
                anchor = %anchor,
                "Detected inconsistent shard listing, re-listing from anchor"
            );
            let resolution = proxy
                .list_shards(stream_arn, Some(&anchor))
                .await
                .context(error::ListShardsSnafu { stream_arn })?;
            graph.add_nodes(resolution.shards);
            rounds += 1;
        }
        if rounds > 0 {
            InconsistencyResolutionRounds {
                rounds: u64::from(rounds),
                stream: stream_arn.to_string(),
            }
            .emit();
        }

        if graph.inconsistency_detected() {
            // return a best-effort empty result instead of failing: the next
            // cycle retries and large streams may need several of them
            error!(
                stream_arn,
                anchor = ?graph.earliest_closed_leaf(),
                "Unresolved shard listing inconsistency, deferring to next discovery cycle"
            );
            return Ok(ListShardsResult {
                shards: Vec::new(),
                stream_status,
                inconsistency_detected: true,
            });
        }

        Ok(ListShardsResult {
            shards: graph.into_nodes(),
            stream_status,
            inconsistency_detected,
        })
    }

    /// Completion callback of a discovery round; runs on the coordinator
    /// loop.
    pub fn process_discovered_shards(
        &mut self,
        discovered: ListShardsResult,
    ) -> Result<(), SourceError> {
        if discovered.inconsistency_detected {
            info!(
                stream_arn = %self.stream_arn,
                "Skipping split processing for inconsistent discovery round"
            );
            return Ok(());
        }

        let discovered_ids: HashSet<String> = discovered
            .shards
            .iter()
            .map(|shard| shard.shard_id.clone())
            .collect();
        ShardsDiscovered {
            count: discovered.shards.len() as u64,
            stream: self.stream_arn.clone(),
        }
        .emit();

        self.split_tracker.add_splits(&discovered.shards);
        let evicted = self.split_tracker.clean_up_old_finished_splits(&discovered_ids);
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted old finished splits");
            FinishedSplitsEvicted {
                count: evicted.len() as u64,
                stream: self.stream_arn.clone(),
            }
            .emit();
        }
        TrackedSplits {
            count: self.split_tracker.tracked_count(),
            stream: self.stream_arn.clone(),
        }
        .emit();

        // assigning before every reader has registered could hand a split to
        // a subtask slot that a different parallel instance ends up hosting
        if self.context.registered_readers().len() < self.context.current_parallelism() {
            info!(
                required = self.context.current_parallelism(),
                registered = self.context.registered_readers().len(),
                "Not all readers registered yet, deferring split assignment"
            );
            return Ok(());
        }
        self.assign_all_available_splits()
    }

    fn assign_all_available_splits(&mut self) -> Result<(), SourceError> {
        let available = self.split_tracker.splits_available_for_assignment();
        self.assign_splits(available)
    }

    fn assign_child_splits(&mut self, finished_ids: &HashSet<String>) -> Result<(), SourceError> {
        let children = self
            .split_tracker
            .unassigned_child_splits(finished_ids.iter().map(String::as_str));
        if !children.is_empty() {
            info!(count = children.len(), "Assigning children of finished splits");
        }
        self.assign_splits(children)
    }

    fn assign_splits(&mut self, splits: Vec<ShardSplit>) -> Result<(), SourceError> {
        let mut batch: IndexMap<u32, Vec<ShardSplit>> = IndexMap::new();
        for split in splits {
            if self.split_tracker.is_assigned(split.split_id()) {
                warn!(
                    shard_id = split.shard_id(),
                    "Skipping assignment of already-assigned shard"
                );
                continue;
            }
            let assigner_context = ShardAssignerContext {
                split_assignment: &self.split_assignment,
                pending_split_assignments: &batch,
                registered_readers: self.context.registered_readers(),
            };
            let subtask_id = self
                .assigner
                .assign(&split, &assigner_context)
                .context(error::AssignmentSnafu)?;
            if !self.context.registered_readers().contains_key(&subtask_id) {
                return error::UnknownSubtaskSnafu { subtask_id }
                    .fail()
                    .context(error::AssignmentSnafu);
            }
            info!(
                shard_id = split.shard_id(),
                subtask_id, "Assigning shard to subtask"
            );
            batch.entry(subtask_id).or_default().push(split);
        }
        if batch.is_empty() {
            return Ok(());
        }

        // deliver first: a split is marked assigned only once the batch has
        // been handed off to the workers
        let assigned: Vec<ShardSplit> = batch.values().flatten().cloned().collect();
        self.context.assign_splits(SplitsAssignment {
            assignment: batch.clone(),
        })?;
        self.split_tracker.mark_as_assigned(&assigned);
        for (subtask_id, new_splits) in batch {
            self.split_assignment
                .entry(subtask_id)
                .or_default()
                .extend(new_splits);
        }
        SplitsAssigned {
            count: assigned.len() as u64,
            stream: self.stream_arn.clone(),
        }
        .emit();
        Ok(())
    }

    /// Register a reader subtask with the coordinator.
    pub fn add_reader(&mut self, subtask_id: u32, location: impl Into<String>) {
        self.split_assignment.entry(subtask_id).or_default();
        self.context.register_reader(ReaderInfo {
            subtask_id,
            location: location.into(),
        });
    }

    /// Handle an event from a reader subtask.
    pub fn handle_source_event(
        &mut self,
        subtask_id: u32,
        source_event: SourceEvent,
    ) -> Result<(), SourceError> {
        match source_event {
            SourceEvent::SplitsFinished(finished) => {
                self.handle_finished_splits(subtask_id, finished)
            }
        }
    }

    /// When a split finishes, only its children become newly assignable, so
    /// the indexed child lookup replaces a full availability scan.
    fn handle_finished_splits(
        &mut self,
        subtask_id: u32,
        finished: SplitsFinishedEvent,
    ) -> Result<(), SourceError> {
        let finished_ids: HashSet<String> = finished
            .finished_splits
            .iter()
            .map(|context| context.split_id.clone())
            .collect();
        self.split_tracker
            .mark_as_finished(finished_ids.iter().map(String::as_str));

        let children: Vec<Shard> = finished
            .finished_splits
            .iter()
            .flat_map(|context| context.child_splits.iter().cloned())
            .collect();
        if !children.is_empty() {
            info!(
                count = children.len(),
                "Tracking child shards of finished splits"
            );
        }
        self.split_tracker.add_child_splits(&children);
        SplitsFinished {
            count: finished_ids.len() as u64,
            stream: self.stream_arn.clone(),
        }
        .emit();

        let Some(assignment) = self.split_assignment.get_mut(&subtask_id) else {
            // after a restart the finished event can arrive before the reader
            // re-registers; the children are picked up by the next discovery
            // cycle instead
            warn!(
                subtask_id,
                ?finished_ids,
                "Received finished splits from a subtask with no assignment, deferring child assignment"
            );
            return Ok(());
        };
        assignment.retain(|split| !finished_ids.contains(split.split_id()));
        self.assign_child_splits(&finished_ids)
    }

    /// Splits cannot be returned to the enumerator: recovery restarts the
    /// whole job from the last checkpoint.
    pub fn add_splits_back(
        &mut self,
        _splits: Vec<ShardSplit>,
        _subtask_id: u32,
    ) -> Result<(), SourceError> {
        error::PartialRecoveryUnsupportedSnafu.fail()
    }

    /// Point-in-time snapshot for the given checkpoint.
    pub fn snapshot_state(&self, checkpoint_id: u64) -> EnumeratorState {
        EnumeratorState {
            known_splits: self.split_tracker.snapshot_state(checkpoint_id),
            start_timestamp: Some(self.start_timestamp),
        }
    }

    /// Close the stream proxy. Discovery results still in flight are
    /// discarded together with the inbox.
    pub async fn close(&mut self) -> Result<(), SourceError> {
        self.proxy.close().await.context(error::ProxyCloseSnafu)
    }

    /// Drive the enumerator: immediate discovery, then periodic rounds, with
    /// reader events, discovery completions, and checkpoint requests all
    /// serialized on this single loop.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SourceError> {
        let Some(mut inbox) = self.inbox_rx.take() else {
            return Ok(());
        };
        self.start();

        let interval = Duration::from_secs(self.config.shard_discovery_interval_secs);
        let mut discovery_timer =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(stream_arn = %self.stream_arn, "Shutdown requested, closing enumerator");
                    return self.close().await;
                }

                _ = discovery_timer.tick() => self.spawn_discovery(),

                Some(message) = inbox.recv() => match message {
                    CoordinatorEvent::ReaderRegistered { subtask_id, location } => {
                        self.add_reader(subtask_id, location);
                    }
                    CoordinatorEvent::FromReader { subtask_id, event } => {
                        self.handle_source_event(subtask_id, event)?;
                    }
                    CoordinatorEvent::DiscoveryCompleted(result) => {
                        self.process_discovered_shards(result?)?;
                    }
                    CoordinatorEvent::Snapshot { checkpoint_id, reply } => {
                        let _ = reply.send(self.snapshot_state(checkpoint_id));
                    }
                },
            }
        }
    }
}
