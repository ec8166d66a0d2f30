//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the enumerator.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric. Metrics carry a `stream` label so jobs consuming
//! several streams stay distinguishable.

use metrics::{counter, gauge};
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when a discovery round returns a consistent shard set.
pub struct ShardsDiscovered {
    pub count: u64,
    pub stream: String,
}

impl InternalEvent for ShardsDiscovered {
    fn emit(self) {
        trace!(count = self.count, stream = %self.stream, "Shards discovered");
        counter!("meltwater_shards_discovered_total", "stream" => self.stream)
            .increment(self.count);
    }
}

/// Event emitted when splits are handed to reader subtasks.
pub struct SplitsAssigned {
    pub count: u64,
    pub stream: String,
}

impl InternalEvent for SplitsAssigned {
    fn emit(self) {
        trace!(count = self.count, stream = %self.stream, "Splits assigned");
        counter!("meltwater_splits_assigned_total", "stream" => self.stream).increment(self.count);
    }
}

/// Event emitted when readers report splits drained to the shard end.
pub struct SplitsFinished {
    pub count: u64,
    pub stream: String,
}

impl InternalEvent for SplitsFinished {
    fn emit(self) {
        trace!(count = self.count, stream = %self.stream, "Splits finished");
        counter!("meltwater_splits_finished_total", "stream" => self.stream).increment(self.count);
    }
}

/// Event emitted when a discovery round needed anchored re-listing to
/// resolve an inconsistent shard graph.
pub struct InconsistencyResolutionRounds {
    pub rounds: u64,
    pub stream: String,
}

impl InternalEvent for InconsistencyResolutionRounds {
    fn emit(self) {
        trace!(rounds = self.rounds, stream = %self.stream, "Inconsistency resolution rounds");
        counter!("meltwater_inconsistency_resolution_rounds_total", "stream" => self.stream)
            .increment(self.rounds);
    }
}

/// Event emitted when old finished splits are garbage collected.
pub struct FinishedSplitsEvicted {
    pub count: u64,
    pub stream: String,
}

impl InternalEvent for FinishedSplitsEvicted {
    fn emit(self) {
        trace!(count = self.count, stream = %self.stream, "Finished splits evicted");
        counter!("meltwater_finished_splits_evicted_total", "stream" => self.stream)
            .increment(self.count);
    }
}

/// Event emitted when the number of tracked splits changes.
pub struct TrackedSplits {
    pub count: usize,
    pub stream: String,
}

impl InternalEvent for TrackedSplits {
    fn emit(self) {
        trace!(count = self.count, stream = %self.stream, "Tracked splits");
        gauge!("meltwater_tracked_splits", "stream" => self.stream).set(self.count as f64);
    }
}
