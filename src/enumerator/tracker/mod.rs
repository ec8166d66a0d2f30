//! Canonical registry of known splits and their assignment status.

pub mod graph;

pub use graph::ShardGraphTracker;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::config::InitialPosition;
use crate::shard::{id, Shard};
use crate::split::{ShardSplit, SplitAssignmentStatus, SplitWithStatus, StartingPosition};

/// Tracks every split known to the coordinator and decides which of them are
/// ready to be handed to readers.
///
/// A split is eligible for assignment only when it is neither assigned nor
/// finished and its parent can no longer produce unread records: the parent
/// is finished, or it is absent from tracking with its retention expired.
/// That gate is what preserves parent-before-child ordering even when the
/// listing API surfaces children before their parents.
pub struct SplitTracker {
    known_splits: IndexMap<String, ShardSplit>,
    assigned_splits: HashSet<String>,
    finished_splits: HashSet<String>,
    /// Reverse index, kept in lock-step with `known_splits`.
    parent_child_index: HashMap<String, IndexSet<String>>,
    stream_arn: String,
    initial_position: InitialPosition,
    /// Instant gating `LATEST` / `AT_TIMESTAMP` lineage anchoring.
    position_anchor: DateTime<Utc>,
}

impl SplitTracker {
    pub fn new(
        stream_arn: impl Into<String>,
        initial_position: InitialPosition,
        position_anchor: DateTime<Utc>,
    ) -> Self {
        Self {
            known_splits: IndexMap::new(),
            assigned_splits: HashSet::new(),
            finished_splits: HashSet::new(),
            parent_child_index: HashMap::new(),
            stream_arn: stream_arn.into(),
            initial_position,
            position_anchor,
        }
    }

    /// Rebuild a tracker from checkpointed state.
    pub fn from_state(
        initial_state: Vec<SplitWithStatus>,
        stream_arn: impl Into<String>,
        initial_position: InitialPosition,
        position_anchor: DateTime<Utc>,
    ) -> Self {
        let mut tracker = Self::new(stream_arn, initial_position, position_anchor);
        for SplitWithStatus { split, status } in initial_state {
            match status {
                SplitAssignmentStatus::Assigned => {
                    tracker.assigned_splits.insert(split.split_id().to_string());
                }
                SplitAssignmentStatus::Finished => {
                    tracker.finished_splits.insert(split.split_id().to_string());
                }
                SplitAssignmentStatus::Unassigned => {}
            }
            tracker.track_split(split);
        }
        tracker
    }

    /// Merge a newly discovered shard batch into tracking.
    ///
    /// In `TrimHorizon` mode every unknown shard is tracked from the oldest
    /// record. In `Latest` / `AtTimestamp` mode each unknown open lineage is
    /// walked upward to the first ancestor created at or before the anchor
    /// instant; that ancestor takes the configured position and every
    /// descendant below it reads from the shard start, so records appearing
    /// between the anchor and a later split are not lost.
    pub fn add_splits(&mut self, shards: &[Shard]) {
        if self.initial_position == InitialPosition::TrimHorizon {
            for shard in shards {
                if !self.known_splits.contains_key(&shard.shard_id) {
                    let split = self.to_split(shard, StartingPosition::TrimHorizon);
                    self.track_split(split);
                }
            }
            return;
        }

        let by_id: HashMap<&str, &Shard> = shards
            .iter()
            .map(|shard| (shard.shard_id.as_str(), shard))
            .collect();
        let mut planned: IndexMap<String, ShardSplit> = IndexMap::new();
        for shard in shards.iter().filter(|shard| !shard.is_closed()) {
            if self.known_splits.contains_key(&shard.shard_id)
                || planned.contains_key(&shard.shard_id)
            {
                continue;
            }
            self.plan_lineage(shard, &by_id, &mut planned);
        }
        for (_, split) in planned {
            self.track_split(split);
        }
    }

    /// Walk the ancestor chain of `shard` within the discovered batch and
    /// plan splits for every untracked shard on it.
    fn plan_lineage(
        &self,
        shard: &Shard,
        by_id: &HashMap<&str, &Shard>,
        planned: &mut IndexMap<String, ShardSplit>,
    ) {
        let mut current = shard;
        let mut descendants: Vec<&Shard> = Vec::new();
        let anchored_at_initial = loop {
            let created = id::shard_creation_time(&current.shard_id);
            if created.map_or(true, |t| t <= self.position_anchor) {
                break true;
            }
            match current.parent_shard_id.as_deref() {
                // no visible ancestor left: the topmost shard of the lineage
                // still takes the configured position
                None => break true,
                Some(parent_id)
                    if self.known_splits.contains_key(parent_id)
                        || planned.contains_key(parent_id) =>
                {
                    // everything below an already tracked ancestor split off
                    // after tracking began
                    break false;
                }
                Some(parent_id) => match by_id.get(parent_id) {
                    Some(&parent) => {
                        descendants.push(current);
                        current = parent;
                    }
                    None => break true,
                },
            }
        };

        let anchor_position = if anchored_at_initial {
            self.anchor_position()
        } else {
            StartingPosition::TrimHorizon
        };
        planned.insert(
            current.shard_id.clone(),
            self.to_split(current, anchor_position),
        );
        for descendant in descendants.into_iter().rev() {
            planned.insert(
                descendant.shard_id.clone(),
                self.to_split(descendant, StartingPosition::TrimHorizon),
            );
        }
    }

    /// Track children announced by a finished-splits event. Children are
    /// always read from their beginning.
    pub fn add_child_splits(&mut self, shards: &[Shard]) {
        for shard in shards {
            if !self.known_splits.contains_key(&shard.shard_id) {
                let split = self.to_split(shard, StartingPosition::TrimHorizon);
                self.track_split(split);
            }
        }
    }

    fn anchor_position(&self) -> StartingPosition {
        match self.initial_position {
            InitialPosition::TrimHorizon => StartingPosition::TrimHorizon,
            InitialPosition::Latest => StartingPosition::Latest,
            InitialPosition::AtTimestamp => StartingPosition::AtTimestamp(self.position_anchor),
        }
    }

    fn to_split(&self, shard: &Shard, starting_position: StartingPosition) -> ShardSplit {
        ShardSplit::new(
            self.stream_arn.clone(),
            shard.shard_id.clone(),
            starting_position,
            shard.parent_shard_id.clone(),
        )
    }

    fn track_split(&mut self, split: ShardSplit) {
        if let Some(parent_id) = split.parent_shard_id() {
            self.parent_child_index
                .entry(parent_id.to_string())
                .or_default()
                .insert(split.split_id().to_string());
        }
        self.known_splits
            .insert(split.split_id().to_string(), split);
    }

    /// Mark splits as assigned. Assigned splits are no longer available for
    /// assignment.
    pub fn mark_as_assigned(&mut self, splits: &[ShardSplit]) {
        for split in splits {
            self.assigned_splits.insert(split.split_id().to_string());
        }
    }

    /// Mark splits as finished, removing them from the assigned set.
    pub fn mark_as_finished<'a>(&mut self, split_ids: impl IntoIterator<Item = &'a str>) {
        for split_id in split_ids {
            self.finished_splits.insert(split_id.to_string());
            self.assigned_splits.remove(split_id);
        }
    }

    pub fn is_assigned(&self, split_id: &str) -> bool {
        self.assigned_splits.contains(split_id)
    }

    pub fn is_finished(&self, split_id: &str) -> bool {
        self.finished_splits.contains(split_id)
    }

    /// Every known split that can be handed to a reader right now.
    pub fn splits_available_for_assignment(&self) -> Vec<ShardSplit> {
        self.known_splits
            .values()
            .filter(|split| self.can_assign(split))
            .cloned()
            .collect()
    }

    /// Eligible children of the given parents, found through the reverse
    /// index instead of a full scan. This is the low-latency path taken
    /// right after a parent finishes.
    pub fn unassigned_child_splits<'a>(
        &self,
        parent_ids: impl IntoIterator<Item = &'a str>,
    ) -> Vec<ShardSplit> {
        let mut eligible = Vec::new();
        for parent_id in parent_ids {
            let Some(children) = self.parent_child_index.get(parent_id) else {
                continue;
            };
            for child_id in children {
                if let Some(split) = self.known_splits.get(child_id) {
                    if self.can_assign(split) {
                        eligible.push(split.clone());
                    }
                }
            }
        }
        eligible
    }

    fn can_assign(&self, split: &ShardSplit) -> bool {
        !self.is_assigned(split.split_id())
            && !self.is_finished(split.split_id())
            && self.parent_finished_or_gone(split)
    }

    /// The parent can produce no more unread records: it is finished, or it
    /// is not tracked and its retention has expired. A parent that was never
    /// observed still blocks its children until its id ages out, since it
    /// may hold records the job has not seen.
    fn parent_finished_or_gone(&self, split: &ShardSplit) -> bool {
        match split.parent_shard_id() {
            None => true,
            Some(parent_id) => {
                self.is_finished(parent_id)
                    || (!self.known_splits.contains_key(parent_id)
                        && id::is_older_than_retention(parent_id))
            }
        }
    }

    /// Materialize `(split, status)` for every known split. Deterministic:
    /// iteration follows insertion order.
    pub fn snapshot_state(&self, checkpoint_id: u64) -> Vec<SplitWithStatus> {
        debug!(
            checkpoint_id,
            splits = self.known_splits.len(),
            "Snapshotting split tracker"
        );
        self.known_splits
            .values()
            .map(|split| {
                let status = if self.is_assigned(split.split_id()) {
                    SplitAssignmentStatus::Assigned
                } else if self.is_finished(split.split_id()) {
                    SplitAssignmentStatus::Finished
                } else {
                    SplitAssignmentStatus::Unassigned
                };
                SplitWithStatus {
                    split: split.clone(),
                    status,
                }
            })
            .collect()
    }

    /// Evict finished splits that can no longer matter: parent finished or
    /// gone, no longer returned by the listing, retention expired, and no
    /// tracked unfinished child. Returns the evicted split ids.
    ///
    /// The retention guard prevents racing with a stream that temporarily
    /// stops returning a shard.
    pub fn clean_up_old_finished_splits(&mut self, discovered_ids: &HashSet<String>) -> Vec<String> {
        let now = Utc::now();
        let candidates: Vec<String> = self.finished_splits.iter().cloned().collect();
        let mut evicted = Vec::new();
        for split_id in candidates {
            let Some(split) = self.known_splits.get(&split_id) else {
                continue;
            };
            if !self.parent_finished_or_gone(split) {
                continue;
            }
            if discovered_ids.contains(&split_id) {
                continue;
            }
            if !id::age_exceeds_retention(&split_id, now) {
                continue;
            }
            if self.has_tracked_unfinished_child(&split_id) {
                continue;
            }
            self.evict(&split_id);
            evicted.push(split_id);
        }
        evicted
    }

    fn has_tracked_unfinished_child(&self, split_id: &str) -> bool {
        self.parent_child_index
            .get(split_id)
            .is_some_and(|children| {
                children
                    .iter()
                    .any(|child_id| {
                        self.known_splits.contains_key(child_id) && !self.is_finished(child_id)
                    })
            })
    }

    fn evict(&mut self, split_id: &str) {
        if let Some(split) = self.known_splits.shift_remove(split_id) {
            if let Some(parent_id) = split.parent_shard_id() {
                if let Some(siblings) = self.parent_child_index.get_mut(parent_id) {
                    siblings.shift_remove(split_id);
                    if siblings.is_empty() {
                        self.parent_child_index.remove(parent_id);
                    }
                }
            }
        }
        self.finished_splits.remove(split_id);
        self.parent_child_index.remove(split_id);
    }

    /// Number of splits currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.known_splits.len()
    }

    pub fn known_split(&self, split_id: &str) -> Option<&ShardSplit> {
        self.known_splits.get(split_id)
    }

    pub fn known_split_ids(&self) -> impl Iterator<Item = &str> {
        self.known_splits.keys().map(String::as_str)
    }
}
