//! Pluggable policy mapping a split to a reader subtask.

use std::collections::BTreeMap;

use indexmap::{IndexMap, IndexSet};
use snafu::OptionExt;

use crate::error::{self, AssignmentError};
use crate::split::ShardSplit;

use super::event::ReaderInfo;

/// View of the assignment state exposed to a [`ShardAssigner`].
pub struct ShardAssignerContext<'a> {
    /// Committed assignment per subtask.
    pub split_assignment: &'a BTreeMap<u32, IndexSet<ShardSplit>>,
    /// Assignments accumulated in the current batch, not yet committed.
    /// Lets a policy balance within the batch it is being asked about.
    pub pending_split_assignments: &'a IndexMap<u32, Vec<ShardSplit>>,
    /// Registered reader subtasks.
    pub registered_readers: &'a BTreeMap<u32, ReaderInfo>,
}

/// Policy mapping a split to a subtask. Implementations must be pure
/// functions of the split and the context.
pub trait ShardAssigner: Send {
    fn assign(
        &self,
        split: &ShardSplit,
        context: &ShardAssignerContext<'_>,
    ) -> Result<u32, AssignmentError>;
}

/// Assigns each split to the subtask with the fewest splits, counting both
/// committed and in-batch pending assignments. Ties go to the lowest
/// subtask id.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformShardAssigner;

impl ShardAssigner for UniformShardAssigner {
    fn assign(
        &self,
        split: &ShardSplit,
        context: &ShardAssignerContext<'_>,
    ) -> Result<u32, AssignmentError> {
        context
            .registered_readers
            .keys()
            .map(|&subtask_id| {
                let committed = context
                    .split_assignment
                    .get(&subtask_id)
                    .map_or(0, IndexSet::len);
                let pending = context
                    .pending_split_assignments
                    .get(&subtask_id)
                    .map_or(0, Vec::len);
                (committed + pending, subtask_id)
            })
            .min_by_key(|&(load, subtask_id)| (load, subtask_id))
            .map(|(_, subtask_id)| subtask_id)
            .context(error::NoRegisteredReadersSnafu {
                shard_id: split.shard_id(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::StartingPosition;

    const STREAM_ARN: &str = "arn:aws:dynamodb:us-east-1:1234:table/orders/stream/x";

    fn split(shard_id: &str) -> ShardSplit {
        ShardSplit::new(STREAM_ARN, shard_id, StartingPosition::TrimHorizon, None)
    }

    fn readers(ids: &[u32]) -> BTreeMap<u32, ReaderInfo> {
        ids.iter()
            .map(|&subtask_id| {
                (
                    subtask_id,
                    ReaderInfo {
                        subtask_id,
                        location: format!("host-{subtask_id}"),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_no_registered_readers_is_an_error() {
        let committed = BTreeMap::new();
        let pending = IndexMap::new();
        let registered = BTreeMap::new();
        let context = ShardAssignerContext {
            split_assignment: &committed,
            pending_split_assignments: &pending,
            registered_readers: &registered,
        };

        let err = UniformShardAssigner.assign(&split("s0"), &context).unwrap_err();
        assert!(matches!(err, AssignmentError::NoRegisteredReaders { .. }));
    }

    #[test]
    fn test_picks_least_loaded_subtask() {
        let mut committed = BTreeMap::new();
        committed.insert(0, IndexSet::from([split("s0"), split("s1")]));
        committed.insert(1, IndexSet::from([split("s2")]));
        let pending = IndexMap::new();
        let registered = readers(&[0, 1]);
        let context = ShardAssignerContext {
            split_assignment: &committed,
            pending_split_assignments: &pending,
            registered_readers: &registered,
        };

        assert_eq!(UniformShardAssigner.assign(&split("s3"), &context).unwrap(), 1);
    }

    #[test]
    fn test_counts_pending_assignments() {
        let mut committed = BTreeMap::new();
        committed.insert(0, IndexSet::from([split("s0")]));
        let mut pending = IndexMap::new();
        pending.insert(1, vec![split("s1"), split("s2")]);
        let registered = readers(&[0, 1]);
        let context = ShardAssignerContext {
            split_assignment: &committed,
            pending_split_assignments: &pending,
            registered_readers: &registered,
        };

        assert_eq!(UniformShardAssigner.assign(&split("s3"), &context).unwrap(), 0);
    }

    #[test]
    fn test_ties_break_to_lowest_subtask_id() {
        let committed = BTreeMap::new();
        let pending = IndexMap::new();
        let registered = readers(&[2, 0, 1]);
        let context = ShardAssignerContext {
            split_assignment: &committed,
            pending_split_assignments: &pending,
            registered_readers: &registered,
        };

        assert_eq!(UniformShardAssigner.assign(&split("s0"), &context).unwrap(), 0);
    }

    #[test]
    fn test_spreads_a_batch_evenly() {
        let committed = BTreeMap::new();
        let registered = readers(&[0, 1, 2]);
        let mut pending: IndexMap<u32, Vec<ShardSplit>> = IndexMap::new();

        for index in 0..6 {
            let next = split(&format!("s{index}"));
            let subtask_id = {
                let context = ShardAssignerContext {
                    split_assignment: &committed,
                    pending_split_assignments: &pending,
                    registered_readers: &registered,
                };
                UniformShardAssigner.assign(&next, &context).unwrap()
            };
            pending.entry(subtask_id).or_default().push(next);
        }

        for subtask_id in [0, 1, 2] {
            assert_eq!(pending.get(&subtask_id).map_or(0, Vec::len), 2);
        }
    }
}
