//! Consistency tracking over accumulated shard listings.

use std::collections::{BTreeSet, HashSet};

use indexmap::IndexMap;

use crate::shard::Shard;

/// Tracks the shard graph assembled from one or more `list_shards` responses
/// and detects listing inconsistencies.
///
/// The listing API is not linearizable: a shard can be closed by a split
/// while its children only show up several responses later. A closed shard
/// with no observed child (a *closed leaf*) marks the accumulated graph
/// inconsistent; the earliest closed leaf is the anchor the next resolving
/// listing should resume after.
#[derive(Debug, Default)]
pub struct ShardGraphTracker {
    nodes: IndexMap<String, Shard>,
    closed_leaf_ids: BTreeSet<String>,
    observed_parent_ids: HashSet<String>,
}

impl ShardGraphTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_nodes(&mut self, shards: impl IntoIterator<Item = Shard>) {
        for shard in shards {
            self.add_node(shard);
        }
    }

    fn add_node(&mut self, shard: Shard) {
        // a closed shard is a leaf only until some node names it as parent,
        // regardless of the order the two arrive in
        if shard.is_closed() && !self.observed_parent_ids.contains(&shard.shard_id) {
            self.closed_leaf_ids.insert(shard.shard_id.clone());
        }
        if let Some(parent_id) = &shard.parent_shard_id {
            self.observed_parent_ids.insert(parent_id.clone());
            self.closed_leaf_ids.remove(parent_id);
        }
        self.nodes.insert(shard.shard_id.clone(), shard);
    }

    /// Inconsistency holds exactly while some closed shard has no observed
    /// child.
    pub fn inconsistency_detected(&self) -> bool {
        !self.closed_leaf_ids.is_empty()
    }

    /// The chronologically first closed leaf, used as the anchor for the
    /// next resolving listing.
    pub fn earliest_closed_leaf(&self) -> Option<&str> {
        self.closed_leaf_ids.iter().next().map(String::as_str)
    }

    /// Consume the tracker, yielding every shard observed so far.
    pub fn into_nodes(self) -> Vec<Shard> {
        self.nodes.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_graph_is_consistent() {
        let tracker = ShardGraphTracker::new();
        assert!(!tracker.inconsistency_detected());
        assert_eq!(tracker.earliest_closed_leaf(), None);
    }

    #[test]
    fn test_open_shards_are_consistent() {
        let mut tracker = ShardGraphTracker::new();
        tracker.add_nodes(vec![Shard::open("s0", None), Shard::open("s1", None)]);
        assert!(!tracker.inconsistency_detected());
    }

    #[test]
    fn test_closed_leaf_detected() {
        let mut tracker = ShardGraphTracker::new();
        tracker.add_nodes(vec![Shard::closed("s0", None)]);
        assert!(tracker.inconsistency_detected());
        assert_eq!(tracker.earliest_closed_leaf(), Some("s0"));
    }

    #[test]
    fn test_child_resolves_closed_leaf() {
        let mut tracker = ShardGraphTracker::new();
        tracker.add_nodes(vec![Shard::closed("s0", None)]);
        assert!(tracker.inconsistency_detected());

        tracker.add_nodes(vec![Shard::open("s1", Some("s0".to_string()))]);
        assert!(!tracker.inconsistency_detected());
    }

    #[test]
    fn test_parent_arriving_after_child_is_not_a_leaf() {
        let mut tracker = ShardGraphTracker::new();
        tracker.add_nodes(vec![
            Shard::open("s1", Some("s0".to_string())),
            Shard::closed("s0", None),
        ]);
        assert!(!tracker.inconsistency_detected());
    }

    #[test]
    fn test_earliest_closed_leaf_is_smallest_id() {
        let mut tracker = ShardGraphTracker::new();
        tracker.add_nodes(vec![
            Shard::closed("s2", None),
            Shard::closed("s0", None),
            Shard::closed("s1", None),
        ]);
        assert_eq!(tracker.earliest_closed_leaf(), Some("s0"));
    }

    #[test]
    fn test_consistent_once_every_closed_leaf_has_a_child() {
        let mut tracker = ShardGraphTracker::new();
        tracker.add_nodes(vec![Shard::closed("s0", None), Shard::closed("s1", None)]);
        assert!(tracker.inconsistency_detected());

        tracker.add_nodes(vec![
            Shard::open("s2", Some("s0".to_string())),
            Shard::open("s3", Some("s1".to_string())),
        ]);
        assert!(!tracker.inconsistency_detected());
    }

    #[test]
    fn test_into_nodes_keeps_all_shards() {
        let mut tracker = ShardGraphTracker::new();
        tracker.add_nodes(vec![
            Shard::closed("s0", None),
            Shard::open("s1", Some("s0".to_string())),
        ]);
        let nodes = tracker.into_nodes();
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_reinserting_shard_is_idempotent() {
        let mut tracker = ShardGraphTracker::new();
        tracker.add_nodes(vec![Shard::closed("s0", None)]);
        tracker.add_nodes(vec![Shard::closed("s0", None)]);
        assert_eq!(tracker.earliest_closed_leaf(), Some("s0"));
        assert_eq!(tracker.into_nodes().len(), 1);
    }
}
