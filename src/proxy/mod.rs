//! Narrow interface to the upstream stream service.
//!
//! The RPC layer itself lives outside this crate; the enumerator only
//! depends on the shard listing and shutdown primitives defined here.

use async_trait::async_trait;

use crate::error::ProxyError;
use crate::shard::{Shard, StreamStatus};

/// Result of a single `list_shards` call, and of a fully resolved discovery
/// round.
///
/// `inconsistency_detected` is set when the listing (or the resolution loop
/// built on top of it) could not produce a consistent shard lineage; callers
/// must leave their state untouched for such a result.
#[derive(Debug, Clone)]
pub struct ListShardsResult {
    pub shards: Vec<Shard>,
    pub stream_status: StreamStatus,
    pub inconsistency_detected: bool,
}

impl ListShardsResult {
    pub fn new(shards: Vec<Shard>, stream_status: StreamStatus) -> Self {
        Self {
            shards,
            stream_status,
            inconsistency_detected: false,
        }
    }
}

/// Client for the stream service, owned exclusively by the enumerator.
///
/// When `start_shard_id_exclusive` is given, the listing resumes *after*
/// that shard id. The enumerator uses this to re-list from an inconsistency
/// anchor instead of paging through the whole stream again.
#[async_trait]
pub trait StreamProxy: Send + Sync + 'static {
    async fn list_shards(
        &self,
        stream_arn: &str,
        start_shard_id_exclusive: Option<&str>,
    ) -> Result<ListShardsResult, ProxyError>;

    async fn close(&self) -> Result<(), ProxyError>;
}
