//! Shard-ID arithmetic.
//!
//! Shard ids encode their creation time: `shardId-<epoch-millis>-<suffix>`.
//! The zero-padded millis segment makes lexicographic order match creation
//! order, which the inconsistency tracker relies on for its anchor choice.

use chrono::{DateTime, Duration, Utc};

/// Upstream retention period in milliseconds. A shard older than this can
/// never be read again and is safe to forget.
const SHARD_RETENTION_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Decode the creation time embedded in a shard id.
///
/// Returns `None` when the id does not follow the
/// `shardId-<epoch-millis>-<suffix>` layout.
pub fn shard_creation_time(shard_id: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = shard_id.split('-').nth(1)?.parse().ok()?;
    DateTime::from_timestamp_millis(millis)
}

/// Whether the shard's age, measured from the creation time in its id,
/// exceeds the stream retention period at instant `now`.
///
/// Ids without a decodable creation time never exceed retention, so they
/// are never garbage collected.
pub fn age_exceeds_retention(shard_id: &str, now: DateTime<Utc>) -> bool {
    match shard_creation_time(shard_id) {
        Some(created) => {
            now.signed_duration_since(created) > Duration::milliseconds(SHARD_RETENTION_MILLIS)
        }
        None => false,
    }
}

/// [`age_exceeds_retention`] against the current wall clock.
pub fn is_older_than_retention(shard_id: &str) -> bool {
    age_exceeds_retention(shard_id, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_id_at(instant: DateTime<Utc>) -> String {
        format!("shardId-{:020}-deadbeef", instant.timestamp_millis())
    }

    #[test]
    fn test_creation_time_decoding() {
        let id = "shardId-00000001536019433669-e0f812cc";
        let created = shard_creation_time(id).unwrap();
        assert_eq!(created.timestamp_millis(), 1_536_019_433_669);
    }

    #[test]
    fn test_creation_time_malformed() {
        assert!(shard_creation_time("s0").is_none());
        assert!(shard_creation_time("shardId-notanumber-ff").is_none());
        assert!(shard_creation_time("").is_none());
    }

    #[test]
    fn test_age_within_retention() {
        let now = Utc::now();
        let id = shard_id_at(now - Duration::hours(1));
        assert!(!age_exceeds_retention(&id, now));
    }

    #[test]
    fn test_age_beyond_retention() {
        let now = Utc::now();
        let id = shard_id_at(now - Duration::hours(48));
        assert!(age_exceeds_retention(&id, now));
    }

    #[test]
    fn test_malformed_id_never_exceeds_retention() {
        assert!(!age_exceeds_retention("s0", Utc::now()));
    }

    #[test]
    fn test_lexicographic_order_matches_creation_order() {
        let now = Utc::now();
        let older = shard_id_at(now - Duration::hours(2));
        let newer = shard_id_at(now - Duration::hours(1));
        assert!(older < newer);
    }
}
