//! Starting positions for reading a shard.

use chrono::{DateTime, Utc};

/// Where a reader must begin within a shard when first subscribed.
///
/// Equality considers both the variant and its payload:
/// `AfterSequenceNumber("A")` differs from `AfterSequenceNumber("B")` and
/// from `TrimHorizon`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StartingPosition {
    /// Read from the oldest record still retained.
    TrimHorizon,
    /// Read only records arriving after subscription.
    Latest,
    /// Read from the first record at or after the given instant.
    AtTimestamp(DateTime<Utc>),
    /// Resume after a known sequence number.
    AfterSequenceNumber(String),
}

impl StartingPosition {
    /// Wire name of the shard iterator type for this position.
    pub fn iterator_type(&self) -> &'static str {
        match self {
            StartingPosition::TrimHorizon => "TRIM_HORIZON",
            StartingPosition::Latest => "LATEST",
            StartingPosition::AtTimestamp(_) => "AT_TIMESTAMP",
            StartingPosition::AfterSequenceNumber(_) => "AFTER_SEQUENCE_NUMBER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_considers_variant_and_payload() {
        assert_eq!(StartingPosition::TrimHorizon, StartingPosition::TrimHorizon);
        assert_ne!(StartingPosition::TrimHorizon, StartingPosition::Latest);
        assert_ne!(
            StartingPosition::AfterSequenceNumber("A".to_string()),
            StartingPosition::AfterSequenceNumber("B".to_string())
        );
        assert_ne!(
            StartingPosition::AfterSequenceNumber("A".to_string()),
            StartingPosition::TrimHorizon
        );
    }

    #[test]
    fn test_iterator_type_names() {
        assert_eq!(StartingPosition::TrimHorizon.iterator_type(), "TRIM_HORIZON");
        assert_eq!(StartingPosition::Latest.iterator_type(), "LATEST");
        assert_eq!(
            StartingPosition::AtTimestamp(Utc::now()).iterator_type(),
            "AT_TIMESTAMP"
        );
        assert_eq!(
            StartingPosition::AfterSequenceNumber("42".to_string()).iterator_type(),
            "AFTER_SEQUENCE_NUMBER"
        );
    }
}
