//! Configuration for the stream source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};

use crate::error::{self, ConfigError};

/// Where a newly discovered shard lineage begins reading when first tracked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitialPosition {
    /// Read every lineage from the oldest retained record.
    TrimHorizon,
    /// Read from the moment the job started; lineages that split after the
    /// start are read from their beginning.
    #[default]
    Latest,
    /// Like `Latest`, but anchored at `initial_timestamp` instead of the
    /// job start.
    AtTimestamp,
}

/// Configuration for a single stream source.
///
/// # Example
///
/// ```yaml
/// stream_arn: "arn:aws:dynamodb:us-east-1:123456789012:table/orders/stream/2026-01-01T00:00:00.000"
/// initial_position: TRIM_HORIZON
/// shard_discovery_interval_secs: 60
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// ARN of the stream to consume.
    pub stream_arn: String,
    /// Where to begin reading when no checkpoint exists.
    #[serde(default)]
    pub initial_position: InitialPosition,
    /// Anchor instant for `AT_TIMESTAMP` (ISO-8601).
    #[serde(default)]
    pub initial_timestamp: Option<DateTime<Utc>>,
    /// Seconds between periodic shard discovery cycles.
    #[serde(default = "default_shard_discovery_interval")]
    pub shard_discovery_interval_secs: u64,
    /// Maximum listing retries when resolving an inconsistent shard graph.
    #[serde(default = "default_inconsistency_retry_count")]
    pub describe_stream_inconsistency_resolution_retry_count: u32,
}

fn default_shard_discovery_interval() -> u64 {
    60
}

fn default_inconsistency_retry_count() -> u32 {
    5
}

impl SourceConfig {
    /// Configuration with defaults for everything but the stream ARN.
    pub fn new(stream_arn: impl Into<String>) -> Self {
        Self {
            stream_arn: stream_arn.into(),
            initial_position: InitialPosition::default(),
            initial_timestamp: None,
            shard_discovery_interval_secs: default_shard_discovery_interval(),
            describe_stream_inconsistency_resolution_retry_count:
                default_inconsistency_retry_count(),
        }
    }

    /// Parse configuration from a YAML string and validate it.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(contents).context(error::YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(error::ReadFileSnafu)?;
        Self::parse(&contents)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.stream_arn.is_empty(), error::EmptyStreamArnSnafu);
        ensure!(
            self.shard_discovery_interval_secs > 0,
            error::ZeroDiscoveryIntervalSnafu
        );
        if self.initial_position == InitialPosition::AtTimestamp {
            ensure!(
                self.initial_timestamp.is_some(),
                error::MissingInitialTimestampSnafu
            );
        }
        Ok(())
    }

    /// The anchor instant that gates `LATEST` / `AT_TIMESTAMP` lineage
    /// tracking: shards created at or before it take the configured initial
    /// position, later descendants read from their beginning.
    pub fn position_anchor(&self, start_timestamp: DateTime<Utc>) -> DateTime<Utc> {
        match self.initial_position {
            InitialPosition::AtTimestamp => self.initial_timestamp.unwrap_or(start_timestamp),
            _ => start_timestamp,
        }
    }
}
