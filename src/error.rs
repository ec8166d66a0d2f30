//! Error types for the meltwater source core.

use snafu::prelude::*;

// ============ Proxy Errors ============

/// Errors raised by a [`StreamProxy`](crate::proxy::StreamProxy) implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProxyError {
    /// The stream service throttled the request.
    #[snafu(display("Stream service throttled the request: {message}"))]
    Throttled { message: String },

    /// Network failure while calling the stream service.
    #[snafu(display("Network error calling the stream service: {message}"))]
    Network { message: String },

    /// The stream does not exist or is not accessible.
    #[snafu(display("Stream not found: {stream_arn}"))]
    StreamNotFound { stream_arn: String },

    /// The proxy has already been closed.
    #[snafu(display("Stream proxy is closed"))]
    ProxyClosed,
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Stream ARN is empty.
    #[snafu(display("Stream ARN cannot be empty"))]
    EmptyStreamArn,

    /// AT_TIMESTAMP without an anchor instant.
    #[snafu(display("initial_timestamp is required when initial_position is AT_TIMESTAMP"))]
    MissingInitialTimestamp,

    /// Discovery interval of zero would spin the coordinator.
    #[snafu(display("shard_discovery_interval_secs must be greater than zero"))]
    ZeroDiscoveryInterval,

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Serialization Errors ============

/// Errors that can occur while encoding or decoding persisted state.
///
/// Unknown versions are fatal: job startup aborts rather than guessing at a
/// layout it does not understand.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SerializationError {
    /// State was written by a serializer version this build does not know.
    #[snafu(display(
        "Cannot deserialize state written with unsupported version {version}, current version is {current}"
    ))]
    VersionMismatch { version: u32, current: u32 },

    /// Payload ended before the announced fields.
    #[snafu(display("Payload truncated: needed {needed} more bytes"))]
    Truncated { needed: usize },

    /// Payload has bytes left over after the last announced field.
    #[snafu(display("Payload has {remaining} undecoded trailing bytes"))]
    TrailingBytes { remaining: usize },

    /// An encoded string is not valid UTF-8.
    #[snafu(display("Invalid UTF-8 in encoded string"))]
    InvalidUtf8 { source: std::string::FromUtf8Error },

    /// A string does not fit the u16 length prefix.
    #[snafu(display("String of {length} bytes exceeds the encodable maximum"))]
    StringTooLong { length: usize },

    /// A boolean byte was neither 0 nor 1.
    #[snafu(display("Invalid boolean byte: {value}"))]
    InvalidBoolean { value: u8 },

    /// A length or count field is negative.
    #[snafu(display("Invalid length: {value}"))]
    InvalidLength { value: i32 },

    /// An iterator type name that no known position maps to.
    #[snafu(display("Unknown shard iterator type: {value}"))]
    UnknownIteratorType { value: String },

    /// An AFTER_SEQUENCE_NUMBER position without its sequence number.
    #[snafu(display("Missing starting marker for iterator type {iterator_type}"))]
    MissingPositionMarker { iterator_type: String },

    /// An AT_TIMESTAMP marker that does not parse as epoch millis.
    #[snafu(display("Invalid timestamp marker: {value}"))]
    InvalidTimestampMarker { value: String },

    /// A split assignment status ordinal outside the known range.
    #[snafu(display("Unknown split assignment status ordinal: {ordinal}"))]
    UnknownAssignmentStatus { ordinal: i32 },
}

// ============ Assignment Errors ============

/// Errors raised by a [`ShardAssigner`](crate::enumerator::ShardAssigner) policy.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AssignmentError {
    /// No readers are registered to receive the split.
    #[snafu(display("No registered readers to assign shard {shard_id} to"))]
    NoRegisteredReaders { shard_id: String },

    /// The policy picked a subtask that is not registered.
    #[snafu(display("Assigner selected subtask {subtask_id} which has no registered reader"))]
    UnknownSubtask { subtask_id: u32 },
}

// ============ Top-level Source Errors ============

/// Top-level errors for the source enumerator. Discovery and assignment
/// failures are fatal and rely on cluster-level restart from checkpoint.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// Shard discovery failed against the upstream listing API.
    #[snafu(display("Failed to list shards for stream {stream_arn}"))]
    ListShards {
        stream_arn: String,
        source: ProxyError,
    },

    /// A shard assigner policy failed.
    #[snafu(display("Shard assignment failed"))]
    Assignment { source: AssignmentError },

    /// Persisted enumerator state could not be decoded.
    #[snafu(display("Failed to decode persisted enumerator state"))]
    StateCodec { source: SerializationError },

    /// Splits cannot be returned to the enumerator; the whole job restarts
    /// from the last checkpoint instead.
    #[snafu(display("Partial recovery is not supported"))]
    PartialRecoveryUnsupported,

    /// The channel delivering assignments to reader subtasks is gone.
    #[snafu(display("Assignment channel closed unexpectedly"))]
    AssignmentChannelClosed,

    /// Failed to close the stream proxy.
    #[snafu(display("Failed to close stream proxy"))]
    ProxyClose { source: ProxyError },
}
