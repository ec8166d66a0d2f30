//! Checkpointable enumerator state and its versioned codec.
//!
//! The state payload embeds the split serializer version it was written
//! with, so the two codecs can evolve independently. Version 1 added the
//! start timestamp; version 0 payloads restore without one and the
//! enumerator falls back to the wall clock.

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use snafu::ensure;

use crate::error::{self, SerializationError};
use crate::split::{serializer as split_serializer, SplitAssignmentStatus, SplitWithStatus};

pub const CURRENT_VERSION: u32 = 1;
const COMPATIBLE_VERSIONS: [u32; 2] = [0, 1];

/// Point-in-time snapshot of the enumerator, restored on job recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumeratorState {
    pub known_splits: Vec<SplitWithStatus>,
    /// Instant the job originally started; anchors `LATEST` semantics
    /// across restarts. `None` only when restored from a legacy snapshot.
    pub start_timestamp: Option<DateTime<Utc>>,
}

/// Encode enumerator state with the current layout version.
pub fn serialize(state: &EnumeratorState) -> Result<Vec<u8>, SerializationError> {
    let mut buf = BytesMut::new();
    let start_timestamp = state.start_timestamp.unwrap_or(DateTime::UNIX_EPOCH);
    buf.put_i64(start_timestamp.timestamp_millis());
    buf.put_i32(split_serializer::CURRENT_VERSION as i32);
    buf.put_i32(state.known_splits.len() as i32);
    for SplitWithStatus { split, status } in &state.known_splits {
        let split_bytes = split_serializer::serialize(split)?;
        buf.put_i32(split_bytes.len() as i32);
        buf.put_slice(&split_bytes);
        buf.put_i32(status.ordinal());
    }
    Ok(buf.to_vec())
}

/// Decode enumerator state written by any compatible layout version.
pub fn deserialize(version: u32, bytes: &[u8]) -> Result<EnumeratorState, SerializationError> {
    ensure!(
        COMPATIBLE_VERSIONS.contains(&version),
        error::VersionMismatchSnafu {
            version,
            current: CURRENT_VERSION
        }
    );

    let mut buf = bytes;
    let start_timestamp = if version >= 1 {
        ensure!(buf.remaining() >= 8, error::TruncatedSnafu { needed: 8usize });
        let millis = buf.get_i64();
        Some(
            DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                error::InvalidTimestampMarkerSnafu {
                    value: millis.to_string(),
                }
                .build()
            })?,
        )
    } else {
        None
    };

    let split_version = get_i32(&mut buf)?;
    ensure!(
        split_version >= 0,
        error::InvalidLengthSnafu {
            value: split_version
        }
    );
    let count = get_i32(&mut buf)?;
    ensure!(count >= 0, error::InvalidLengthSnafu { value: count });

    let mut known_splits = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let length = get_i32(&mut buf)?;
        ensure!(length >= 0, error::InvalidLengthSnafu { value: length });
        let length = length as usize;
        ensure!(
            buf.remaining() >= length,
            error::TruncatedSnafu {
                needed: length - buf.remaining()
            }
        );
        let split = split_serializer::deserialize(split_version as u32, &buf[..length])?;
        buf.advance(length);
        let ordinal = get_i32(&mut buf)?;
        let status = SplitAssignmentStatus::from_ordinal(ordinal)
            .ok_or_else(|| error::UnknownAssignmentStatusSnafu { ordinal }.build())?;
        known_splits.push(SplitWithStatus { split, status });
    }
    ensure!(
        !buf.has_remaining(),
        error::TrailingBytesSnafu {
            remaining: buf.remaining()
        }
    );

    Ok(EnumeratorState {
        known_splits,
        start_timestamp,
    })
}

fn get_i32(buf: &mut &[u8]) -> Result<i32, SerializationError> {
    ensure!(
        buf.remaining() >= 4,
        error::TruncatedSnafu {
            needed: 4 - buf.remaining()
        }
    );
    Ok(buf.get_i32())
}
