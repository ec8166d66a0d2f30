//! Versioned binary codec for [`ShardSplit`].
//!
//! The layout is big-endian with u16 length-prefixed UTF-8 strings. Version
//! 2 is current; versions 0 and 1 stay readable. Version 0 carried neither
//! the finished flag nor child shards; version 1 added the finished flag.
//!
//! Legacy payloads (version <= 1) encoded the parent as either a single
//! optional shard id or a set of shard ids, and the version number does not
//! distinguish the two. Deserialization first tries the single-parent shape
//! and falls back to the set shape when the payload is not fully consumed.

use bytes::{Buf, BufMut, BytesMut};
use chrono::DateTime;
use snafu::{ensure, ResultExt};

use crate::error::{self, SerializationError};
use crate::shard::{SequenceNumberRange, Shard};
use crate::split::{ShardSplit, StartingPosition};

pub const CURRENT_VERSION: u32 = 2;
const COMPATIBLE_VERSIONS: [u32; 3] = [0, 1, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentShape {
    Single,
    Set,
}

/// Encode a split with the current layout version.
pub fn serialize(split: &ShardSplit) -> Result<Vec<u8>, SerializationError> {
    let mut buf = BytesMut::new();
    put_string(&mut buf, split.stream_arn())?;
    put_string(&mut buf, split.shard_id())?;
    put_string(&mut buf, split.starting_position().iterator_type())?;
    match split.starting_position() {
        StartingPosition::TrimHorizon | StartingPosition::Latest => put_bool(&mut buf, false),
        StartingPosition::AfterSequenceNumber(sequence_number) => {
            put_bool(&mut buf, true);
            put_bool(&mut buf, true);
            put_string(&mut buf, sequence_number)?;
        }
        StartingPosition::AtTimestamp(timestamp) => {
            put_bool(&mut buf, true);
            put_bool(&mut buf, true);
            put_string(&mut buf, &timestamp.timestamp_millis().to_string())?;
        }
    }
    match split.parent_shard_id() {
        None => put_bool(&mut buf, false),
        Some(parent_shard_id) => {
            put_bool(&mut buf, true);
            put_string(&mut buf, parent_shard_id)?;
        }
    }
    put_bool(&mut buf, split.is_finished());
    buf.put_i32(split.child_splits().len() as i32);
    for child in split.child_splits() {
        put_string(&mut buf, &child.shard_id)?;
        put_string(&mut buf, child.parent_shard_id.as_deref().unwrap_or(""))?;
        put_string(&mut buf, &child.sequence_number_range.starting_sequence_number)?;
        match &child.sequence_number_range.ending_sequence_number {
            None => put_bool(&mut buf, false),
            Some(ending) => {
                put_bool(&mut buf, true);
                put_string(&mut buf, ending)?;
            }
        }
    }
    Ok(buf.to_vec())
}

/// Decode a split written by any compatible layout version.
///
/// Fields absent from older versions come back with their defaults:
/// `is_finished = false`, no child splits.
pub fn deserialize(version: u32, bytes: &[u8]) -> Result<ShardSplit, SerializationError> {
    ensure!(
        COMPATIBLE_VERSIONS.contains(&version),
        error::VersionMismatchSnafu {
            version,
            current: CURRENT_VERSION
        }
    );

    if version >= 2 {
        let mut buf = bytes;
        let split = read_split(&mut buf, version, ParentShape::Single)?;
        ensure!(
            !buf.has_remaining(),
            error::TrailingBytesSnafu {
                remaining: buf.remaining()
            }
        );
        return Ok(split);
    }

    let mut buf = bytes;
    if let Ok(split) = read_split(&mut buf, version, ParentShape::Single) {
        if !buf.has_remaining() {
            return Ok(split);
        }
    }
    let mut buf = bytes;
    let split = read_split(&mut buf, version, ParentShape::Set)?;
    ensure!(
        !buf.has_remaining(),
        error::TrailingBytesSnafu {
            remaining: buf.remaining()
        }
    );
    Ok(split)
}

fn read_split(
    buf: &mut &[u8],
    version: u32,
    parent_shape: ParentShape,
) -> Result<ShardSplit, SerializationError> {
    let stream_arn = get_string(buf)?;
    let shard_id = get_string(buf)?;
    let iterator_type = get_string(buf)?;
    let marker = if get_bool(buf)? {
        if get_bool(buf)? {
            Some(get_string(buf)?)
        } else {
            None
        }
    } else {
        None
    };
    let starting_position = decode_position(&iterator_type, marker)?;

    let parent_shard_id = match parent_shape {
        ParentShape::Single => {
            if get_bool(buf)? {
                Some(get_string(buf)?)
            } else {
                None
            }
        }
        ParentShape::Set => {
            let count = get_i32(buf)?;
            ensure!(count >= 0, error::InvalidLengthSnafu { value: count });
            let mut first = None;
            for _ in 0..count {
                let parent_id = get_string(buf)?;
                if first.is_none() {
                    first = Some(parent_id);
                }
            }
            first
        }
    };

    let is_finished = if version >= 1 { get_bool(buf)? } else { false };

    let mut child_splits = Vec::new();
    if version >= 2 {
        let count = get_i32(buf)?;
        ensure!(count >= 0, error::InvalidLengthSnafu { value: count });
        for _ in 0..count {
            let child_shard_id = get_string(buf)?;
            let child_parent_id = get_string(buf)?;
            let starting_sequence_number = get_string(buf)?;
            let ending_sequence_number = if get_bool(buf)? {
                Some(get_string(buf)?)
            } else {
                None
            };
            child_splits.push(Shard {
                shard_id: child_shard_id,
                parent_shard_id: if child_parent_id.is_empty() {
                    None
                } else {
                    Some(child_parent_id)
                },
                sequence_number_range: SequenceNumberRange {
                    starting_sequence_number,
                    ending_sequence_number,
                },
            });
        }
    }

    Ok(ShardSplit::with_state(
        stream_arn,
        shard_id,
        starting_position,
        parent_shard_id,
        is_finished,
        child_splits,
    ))
}

fn decode_position(
    iterator_type: &str,
    marker: Option<String>,
) -> Result<StartingPosition, SerializationError> {
    match iterator_type {
        "TRIM_HORIZON" => Ok(StartingPosition::TrimHorizon),
        "LATEST" => Ok(StartingPosition::Latest),
        "AFTER_SEQUENCE_NUMBER" => {
            let sequence_number = marker.ok_or_else(|| {
                error::MissingPositionMarkerSnafu {
                    iterator_type: iterator_type.to_string(),
                }
                .build()
            })?;
            Ok(StartingPosition::AfterSequenceNumber(sequence_number))
        }
        "AT_TIMESTAMP" => {
            // Legacy payloads dropped the timestamp marker entirely; the Unix
            // epoch stands in for it, which reads the shard from its start.
            let timestamp = match marker {
                Some(millis) => {
                    let millis: i64 = millis.parse().map_err(|_| {
                        error::InvalidTimestampMarkerSnafu {
                            value: millis.clone(),
                        }
                        .build()
                    })?;
                    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                        error::InvalidTimestampMarkerSnafu {
                            value: millis.to_string(),
                        }
                        .build()
                    })?
                }
                None => DateTime::UNIX_EPOCH,
            };
            Ok(StartingPosition::AtTimestamp(timestamp))
        }
        other => error::UnknownIteratorTypeSnafu { value: other }.fail(),
    }
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<(), SerializationError> {
    ensure!(
        value.len() <= u16::MAX as usize,
        error::StringTooLongSnafu { length: value.len() }
    );
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(u8::from(value));
}

fn get_string(buf: &mut &[u8]) -> Result<String, SerializationError> {
    ensure!(
        buf.remaining() >= 2,
        error::TruncatedSnafu {
            needed: 2 - buf.remaining()
        }
    );
    let length = buf.get_u16() as usize;
    ensure!(
        buf.remaining() >= length,
        error::TruncatedSnafu {
            needed: length - buf.remaining()
        }
    );
    let mut raw = vec![0u8; length];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).context(error::InvalidUtf8Snafu)
}

fn get_bool(buf: &mut &[u8]) -> Result<bool, SerializationError> {
    ensure!(
        buf.remaining() >= 1,
        error::TruncatedSnafu { needed: 1usize }
    );
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        value => error::InvalidBooleanSnafu { value }.fail(),
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const STREAM_ARN: &str = "arn:aws:dynamodb:us-east-1:1234:table/orders/stream/x";

    fn sample_split() -> ShardSplit {
        ShardSplit::with_state(
            STREAM_ARN,
            "shardId-00000001536019433669-aaaa",
            StartingPosition::TrimHorizon,
            Some("shardId-00000001536019430000-9999".to_string()),
            true,
            vec![
                Shard::open(
                    "shardId-00000001536019440000-bbbb",
                    Some("shardId-00000001536019433669-aaaa".to_string()),
                ),
                Shard::closed(
                    "shardId-00000001536019450000-cccc",
                    Some("shardId-00000001536019433669-aaaa".to_string()),
                ),
            ],
        )
    }

    /// Write a legacy (version <= 1) payload, with the parent encoded in the
    /// requested shape.
    fn serialize_legacy(split: &ShardSplit, version: u32, shape: ParentShape) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, split.stream_arn()).unwrap();
        put_string(&mut buf, split.shard_id()).unwrap();
        put_string(&mut buf, split.starting_position().iterator_type()).unwrap();
        match split.starting_position() {
            StartingPosition::TrimHorizon | StartingPosition::Latest => put_bool(&mut buf, false),
            StartingPosition::AfterSequenceNumber(sequence_number) => {
                put_bool(&mut buf, true);
                put_bool(&mut buf, true);
                put_string(&mut buf, sequence_number).unwrap();
            }
            StartingPosition::AtTimestamp(_) => {
                // legacy writers recorded a non-string marker with no payload
                put_bool(&mut buf, true);
                put_bool(&mut buf, false);
            }
        }
        match shape {
            ParentShape::Single => match split.parent_shard_id() {
                None => put_bool(&mut buf, false),
                Some(parent) => {
                    put_bool(&mut buf, true);
                    put_string(&mut buf, parent).unwrap();
                }
            },
            ParentShape::Set => match split.parent_shard_id() {
                None => buf.put_i32(0),
                Some(parent) => {
                    buf.put_i32(1);
                    put_string(&mut buf, parent).unwrap();
                }
            },
        }
        if version >= 1 {
            put_bool(&mut buf, split.is_finished());
        }
        buf.to_vec()
    }

    #[test]
    fn test_round_trip_current_version() {
        let split = sample_split();
        let bytes = serialize(&split).unwrap();
        let restored = deserialize(CURRENT_VERSION, &bytes).unwrap();
        assert_eq!(restored, split);
    }

    #[test]
    fn test_round_trip_all_positions() {
        let positions = vec![
            StartingPosition::TrimHorizon,
            StartingPosition::Latest,
            StartingPosition::AfterSequenceNumber("12345".to_string()),
            StartingPosition::AtTimestamp(
                DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap(),
            ),
        ];
        for position in positions {
            let split = ShardSplit::new(STREAM_ARN, "shardId-0001-aa", position.clone(), None);
            let bytes = serialize(&split).unwrap();
            let restored = deserialize(CURRENT_VERSION, &bytes).unwrap();
            assert_eq!(restored.starting_position(), &position);
        }
    }

    #[test]
    fn test_unknown_version_rejected() {
        let bytes = serialize(&sample_split()).unwrap();
        let err = deserialize(3, &bytes).unwrap_err();
        assert!(matches!(
            err,
            SerializationError::VersionMismatch {
                version: 3,
                current: CURRENT_VERSION
            }
        ));
    }

    #[test]
    fn test_legacy_v0_single_parent_shape() {
        let split = ShardSplit::new(
            STREAM_ARN,
            "shardId-0002-bb",
            StartingPosition::Latest,
            Some("shardId-0001-aa".to_string()),
        );
        let bytes = serialize_legacy(&split, 0, ParentShape::Single);
        let restored = deserialize(0, &bytes).unwrap();
        assert_eq!(restored.parent_shard_id(), Some("shardId-0001-aa"));
        // fields missing from v0 come back with defaults
        assert!(!restored.is_finished());
        assert!(restored.child_splits().is_empty());
    }

    #[test]
    fn test_legacy_v0_parent_set_shape() {
        let split = ShardSplit::new(
            STREAM_ARN,
            "shardId-0002-bb",
            StartingPosition::Latest,
            Some("shardId-0001-aa".to_string()),
        );
        let bytes = serialize_legacy(&split, 0, ParentShape::Set);
        let restored = deserialize(0, &bytes).unwrap();
        assert_eq!(restored.parent_shard_id(), Some("shardId-0001-aa"));
    }

    #[test]
    fn test_legacy_v0_empty_parent_set_shape() {
        let split = ShardSplit::new(STREAM_ARN, "shardId-0002-bb", StartingPosition::Latest, None);
        let bytes = serialize_legacy(&split, 0, ParentShape::Set);
        let restored = deserialize(0, &bytes).unwrap();
        assert_eq!(restored.parent_shard_id(), None);
    }

    #[test]
    fn test_legacy_v1_both_parent_shapes() {
        let split = ShardSplit::with_state(
            STREAM_ARN,
            "shardId-0002-bb",
            StartingPosition::TrimHorizon,
            Some("shardId-0001-aa".to_string()),
            true,
            Vec::new(),
        );
        for shape in [ParentShape::Single, ParentShape::Set] {
            let bytes = serialize_legacy(&split, 1, shape);
            let restored = deserialize(1, &bytes).unwrap();
            assert_eq!(restored.parent_shard_id(), Some("shardId-0001-aa"));
            assert!(restored.is_finished());
            assert!(restored.child_splits().is_empty());
        }
    }

    #[test]
    fn test_legacy_at_timestamp_marker_defaults_to_epoch() {
        let split = ShardSplit::new(
            STREAM_ARN,
            "shardId-0002-bb",
            StartingPosition::AtTimestamp(Utc::now()),
            None,
        );
        let bytes = serialize_legacy(&split, 1, ParentShape::Single);
        let restored = deserialize(1, &bytes).unwrap();
        assert_eq!(
            restored.starting_position(),
            &StartingPosition::AtTimestamp(DateTime::UNIX_EPOCH)
        );
    }

    #[test]
    fn test_child_shard_without_parent_round_trips_as_none() {
        let split = ShardSplit::with_state(
            STREAM_ARN,
            "shardId-0001-aa",
            StartingPosition::TrimHorizon,
            None,
            false,
            vec![Shard::open("shardId-0002-bb", None)],
        );
        let bytes = serialize(&split).unwrap();
        let restored = deserialize(CURRENT_VERSION, &bytes).unwrap();
        assert_eq!(restored.child_splits()[0].parent_shard_id, None);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let bytes = serialize(&sample_split()).unwrap();
        let err = deserialize(CURRENT_VERSION, &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, SerializationError::Truncated { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = serialize(&sample_split()).unwrap();
        bytes.push(0);
        let err = deserialize(CURRENT_VERSION, &bytes).unwrap_err();
        assert!(matches!(err, SerializationError::TrailingBytes { .. }));
    }

    #[test]
    fn test_unknown_iterator_type_rejected() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, STREAM_ARN).unwrap();
        put_string(&mut buf, "shardId-0001-aa").unwrap();
        put_string(&mut buf, "AT_OFFSET").unwrap();
        put_bool(&mut buf, false);
        put_bool(&mut buf, false);
        put_bool(&mut buf, false);
        buf.put_i32(0);
        let err = deserialize(CURRENT_VERSION, &buf).unwrap_err();
        assert!(matches!(
            err,
            SerializationError::UnknownIteratorType { .. }
        ));
    }
}
