//! Event-time extraction and validation.
//!
//! Every timestamp entering the engine passes through here exactly once.
//! Malformed events are dropped and counted by the caller, never forwarded.

use chrono::{DateTime, Utc};
use thiserror::Error;
use vitalflow_core::{BiometricRecord, FilePointer};

/// Raised when an event's timestamp or key cannot be extracted.
#[derive(Debug, Error)]
pub enum MalformedEvent {
    #[error("unparsable event_time {value:?}: {reason}")]
    BadPointerTime { value: String, reason: String },

    #[error("record time {0} outside the representable range")]
    TimeOutOfRange(i64),

    #[error("empty account id")]
    EmptyAccount,
}

/// A biometric record annotated with its extracted event time.
#[derive(Debug, Clone)]
pub struct TimestampedRecord {
    pub record: BiometricRecord,
    pub event_time: DateTime<Utc>,
}

impl TimestampedRecord {
    /// Validate a decoded record and extract its event time.
    pub fn try_from_record(record: BiometricRecord) -> Result<Self, MalformedEvent> {
        if record.account.is_empty() {
            return Err(MalformedEvent::EmptyAccount);
        }
        let event_time = record
            .event_time()
            .ok_or(MalformedEvent::TimeOutOfRange(record.time))?;
        Ok(Self { record, event_time })
    }
}

/// Parse a pointer message's ISO-8601 `event_time`.
pub fn parse_pointer_time(pointer: &FilePointer) -> Result<DateTime<Utc>, MalformedEvent> {
    DateTime::parse_from_rfc3339(&pointer.event_time)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MalformedEvent::BadPointerTime {
            value: pointer.event_time.clone(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer(event_time: &str) -> FilePointer {
        FilePointer {
            account_id: "a1".into(),
            event_time: event_time.into(),
            bucket_name: "b".into(),
            folder_name: "f".into(),
            file_name: "r.jsonl".into(),
        }
    }

    #[test]
    fn test_parse_pointer_time_utc() {
        let t = parse_pointer_time(&pointer("2024-03-01T12:00:00Z")).unwrap();
        assert_eq!(t.timestamp(), 1_709_294_400);
    }

    #[test]
    fn test_parse_pointer_time_with_offset() {
        let t = parse_pointer_time(&pointer("2024-03-01T13:00:00+01:00")).unwrap();
        assert_eq!(t.timestamp(), 1_709_294_400);
    }

    #[test]
    fn test_parse_pointer_time_malformed() {
        let err = parse_pointer_time(&pointer("not-a-time")).unwrap_err();
        assert!(matches!(err, MalformedEvent::BadPointerTime { .. }));
    }

    #[test]
    fn test_record_timestamping() {
        let rec = BiometricRecord::new("a1", 600, 50, 110.0);
        let stamped = TimestampedRecord::try_from_record(rec).unwrap();
        assert_eq!(stamped.event_time.timestamp(), 600);
    }

    #[test]
    fn test_record_empty_account_rejected() {
        let rec = BiometricRecord::new("", 600, 50, 110.0);
        let err = TimestampedRecord::try_from_record(rec).unwrap_err();
        assert!(matches!(err, MalformedEvent::EmptyAccount));
    }

    #[test]
    fn test_record_time_out_of_range_rejected() {
        let rec = BiometricRecord::new("a1", i64::MAX, 0, 0.0);
        let err = TimestampedRecord::try_from_record(rec).unwrap_err();
        assert!(matches!(err, MalformedEvent::TimeOutOfRange(_)));
    }
}
