//! Wire-level data model: biometric samples, the pointer messages that
//! reference batches of them, and the summary records published downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Account identifier (Arc<str> for O(1) clone across per-key state).
pub type AccountId = Arc<str>;

/// A single decoded biometric sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiometricRecord {
    pub account: AccountId,
    /// Sample time as unix seconds, as carried on the wire.
    pub time: i64,
    pub steps_count: i64,
    pub glucose_level: f64,
}

impl BiometricRecord {
    pub fn new(
        account: impl Into<AccountId>,
        time: i64,
        steps_count: i64,
        glucose_level: f64,
    ) -> Self {
        Self {
            account: account.into(),
            time,
            steps_count,
            glucose_level,
        }
    }

    /// Sample time as an absolute UTC timestamp, `None` when the unix
    /// seconds value is outside chrono's representable range.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }
}

/// Pointer message naming the blob that holds a batch of records.
///
/// This is the shape delivered by the ingest transport; `event_time` is an
/// ISO-8601 string validated by the timestamp assigner, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePointer {
    pub account_id: String,
    pub event_time: String,
    pub bucket_name: String,
    pub folder_name: String,
    pub file_name: String,
}

impl FilePointer {
    /// Object path relative to the bucket root.
    pub fn object_path(&self) -> String {
        format!("{}/{}", self.folder_name, self.file_name)
    }
}

/// Rolling step-count summary published from the long tumbling stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepsSummary {
    pub account: AccountId,
    pub total_steps: i64,
}

/// Joined step/glucose summary, enriched with a recommendation.
///
/// `recommendation` is empty when enrichment failed or was skipped; the
/// record itself is always published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedSummary {
    pub account: AccountId,
    pub total_steps: i64,
    pub avg_glucose: f64,
    pub recommendation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_event_time() {
        let rec = BiometricRecord::new("acc-1", 1_700_000_000, 120, 95.5);
        let ts = rec.event_time().unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_record_event_time_out_of_range() {
        let rec = BiometricRecord::new("acc-1", i64::MAX, 0, 0.0);
        assert!(rec.event_time().is_none());
    }

    #[test]
    fn test_record_json_roundtrip() {
        let json = r#"{"account":"a42","time":1000,"steps_count":250,"glucose_level":101.5}"#;
        let rec: BiometricRecord = serde_json::from_str(json).unwrap();
        assert_eq!(&*rec.account, "a42");
        assert_eq!(rec.time, 1000);
        assert_eq!(rec.steps_count, 250);
        assert_eq!(rec.glucose_level, 101.5);
    }

    #[test]
    fn test_pointer_object_path() {
        let ptr = FilePointer {
            account_id: "a1".into(),
            event_time: "2024-01-01T00:00:00Z".into(),
            bucket_name: "biometrics".into(),
            folder_name: "2024-01-01".into(),
            file_name: "a1.jsonl".into(),
        };
        assert_eq!(ptr.object_path(), "2024-01-01/a1.jsonl");
    }

    #[test]
    fn test_joined_summary_serializes_all_fields() {
        let summary = JoinedSummary {
            account: "a7".into(),
            total_steps: 1500,
            avg_glucose: 110.25,
            recommendation: String::new(),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["account"], "a7");
        assert_eq!(json["total_steps"], 1500);
        assert_eq!(json["avg_glucose"], 110.25);
        assert_eq!(json["recommendation"], "");
    }
}
