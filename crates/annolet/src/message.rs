//! Queue payload types and the batch-window id.
//!
//! One struct per channel. The inner `data`/`result` payloads are opaque,
//! caller-defined JSON; everything else is routing metadata. Field names on
//! the wire stay camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Width of the wall-clock bucket used to group results, in milliseconds.
pub const BATCH_WINDOW_MS: i64 = 60_000;

/// One file deposited in the blob store, awaiting splitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIntakeMessage {
    /// Blob key, `input/<stem>.jsonl`.
    pub file: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// One line of an intake file, awaiting annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMessage {
    pub data: serde_json::Value,
    pub source_file: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Resubmission count. Zero on first emission.
    #[serde(default)]
    pub retry_count: u32,
}

/// One annotated line, awaiting batched output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    pub result: serde_json::Value,
    pub source_file: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub batch_id: String,
}

impl ResultMessage {
    /// Grouping key for the aggregator: `<sourceFile>-<batchId>`.
    pub fn group_key(&self) -> String {
        format!("{}-{}", self.source_file, self.batch_id)
    }
}

/// Batch id for a timestamp: `batch-<minute>` over fixed 60-second windows.
///
/// Pure in the timestamp, so two results in the same wall-clock minute land
/// in the same batch.
pub fn batch_id(timestamp: DateTime<Utc>) -> String {
    format!("batch-{}", timestamp.timestamp_millis() / BATCH_WINDOW_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_millis(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn batch_id_is_deterministic_within_a_window() {
        assert_eq!(batch_id(at_millis(0)), batch_id(at_millis(59_999)));
        assert_eq!(batch_id(at_millis(120_000)), batch_id(at_millis(179_999)));
    }

    #[test]
    fn batch_id_changes_at_window_boundary() {
        assert_ne!(batch_id(at_millis(59_999)), batch_id(at_millis(60_000)));
        assert_eq!(batch_id(at_millis(60_000)), "batch-1");
    }

    #[test]
    fn batch_id_format() {
        assert_eq!(batch_id(at_millis(0)), "batch-0");
        assert_eq!(batch_id(at_millis(61_000)), "batch-1");
    }

    #[test]
    fn processing_message_wire_format() {
        let msg: ProcessingMessage = serde_json::from_str(
            r#"{"data":{"x":1},"sourceFile":"input/a.jsonl","timestamp":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(msg.source_file, "input/a.jsonl");
        // retryCount defaults to zero when absent.
        assert_eq!(msg.retry_count, 0);

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["retryCount"], serde_json::json!(0));
        assert_eq!(json["timestamp"], serde_json::json!(1_700_000_000_000i64));
    }

    #[test]
    fn result_message_group_key() {
        let msg = ResultMessage {
            result: serde_json::json!({"ok": true}),
            source_file: "input/a.jsonl".to_string(),
            timestamp: at_millis(0),
            batch_id: "batch-7".to_string(),
        };
        assert_eq!(msg.group_key(), "input/a.jsonl-batch-7");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["batchId"], serde_json::json!("batch-7"));
    }
}
