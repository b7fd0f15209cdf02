//! Intake splitter: one blob in, one processing message per parseable line.
//!
//! Also hosts the upload trigger that turns storage-provider notifications
//! into file-intake messages.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::message::{FileIntakeMessage, ProcessingMessage};
use crate::queue::Queue;
use crate::store::{BlobStore, StoreError};

pub const INPUT_PREFIX: &str = "input/";
pub const JSONL_SUFFIX: &str = ".jsonl";

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// The referenced blob does not exist. The whole intake message fails;
    /// no processing messages were emitted.
    #[error("file not found: {0}")]
    Missing(String),

    #[error("file {0} is not valid UTF-8")]
    Encoding(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Upload notification from the storage provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEvent {
    #[serde(rename = "type")]
    pub kind: UploadEventKind,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadEventKind {
    Upload,
    Delete,
}

/// Turn a storage event into a file-intake message.
///
/// Only uploads of `input/*.jsonl` keys are queued; everything else is
/// ignored. Returns whether a message was enqueued.
pub fn handle_upload_event(event: &UploadEvent, intake: &Queue<FileIntakeMessage>) -> bool {
    if event.kind != UploadEventKind::Upload
        || !event.key.starts_with(INPUT_PREFIX)
        || !event.key.ends_with(JSONL_SUFFIX)
    {
        return false;
    }

    tracing::info!(key = %event.key, "queueing file for processing");
    intake.send(FileIntakeMessage {
        file: event.key.clone(),
        timestamp: Utc::now(),
    })
}

/// What one intake delivery produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IntakeReport {
    /// Processing messages emitted, one per parseable line.
    pub emitted: usize,
    /// Lines skipped because they were not valid JSON.
    pub skipped: usize,
}

/// Fetch the referenced blob and emit one processing message per parseable
/// line.
///
/// Lines that fail to parse are logged and skipped without failing the
/// message. A fetch failure fails the whole message with nothing emitted;
/// the queue layer's redelivery policy takes it from there. Emitted
/// messages carry a fresh timestamp, not the intake message's.
pub async fn split_file(
    store: &dyn BlobStore,
    msg: &FileIntakeMessage,
    processing: &Queue<ProcessingMessage>,
) -> Result<IntakeReport, IntakeError> {
    let bytes = store
        .get(&msg.file)
        .await?
        .ok_or_else(|| IntakeError::Missing(msg.file.clone()))?;
    let content =
        String::from_utf8(bytes).map_err(|_| IntakeError::Encoding(msg.file.clone()))?;

    let mut report = IntakeReport::default();
    for line in content.trim_end_matches('\n').split('\n') {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(data) => {
                processing.send(ProcessingMessage {
                    data,
                    source_file: msg.file.clone(),
                    timestamp: Utc::now(),
                    retry_count: 0,
                });
                report.emitted += 1;
            }
            Err(e) => {
                tracing::warn!(file = %msg.file, error = %e, "skipping unparseable line");
                report.skipped += 1;
            }
        }
    }

    tracing::info!(
        file = %msg.file,
        emitted = report.emitted,
        skipped = report.skipped,
        "split intake file"
    );
    Ok(report)
}
