//! Line processor: inference with bounded resubmission.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::annotator::{AnnotateError, Annotator};
use crate::message::{ProcessingMessage, ResultMessage, batch_id};
use crate::queue::Queue;
use crate::stats::{StatsDelta, StatsHandle};

/// Resubmission bound. A message is attempted at most `MAX_RETRIES + 1`
/// times before it is surfaced as a terminal failure.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Inference kept failing past the retry bound. The message is not
    /// resubmitted; the queue layer's redelivery accounting takes over.
    #[error("annotation failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: AnnotateError,
    },
}

/// Locally absorbed outcomes of processing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Annotation succeeded; a result message was forwarded.
    Forwarded,
    /// Annotation failed; the message was resubmitted with this retry count.
    Requeued { retry_count: u32 },
}

pub struct LineProcessor {
    annotator: Arc<dyn Annotator>,
    processing: Queue<ProcessingMessage>,
    results: Queue<ResultMessage>,
    stats: StatsHandle,
    max_retries: u32,
}

impl LineProcessor {
    pub fn new(
        annotator: Arc<dyn Annotator>,
        processing: Queue<ProcessingMessage>,
        results: Queue<ResultMessage>,
        stats: StatsHandle,
    ) -> Self {
        Self {
            annotator,
            processing,
            results,
            stats,
            max_retries: MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Run one message through the annotator.
    ///
    /// Success forwards a result message (batch id from the moment of
    /// success) and reports the processed count and time sample to the
    /// stats actor in one combined update. Failure reports a failed
    /// request, then resubmits with an incremented retry count while under
    /// the bound. Stats reporting is best-effort and never changes the
    /// outcome.
    pub async fn process(&self, msg: ProcessingMessage) -> Result<ProcessOutcome, ProcessError> {
        let started = Instant::now();
        match self.annotator.annotate(&msg.data).await {
            Ok(result) => {
                let sample_ms = started.elapsed().as_secs_f64() * 1000.0;
                let now = Utc::now();
                self.results.send(ResultMessage {
                    result,
                    source_file: msg.source_file,
                    timestamp: now,
                    batch_id: batch_id(now),
                });
                self.stats.record(StatsDelta {
                    total_processed: Some(1),
                    average_processing_time: Some(sample_ms),
                    ..Default::default()
                });
                Ok(ProcessOutcome::Forwarded)
            }
            Err(e) => {
                self.stats.record(StatsDelta {
                    failed_requests: Some(1),
                    ..Default::default()
                });

                if msg.retry_count < self.max_retries {
                    let retry_count = msg.retry_count + 1;
                    tracing::warn!(
                        file = %msg.source_file,
                        retry_count,
                        error = %e,
                        "annotation failed, resubmitting"
                    );
                    self.processing.send(ProcessingMessage {
                        retry_count,
                        timestamp: Utc::now(),
                        ..msg
                    });
                    Ok(ProcessOutcome::Requeued { retry_count })
                } else {
                    let attempts = msg.retry_count + 1;
                    tracing::error!(
                        file = %msg.source_file,
                        attempts,
                        error = %e,
                        "annotation failed, giving up"
                    );
                    Err(ProcessError::RetriesExhausted {
                        attempts,
                        last_error: e,
                    })
                }
            }
        }
    }
}
