//! Serialized statistics counter.
//!
//! A single snapshot owned by one spawned task; every read and write goes
//! through the mailbox, so updates apply one at a time with no
//! partial-update visibility. The handle is the only access path.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_processed: u64,
    pub failed_requests: u64,
    /// Running mean of processing-time samples, in milliseconds.
    pub average_processing_time: f64,
    /// Last-known queue depths, keyed by queue name.
    pub queue_depths: HashMap<String, usize>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
}

impl StatsSnapshot {
    pub fn zeroed() -> Self {
        Self {
            total_processed: 0,
            failed_requests: 0,
            average_processing_time: 0.0,
            queue_depths: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Apply one delta, steps in protocol order: totals first, then the
    /// running average folded against the post-increment total, then a
    /// per-key overwrite merge of queue depths.
    pub fn apply(&mut self, delta: &StatsDelta) {
        if let Some(n) = delta.total_processed {
            self.total_processed += n;
        }
        if let Some(n) = delta.failed_requests {
            self.failed_requests += n;
        }
        if let Some(sample) = delta.average_processing_time {
            let n = self.total_processed;
            if n == 0 {
                // Caller contract: an average sample always rides with a
                // totalProcessed increment of at least one.
                tracing::error!("average sample with zero processed total, dropping");
            } else {
                self.average_processing_time =
                    (self.average_processing_time * (n - 1) as f64 + sample) / n as f64;
            }
        }
        if let Some(ref depths) = delta.queue_depths {
            for (name, depth) in depths {
                self.queue_depths.insert(name.clone(), *depth);
            }
        }
        self.last_updated = Utc::now();
    }
}

/// Partial update accepted by the actor. Absent fields leave their
/// counterpart untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_requests: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depths: Option<HashMap<String, usize>>,
}

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("stats actor unavailable")]
    Unavailable,
}

enum StatsRequest {
    Query {
        reply: oneshot::Sender<StatsSnapshot>,
    },
    Update {
        delta: StatsDelta,
        reply: oneshot::Sender<StatsSnapshot>,
    },
}

/// Mailbox handle to the stats actor.
#[derive(Clone)]
pub struct StatsHandle {
    tx: mpsc::UnboundedSender<StatsRequest>,
}

/// Spawn the stats actor with a zeroed snapshot.
///
/// The actor lives until every handle is dropped (or the task is aborted);
/// the snapshot resets only with the process.
pub fn spawn() -> (StatsHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let join = tokio::spawn(run_actor(rx));
    (StatsHandle { tx }, join)
}

async fn run_actor(mut rx: mpsc::UnboundedReceiver<StatsRequest>) {
    let mut snapshot = StatsSnapshot::zeroed();
    while let Some(request) = rx.recv().await {
        match request {
            StatsRequest::Query { reply } => {
                let _ = reply.send(snapshot.clone());
            }
            StatsRequest::Update { delta, reply } => {
                snapshot.apply(&delta);
                let _ = reply.send(snapshot.clone());
            }
        }
    }
    tracing::debug!("stats actor exiting");
}

impl StatsHandle {
    /// Current snapshot, verbatim.
    pub async fn query(&self) -> Result<StatsSnapshot, StatsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StatsRequest::Query { reply })
            .map_err(|_| StatsError::Unavailable)?;
        rx.await.map_err(|_| StatsError::Unavailable)
    }

    /// Apply a delta and return the post-update snapshot.
    pub async fn update(&self, delta: StatsDelta) -> Result<StatsSnapshot, StatsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StatsRequest::Update { delta, reply })
            .map_err(|_| StatsError::Unavailable)?;
        rx.await.map_err(|_| StatsError::Unavailable)
    }

    /// Best-effort update: a failure to reach the actor is logged and
    /// swallowed, never surfaced to the caller.
    pub fn record(&self, delta: StatsDelta) {
        let (reply, _rx) = oneshot::channel();
        if self.tx.send(StatsRequest::Update { delta, reply }).is_err() {
            tracing::warn!("stats actor unavailable, dropping update");
        }
    }
}
