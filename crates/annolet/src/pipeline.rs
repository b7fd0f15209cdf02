//! Pipeline wiring: queues, consumer loops, shutdown.
//!
//! Three consumer loops run as spawned tasks, one per queue, each a unit
//! of work at a time. Intake and processing consumers ack per message and
//! fail-for-redelivery on propagated errors; the results consumer drains a
//! delivered group and acknowledges it whole, whatever the flush outcomes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::aggregator::{FLUSH_THRESHOLD, ResultAggregator};
use crate::annotator::Annotator;
use crate::intake::{self, UploadEvent};
use crate::message::{FileIntakeMessage, ProcessingMessage, ResultMessage};
use crate::processor::{LineProcessor, MAX_RETRIES};
use crate::queue::{Queue, QueueReceiver, queue};
use crate::stats::{self, StatsHandle};
use crate::store::BlobStore;

pub const INTAKE_QUEUE: &str = "intake";
pub const PROCESSING_QUEUE: &str = "processing";
pub const RESULTS_QUEUE: &str = "results";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Application-level resubmission bound for failed annotations.
    pub max_retries: u32,
    /// Group size at which the aggregator flushes mid-delivery.
    pub flush_threshold: usize,
    /// Upper bound on one delivered group from the results queue.
    pub results_group_max: usize,
    /// How long the results consumer lingers after the first message so a
    /// burst lands in one delivered group.
    pub results_linger: Duration,
    /// Queue-level deliveries per message before it is dropped.
    pub queue_max_deliveries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            flush_threshold: FLUSH_THRESHOLD,
            results_group_max: 256,
            results_linger: Duration::from_millis(250),
            queue_max_deliveries: 5,
        }
    }
}

/// Running pipeline: the three queues, their consumer tasks, and the stats
/// actor.
pub struct Pipeline {
    intake: Queue<FileIntakeMessage>,
    processing: Queue<ProcessingMessage>,
    results: Queue<ResultMessage>,
    stats: StatsHandle,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats_join: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    /// Build the queues, spawn the stats actor and the three consumer
    /// loops.
    pub fn start(
        store: Arc<dyn BlobStore>,
        annotator: Arc<dyn Annotator>,
        config: PipelineConfig,
    ) -> Self {
        let (intake, intake_rx) = queue(INTAKE_QUEUE, config.queue_max_deliveries);
        let (processing, processing_rx) = queue(PROCESSING_QUEUE, config.queue_max_deliveries);
        let (results, results_rx) = queue(RESULTS_QUEUE, config.queue_max_deliveries);
        let (stats, stats_join) = stats::spawn();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let processor = LineProcessor::new(
            annotator,
            processing.clone(),
            results.clone(),
            stats.clone(),
        )
        .with_max_retries(config.max_retries);
        let aggregator =
            ResultAggregator::new(Arc::clone(&store)).with_flush_threshold(config.flush_threshold);

        let tasks = vec![
            tokio::spawn(intake_loop(
                store,
                intake_rx,
                processing.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(processing_loop(processor, processing_rx, shutdown_rx.clone())),
            tokio::spawn(results_loop(
                aggregator,
                results_rx,
                config.results_group_max,
                config.results_linger,
                shutdown_rx,
            )),
        ];

        Self {
            intake,
            processing,
            results,
            stats,
            shutdown_tx,
            tasks: Mutex::new(tasks),
            stats_join: Mutex::new(Some(stats_join)),
        }
    }

    pub fn stats(&self) -> &StatsHandle {
        &self.stats
    }

    /// Live lengths of the three queues, keyed by queue name.
    pub fn queue_depths(&self) -> HashMap<String, usize> {
        HashMap::from([
            (self.intake.name().to_string(), self.intake.len()),
            (self.processing.name().to_string(), self.processing.len()),
            (self.results.name().to_string(), self.results.len()),
        ])
    }

    /// Feed a storage upload notification into the intake queue. Returns
    /// whether a file-intake message was enqueued.
    pub fn notify_upload(&self, event: &UploadEvent) -> bool {
        intake::handle_upload_event(event, &self.intake)
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Signal the consumer loops to stop, wait for them, then stop the
    /// stats actor. Later calls find nothing left to join and return
    /// immediately.
    pub async fn shutdown(&self) {
        self.trigger_shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "pipeline task ended abnormally");
                }
            }
        }
        // The pipeline's own handle keeps the actor mailbox open, so the
        // actor never drains out on its own; it holds only in-memory
        // counters and is stopped outright.
        if let Some(stats_task) = self.stats_join.lock().await.take() {
            stats_task.abort();
            let _ = stats_task.await;
        }
    }
}

async fn intake_loop(
    store: Arc<dyn BlobStore>,
    mut rx: QueueReceiver<FileIntakeMessage>,
    processing: Queue<ProcessingMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            delivery = rx.recv() => {
                let Some(delivery) = delivery else { break };
                match intake::split_file(store.as_ref(), &delivery.body, &processing).await {
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(
                            file = %delivery.body.file,
                            error = %e,
                            "intake failed, requeueing for redelivery"
                        );
                        rx.queue().redeliver(delivery);
                    }
                }
            }
        }
    }
    tracing::debug!("intake consumer exiting");
}

async fn processing_loop(
    processor: LineProcessor,
    mut rx: QueueReceiver<ProcessingMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            delivery = rx.recv() => {
                let Some(delivery) = delivery else { break };
                // Requeued/Forwarded are absorbed acks; only a terminal
                // failure goes back to the queue layer.
                match processor.process(delivery.body.clone()).await {
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(
                            file = %delivery.body.source_file,
                            error = %e,
                            "processing failed terminally, requeueing for redelivery"
                        );
                        rx.queue().redeliver(delivery);
                    }
                }
            }
        }
    }
    tracing::debug!("processing consumer exiting");
}

async fn results_loop(
    aggregator: ResultAggregator,
    mut rx: QueueReceiver<ResultMessage>,
    group_max: usize,
    linger: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            first = rx.recv() => {
                let Some(first) = first else { break };

                // Linger so a burst of results forms one delivered group.
                tokio::time::sleep(linger).await;

                let mut group = Vec::with_capacity(group_max.min(64));
                group.push(first.body);
                group.extend(rx.drain(group_max.saturating_sub(1)).into_iter().map(|d| d.body));

                let report = aggregator.process_delivery(group).await;
                // Whole-group ack: flush failures were already absorbed.
                tracing::debug!(
                    full = report.full_flushes,
                    partial = report.partial_flushes,
                    failed = report.failed_flushes,
                    "results delivery acknowledged"
                );
            }
        }
    }
    tracing::debug!("results consumer exiting");
}
