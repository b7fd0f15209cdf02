//! Result aggregator: per-delivery grouping with threshold flushes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::intake::{INPUT_PREFIX, JSONL_SUFFIX};
use crate::message::ResultMessage;
use crate::store::{BlobStore, StoreError};

/// Group size at which a flush happens mid-delivery.
pub const FLUSH_THRESHOLD: usize = 100;

pub const OUTPUT_PREFIX: &str = "output/";

/// Output key for a group: `input/<stem>.jsonl` becomes
/// `output/<stem>-<batchId>.jsonl`.
pub fn output_key(source_file: &str, batch_id: &str) -> String {
    let stem = source_file
        .strip_prefix(INPUT_PREFIX)
        .unwrap_or(source_file);
    let stem = stem.strip_suffix(JSONL_SUFFIX).unwrap_or(stem);
    format!("{OUTPUT_PREFIX}{stem}-{batch_id}{JSONL_SUFFIX}")
}

/// What one delivered group produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Groups flushed mid-delivery on reaching the threshold.
    pub full_flushes: usize,
    /// Residual groups flushed at end of delivery.
    pub partial_flushes: usize,
    /// Flushes whose storage put failed (absorbed, not retried).
    pub failed_flushes: usize,
}

pub struct ResultAggregator {
    store: Arc<dyn BlobStore>,
    flush_threshold: usize,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            flush_threshold: FLUSH_THRESHOLD,
        }
    }

    pub fn with_flush_threshold(mut self, flush_threshold: usize) -> Self {
        self.flush_threshold = flush_threshold;
        self
    }

    /// Consume one delivered group of result messages.
    ///
    /// Messages are grouped by `(sourceFile, batchId)` in delivery order.
    /// A group reaching the threshold is flushed immediately and removed,
    /// so a later burst for the same key starts fresh within the same
    /// delivery; every residual group is flushed, whatever its size, once
    /// the delivery is consumed. Grouping state does not survive the call:
    /// a logical batch spanning deliveries fragments into separate
    /// (mutually overwriting) output writes by design.
    ///
    /// Flush failures are logged and absorbed; the caller acknowledges the
    /// whole delivery regardless.
    pub async fn process_delivery(&self, messages: Vec<ResultMessage>) -> FlushReport {
        let mut groups: HashMap<String, Vec<ResultMessage>> = HashMap::new();
        let mut report = FlushReport::default();

        for message in messages {
            let key = message.group_key();
            let group = groups.entry(key.clone()).or_default();
            group.push(message);

            if group.len() >= self.flush_threshold {
                let group = groups.remove(&key).unwrap_or_default();
                match self.flush(&group).await {
                    Ok(()) => report.full_flushes += 1,
                    Err(e) => {
                        tracing::error!(group = %key, error = %e, "failed to save result batch");
                        report.failed_flushes += 1;
                    }
                }
            }
        }

        for (key, group) in groups {
            match self.flush(&group).await {
                Ok(()) => report.partial_flushes += 1,
                Err(e) => {
                    tracing::error!(group = %key, error = %e, "failed to save result batch");
                    report.failed_flushes += 1;
                }
            }
        }

        report
    }

    /// Write one group as newline-joined JSON in a single overwriting put.
    async fn flush(&self, group: &[ResultMessage]) -> Result<(), StoreError> {
        let Some(first) = group.first() else {
            return Ok(());
        };
        let key = output_key(&first.source_file, &first.batch_id);
        let content = group
            .iter()
            .map(|msg| msg.result.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        self.store.put(&key, content.into_bytes()).await?;
        tracing::info!(key = %key, lines = group.len(), "saved result batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::store::MemoryStore;

    fn result(source_file: &str, batch_id: &str, n: usize) -> ResultMessage {
        ResultMessage {
            result: serde_json::json!({"n": n}),
            source_file: source_file.to_string(),
            timestamp: Utc::now(),
            batch_id: batch_id.to_string(),
        }
    }

    fn results(source_file: &str, batch_id: &str, count: usize) -> Vec<ResultMessage> {
        (0..count).map(|n| result(source_file, batch_id, n)).collect()
    }

    async fn output_lines(store: &MemoryStore, key: &str) -> Vec<String> {
        let bytes = store.get(key).await.unwrap().unwrap();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| line.to_string())
            .collect()
    }

    #[test]
    fn output_key_maps_prefix_and_suffix() {
        assert_eq!(
            output_key("input/a.jsonl", "batch-123"),
            "output/a-batch-123.jsonl"
        );
        assert_eq!(
            output_key("input/nested/b.jsonl", "batch-0"),
            "output/nested/b-batch-0.jsonl"
        );
    }

    #[tokio::test]
    async fn small_delivery_gets_one_partial_flush() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = ResultAggregator::new(Arc::clone(&store) as Arc<dyn BlobStore>);

        let report = aggregator
            .process_delivery(results("input/a.jsonl", "batch-1", 3))
            .await;

        assert_eq!(
            report,
            FlushReport {
                full_flushes: 0,
                partial_flushes: 1,
                failed_flushes: 0
            }
        );
        let lines = output_lines(&store, "output/a-batch-1.jsonl").await;
        assert_eq!(lines.len(), 3);
        // Insertion order within the group is preserved.
        assert_eq!(lines[0], r#"{"n":0}"#);
        assert_eq!(lines[2], r#"{"n":2}"#);
    }

    #[tokio::test]
    async fn threshold_delivery_flushes_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = ResultAggregator::new(Arc::clone(&store) as Arc<dyn BlobStore>);

        let report = aggregator
            .process_delivery(results("input/a.jsonl", "batch-1", FLUSH_THRESHOLD))
            .await;

        // The flush fires as the 100th message is appended; nothing is
        // left over for the partial pass.
        assert_eq!(report.full_flushes, 1);
        assert_eq!(report.partial_flushes, 0);
        let lines = output_lines(&store, "output/a-batch-1.jsonl").await;
        assert_eq!(lines.len(), FLUSH_THRESHOLD);
    }

    #[tokio::test]
    async fn second_burst_for_same_key_starts_fresh_and_replaces() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = ResultAggregator::new(Arc::clone(&store) as Arc<dyn BlobStore>)
            .with_flush_threshold(100);

        let report = aggregator
            .process_delivery(results("input/a.jsonl", "batch-1", 150))
            .await;

        assert_eq!(report.full_flushes, 1);
        assert_eq!(report.partial_flushes, 1);
        // The partial flush of the residual 50 overwrites the full flush
        // at the same output key; a put replaces, it does not merge.
        let lines = output_lines(&store, "output/a-batch-1.jsonl").await;
        assert_eq!(lines.len(), 50);
    }

    #[tokio::test]
    async fn groups_are_keyed_by_source_file_and_batch_id() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = ResultAggregator::new(Arc::clone(&store) as Arc<dyn BlobStore>);

        let mut delivery = results("input/a.jsonl", "batch-1", 2);
        delivery.extend(results("input/a.jsonl", "batch-2", 1));
        delivery.extend(results("input/b.jsonl", "batch-1", 1));

        let report = aggregator.process_delivery(delivery).await;
        assert_eq!(report.partial_flushes, 3);

        assert_eq!(output_lines(&store, "output/a-batch-1.jsonl").await.len(), 2);
        assert_eq!(output_lines(&store, "output/a-batch-2.jsonl").await.len(), 1);
        assert_eq!(output_lines(&store, "output/b-batch-1.jsonl").await.len(), 1);
    }

    #[tokio::test]
    async fn empty_delivery_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = ResultAggregator::new(Arc::clone(&store) as Arc<dyn BlobStore>);

        let report = aggregator.process_delivery(Vec::new()).await;
        assert_eq!(report, FlushReport::default());
        assert!(store.list("output/").await.unwrap().is_empty());
    }

    struct FailingStore;

    #[async_trait]
    impl BlobStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Backend("down".to_string()))
        }
        async fn put(&self, _key: &str, _bytes: Vec<u8>) -> Result<(), StoreError> {
            Err(StoreError::Backend("down".to_string()))
        }
        async fn list(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Backend("down".to_string()))
        }
    }

    #[tokio::test]
    async fn flush_failure_is_absorbed() {
        let aggregator = ResultAggregator::new(Arc::new(FailingStore));

        // Returns normally; the caller acks the delivery either way.
        let report = aggregator
            .process_delivery(results("input/a.jsonl", "batch-1", 3))
            .await;
        assert_eq!(report.failed_flushes, 1);
        assert_eq!(report.partial_flushes, 0);
    }
}
