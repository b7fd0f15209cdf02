//! Blob storage boundary.
//!
//! The pipeline only needs key -> bytes get/put; `list` exists for the
//! debug surface and tests. Output puts overwrite whatever is at the key.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch a blob. `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a blob, replacing any existing object at `key`.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// In-memory store backing the single-process deployment and the tests.
#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.objects.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_absent_key_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("input/missing.jsonl").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        store.put("input/a.jsonl", b"hello".to_vec()).await.unwrap();
        assert_eq!(
            store.get("input/a.jsonl").await.unwrap(),
            Some(b"hello".to_vec())
        );
    }

    #[tokio::test]
    async fn put_replaces_existing_object() {
        let store = MemoryStore::new();
        store.put("output/a.jsonl", b"first".to_vec()).await.unwrap();
        store.put("output/a.jsonl", b"second".to_vec()).await.unwrap();
        assert_eq!(
            store.get("output/a.jsonl").await.unwrap(),
            Some(b"second".to_vec())
        );
    }

    #[tokio::test]
    async fn list_filters_by_prefix_sorted() {
        let store = MemoryStore::new();
        store.put("output/b.jsonl", vec![]).await.unwrap();
        store.put("output/a.jsonl", vec![]).await.unwrap();
        store.put("input/c.jsonl", vec![]).await.unwrap();

        assert_eq!(
            store.list("output/").await.unwrap(),
            vec!["output/a.jsonl".to_string(), "output/b.jsonl".to_string()]
        );
    }
}
