//! Object storage adapter contract (spec.md section 4.2). No
//! semantics beyond blob get/put/list/delete/exists and a signed URL;
//! the core assumes the adapter can reach >=1 Gbps aggregate
//! throughput given enough parallelism, which is why [`put_parallel`]
//! / [`get_parallel`] exist as default multipart helpers.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String>;
}

/// Parallel multipart upload of several independent blobs. Adapters
/// that back onto a provider SDK with native multipart upload should
/// override the single-blob [`ObjectStore::put`] path instead; this
/// helper parallelizes across *blobs*, which is what the
/// SnapshotEngine needs when pushing many content-addressed parts at
/// once.
pub async fn put_parallel<S: ObjectStore + ?Sized>(
    store: &S,
    items: Vec<(String, Vec<u8>)>,
    max_concurrency: usize,
) -> Result<()> {
    use futures::stream::{self, StreamExt};

    let results: Vec<Result<()>> = stream::iter(items)
        .map(|(key, data)| async move { store.put(&key, data).await })
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

    for r in results {
        r?;
    }
    Ok(())
}

pub async fn get_parallel<S: ObjectStore + ?Sized>(
    store: &S,
    keys: Vec<String>,
    max_concurrency: usize,
) -> Result<Vec<(String, Vec<u8>)>> {
    use futures::stream::{self, StreamExt};

    let results: Vec<Result<(String, Vec<u8>)>> = stream::iter(keys)
        .map(|key| async move {
            let data = store.get(&key).await?;
            Ok((key, data))
        })
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

    let mut out = Vec::with_capacity(results.len());
    for r in results {
        out.push(r?);
    }
    Ok(out)
}

/// In-memory object store used by tests and as a reference adapter.
#[derive(Default)]
pub struct InMemoryObjectStore {
    blobs: dashmap::DashMap<String, Vec<u8>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.blobs.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .get(key)
            .map(|v| v.clone())
            .ok_or_else(|| Error::ObjectStoreError {
                operation: "get".into(),
                key: key.to_string(),
                cause: "not found".into(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.contains_key(key))
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String> {
        Ok(format!("mem://{key}?ttl={}", ttl.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = InMemoryObjectStore::new();
        store.put("a/b", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), vec![1, 2, 3]);
        assert!(store.exists("a/b").await.unwrap());
        assert!(!store.exists("a/c").await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let store = InMemoryObjectStore::new();
        store.put("snapshots/1/manifest.json", vec![]).await.unwrap();
        store.put("snapshots/2/manifest.json", vec![]).await.unwrap();
        store.put("other/x", vec![]).await.unwrap();
        let mut keys = store.list("snapshots/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["snapshots/1/manifest.json", "snapshots/2/manifest.json"]);
    }

    #[tokio::test]
    async fn parallel_put_and_get_roundtrip() {
        let store = InMemoryObjectStore::new();
        let items: Vec<_> = (0..8).map(|i| (format!("k{i}"), vec![i as u8])).collect();
        put_parallel(&store, items, 4).await.unwrap();

        let keys: Vec<_> = (0..8).map(|i| format!("k{i}")).collect();
        let fetched = get_parallel(&store, keys, 4).await.unwrap();
        assert_eq!(fetched.len(), 8);
    }

    #[tokio::test]
    async fn delete_then_get_errors() {
        let store = InMemoryObjectStore::new();
        store.put("x", vec![9]).await.unwrap();
        store.delete("x").await.unwrap();
        assert!(store.get("x").await.is_err());
    }
}
