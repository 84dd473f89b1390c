//! Test stores

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use syncq::client::local_db::{DurableStore, MemoryStore, Namespace};
use syncq::shared::StoreError;

/// Memory store that refuses a number of writes containing a marker
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryStore,
    marker: String,
    failures_left: AtomicUsize,
}

impl FlakyStore {
    /// Fail the next `times` writes whose encoded record contains `marker`
    pub fn failing_writes(marker: &str, times: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            marker: marker.to_string(),
            failures_left: AtomicUsize::new(times),
        }
    }

    pub fn failures_left(&self) -> usize {
        self.failures_left.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(namespace, key).await
    }

    async fn set(&self, namespace: Namespace, key: &str, value: &str) -> Result<(), StoreError> {
        if value.contains(&self.marker)
            && self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.set(namespace, key, value).await
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<bool, StoreError> {
        self.inner.remove(namespace, key).await
    }

    async fn keys(&self, namespace: Namespace) -> Result<Vec<String>, StoreError> {
        self.inner.keys(namespace).await
    }
}
