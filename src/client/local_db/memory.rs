//! In-process durable store
//!
//! Keeps records in a `BTreeMap` per namespace. Nothing survives a restart;
//! this backs tests and queues that are allowed to lose state.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{DurableStore, Namespace, Result};

/// Memory-backed store
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<Namespace, BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a namespace
    pub async fn len(&self, namespace: Namespace) -> usize {
        self.namespaces
            .read()
            .await
            .get(&namespace)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces.get(&namespace).and_then(|records| records.get(key).cloned()))
    }

    async fn set(&self, namespace: Namespace, key: &str, value: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(namespace)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write().await;
        Ok(namespaces
            .get_mut(&namespace)
            .map_or(false, |records| records.remove(key).is_some()))
    }

    async fn keys(&self, namespace: Namespace) -> Result<Vec<String>> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(&namespace)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn values(&self, namespace: Namespace) -> Result<Vec<String>> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(&namespace)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}
