//! Typed record access
//!
//! [`Records`] binds one namespace of a [`DurableStore`] to a record type and
//! handles the JSON encoding. Keys are record ids.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use super::{DurableStore, Namespace, Result};

/// JSON records of type `T` stored in one namespace
#[derive(Debug)]
pub struct Records<T> {
    store: Arc<dyn DurableStore>,
    namespace: Namespace,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Records<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace,
            _record: PhantomData,
        }
    }
}

impl<T> Records<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn DurableStore>, namespace: Namespace) -> Self {
        Self {
            store,
            namespace,
            _record: PhantomData,
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Load a record; a malformed record is an error
    pub async fn get(&self, id: &Uuid) -> Result<Option<T>> {
        match self.store.get(self.namespace, &id.to_string()).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a record
    pub async fn put(&self, id: &Uuid, record: &T) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.store.set(self.namespace, &id.to_string(), &raw).await
    }

    pub async fn remove(&self, id: &Uuid) -> Result<bool> {
        self.store.remove(self.namespace, &id.to_string()).await
    }

    /// Load every record in the namespace
    ///
    /// Records that fail to decode are skipped with a warning so one corrupt
    /// entry cannot wedge the whole queue.
    pub async fn all(&self) -> Result<Vec<T>> {
        let values = self.store.values(self.namespace).await?;
        let mut records = Vec::with_capacity(values.len());
        for raw in values {
            match serde_json::from_str(&raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("[Store] Skipping malformed record in {}: {}", self.namespace, e);
                }
            }
        }
        Ok(records)
    }
}
