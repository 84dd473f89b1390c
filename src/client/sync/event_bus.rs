//! Queue Event Bus
//!
//! In-process publish/subscribe for queue lifecycle events. Two ways to
//! listen:
//!
//! - [`EventBus::on`] registers a synchronous callback for one event kind.
//!   Callbacks run on the emitting task, in registration order.
//! - [`EventBus::subscribe`] returns a `tokio::sync::broadcast` receiver that
//!   sees every event, for async consumers such as a UI bridge.
//!
//! A callback that returns an error or panics is logged and skipped; the
//! remaining callbacks still run and the emitting operation never sees the
//! failure.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::shared::event::{EventKind, QueueEvent};

/// Default capacity of the broadcast channel
const BROADCAST_CAPACITY: usize = 1024;

/// Error returned by a subscriber callback
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EventHandlerError {
    message: String,
}

impl EventHandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Subscriber callback
pub type EventHandler = Arc<dyn Fn(&QueueEvent) -> Result<(), EventHandlerError> + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Lifecycle event bus
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
    broadcast_tx: broadcast::Sender<QueueEvent>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let counts: HashMap<_, _> = handlers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus")
            .field("handlers", &counts)
            .field("receivers", &self.broadcast_tx.receiver_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            broadcast_tx,
        }
    }

    /// Register a callback for one event kind
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) -> Result<(), EventHandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry(kind).or_default().push((id, Arc::new(handler)));
        id
    }

    /// Remove a callback; returns whether it was registered
    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        match handlers.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                before != list.len()
            }
            None => false,
        }
    }

    /// Receive every event asynchronously
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.broadcast_tx.subscribe()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Drop every callback; broadcast receivers stay attached
    pub fn clear(&self) {
        self.handlers.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Deliver an event to all subscribers
    ///
    /// Returns the number of callbacks that completed successfully.
    pub(crate) fn emit(&self, event: QueueEvent) -> usize {
        let kind = event.kind();
        // Snapshot so callbacks may call on/off without deadlocking
        let handlers: Vec<(SubscriptionId, EventHandler)> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(&kind).cloned().unwrap_or_default()
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::error!("[EventBus] Subscriber {:?} failed on {}: {}", id, kind, e);
                }
                Err(_) => {
                    tracing::error!("[EventBus] Subscriber {:?} panicked on {}", id, kind);
                }
            }
        }

        if let Err(e) = self.broadcast_tx.send(event) {
            tracing::trace!("[EventBus] No receivers for {}: {:?}", kind, e.0.kind());
        }

        delivered
    }
}
