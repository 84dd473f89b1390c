//! # Operation Dispatch
//!
//! Routes a sync operation to the handler registered for its kind. A handler
//! either returns normally or reports a classified failure:
//!
//! - [`HandlerError::Transient`]: network unreachable, 5xx, timeout. Drives
//!   the backoff state machine.
//! - [`HandlerError::Permanent`]: validation failure, malformed payload. The
//!   operation fails immediately instead of burning its retry budget.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::shared::operation::{OperationKind, SyncOperation};

/// Classified handler failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Worth retrying after a backoff delay
    #[error("transient failure: {0}")]
    Transient(String),

    /// Will never succeed as sent
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// Executes one kind of sync operation against the server
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn execute(&self, operation: &SyncOperation) -> Result<(), HandlerError>;
}

/// Handler lookup keyed by operation kind
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<OperationKind, Arc<dyn OperationHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `kind`
    pub fn register(&mut self, kind: OperationKind, handler: Arc<dyn OperationHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Builder-style registration
    pub fn with(mut self, kind: OperationKind, handler: Arc<dyn OperationHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    /// Use one handler for every kind
    pub fn with_all(mut self, handler: Arc<dyn OperationHandler>) -> Self {
        for kind in OperationKind::ALL {
            self.register(kind, Arc::clone(&handler));
        }
        self
    }

    pub fn contains(&self, kind: OperationKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Execute `operation` with its registered handler
    ///
    /// A kind with no handler can never succeed, so it is a permanent failure.
    pub async fn dispatch(&self, operation: &SyncOperation) -> Result<(), HandlerError> {
        let kind = operation.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| HandlerError::permanent(format!("no handler registered for {}", kind)))?;
        handler.execute(operation).await
    }
}
