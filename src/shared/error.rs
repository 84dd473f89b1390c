//! Shared Error Types
//!
//! Errors that cross module boundaries inside the queue.
//!
//! # Error Categories
//!
//! - `StoreError` - durable store failures (SQLite, filesystem, record encoding)
//! - `QueueError` - failures surfaced by the enqueue, query and maintenance APIs
//!
//! Handler, analysis and template errors live next to the code that produces
//! them and convert into `QueueError` where they reach a caller.
//!
//! # Usage
//!
//! ```rust
//! use syncq::shared::error::QueueError;
//! use uuid::Uuid;
//!
//! let error = QueueError::not_found("analysis job", Uuid::nil());
//! assert!(error.to_string().contains("analysis job"));
//! ```
use thiserror::Error;
use uuid::Uuid;

use crate::client::offline::template::TemplateError;
use crate::shared::config::ConfigError;

/// Durable store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error (creating the database directory)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded
    #[error("record encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by the queue's public API
#[derive(Debug, Error)]
pub enum QueueError {
    /// Durability could not be guaranteed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record is missing from its namespace
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Human-readable record kind
        kind: &'static str,
        /// Record identifier
        id: Uuid,
    },

    /// Operation not allowed in the current lifecycle state
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable error message
        message: String,
    },

    /// Payload template could not be rendered
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QueueError {
    /// Create a new not-found error
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        Self::NotFound { kind, id }
    }

    /// Create a new invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(StoreError::Serialization(err))
    }
}
