//! syncq - Offline-First Operation Queue
//!
//! Lets a client keep working while disconnected and reconciles with the
//! server once connectivity returns.
//!
//! # Overview
//!
//! Two kinds of durable work:
//!
//! - **Analysis jobs**: CPU-heavy local computation, run in-process or on a
//!   background worker thread. A finished job's result becomes a sync
//!   operation.
//! - **Sync operations**: queued mutations (`create`/`update`/`delete`) sent to
//!   the server in priority order, a few at a time, with exponential-backoff
//!   retries.
//!
//! Both live in a [`DurableStore`](client::local_db::DurableStore) and survive
//! restarts. Progress is published on an [`EventBus`](client::sync::EventBus).
//!
//! # Module Structure
//!
//! - **`shared`** - records, events, configuration, errors, clock
//!   - `SyncOperation`, `AnalysisJob`, `QueueEvent`
//!   - `QueueConfig` (TOML + `SYNCQ_*` environment)
//!   - `QueueError`, `StoreError`
//!
//! - **`client`** - the queue itself
//!   - `local_db`: SQLite and in-memory stores
//!   - `offline`: manager, retry, analysis, runners, `OfflineQueue`
//!   - `sync`: event bus, network monitor, scheduler, metrics
//!   - `api_client`: reqwest-based operation handler
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use syncq::client::local_db::MemoryStore;
//! use syncq::client::offline::{FileMetadataAnalyzer, HandlerRegistry, OfflineQueue};
//! use syncq::shared::{AnalysisJobSpec, JobFile, QueueConfig};
//!
//! # async fn example() -> Result<(), syncq::shared::QueueError> {
//! let queue = OfflineQueue::builder(
//!     QueueConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     HandlerRegistry::new(),
//!     Arc::new(FileMetadataAnalyzer),
//! )
//! .online(false)
//! .build()?;
//! queue.init().await?;
//!
//! let file = JobFile::inline("notes.txt", "text/plain", b"hello".to_vec());
//! queue.queue_analysis(AnalysisJobSpec::new("user-1", file)).await?;
//!
//! // Connectivity returns: the job runs, its result is queued for sync
//! queue.set_online(true);
//! # queue.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Delivery
//!
//! At-least-once. Every request carries the operation id as an
//! `Idempotency-Key` so the server can drop duplicates.

/// Records, events, configuration and errors
pub mod shared;

/// Durable queue, scheduling and HTTP dispatch
pub mod client;
