//! Client-side queue
//!
//! - `local_db` - durable key-value store (SQLite or in-memory)
//! - `offline` - sync operations, analysis jobs and the [`offline::OfflineQueue`] context
//! - `sync` - events, connectivity and the drain scheduler
//! - `api_client` - HTTP handler for sync operations

pub mod api_client;
pub mod local_db;
pub mod offline;
pub mod sync;
