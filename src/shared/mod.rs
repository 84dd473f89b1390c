//! Shared Module
//!
//! Records, events, configuration and error types used by every part of the
//! queue. Records are JSON-serializable so they can be written to the durable
//! store as-is.

/// Sync operation records and specs
pub mod operation;

/// Analysis job records and specs
pub mod job;

/// Queue lifecycle events
pub mod event;

/// Shared error types
pub mod error;

/// Queue configuration
pub mod config;

/// Injectable wall clock
pub mod clock;

/// Re-export commonly used types for convenience
pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use config::{ConfigError, QueueConfig, QueueConfigBuilder};
pub use error::{QueueError, StoreError};
pub use event::{DrainPlan, DrainReport, EventKind, QueueEvent};
pub use job::{AnalysisJob, AnalysisJobSpec, AnalysisOptions, AnalysisRequest, FileSource, JobFile, JobStatus};
pub use operation::{
    AnalysisSync, NotificationSync, OperationKind, OperationSpec, OperationVerb, PreferenceSync,
    Priority, SyncOperation, SyncOperationStatus, SyncPayload, UserDataSync,
};
