//! Sync Operation Types
//!
//! A [`SyncOperation`] is a durable, retryable mutation waiting to be
//! reconciled with the server. Its payload is a tagged union: the variant
//! selects the handler and carries the strongly typed data that handler
//! sends.
//!
//! Records are stored as JSON in the operations namespace of the durable
//! store, one record per key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::fmt;
use uuid::Uuid;

/// Default retry budget for new operations
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Operation priority levels
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work (preferences, read receipts)
    Low,
    /// Normal priority operations
    #[default]
    Medium,
    /// Drained before anything else regardless of age
    High,
}

/// Handler tag of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Analysis,
    UserData,
    Notification,
    Preference,
}

impl OperationKind {
    /// All kinds, in registry order
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Analysis,
        OperationKind::UserData,
        OperationKind::Notification,
        OperationKind::Preference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Analysis => "analysis",
            OperationKind::UserData => "user_data",
            OperationKind::Notification => "notification",
            OperationKind::Preference => "preference",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic intent of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationVerb {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            OperationVerb::Create => "create",
            OperationVerb::Update => "update",
            OperationVerb::Delete => "delete",
        };
        f.write_str(verb)
    }
}

/// Operation execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperationStatus {
    /// Waiting to be dispatched (possibly inside a backoff window)
    Pending,
    /// Handed to a handler by the current drain
    Syncing,
    /// Handler succeeded
    Completed,
    /// Retry budget exhausted or failure was permanent
    Failed,
}

impl SyncOperationStatus {
    /// Terminal records are never dispatched again
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncOperationStatus::Completed | SyncOperationStatus::Failed)
    }
}

/// Result of a local analysis job, uploaded to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSync {
    pub job_id: Uuid,
    pub user_id: String,
    pub result: serde_json::Value,
}

/// Profile or account data edited offline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDataSync {
    /// Server-side record id; required for update and delete
    pub record_id: Option<String>,
    pub fields: serde_json::Value,
}

/// Notification created or acknowledged offline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSync {
    pub notification_id: Option<String>,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub read: bool,
}

/// A single user preference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSync {
    pub key: String,
    pub value: serde_json::Value,
}

/// Typed payload of a sync operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SyncPayload {
    Analysis(AnalysisSync),
    UserData(UserDataSync),
    Notification(NotificationSync),
    Preference(PreferenceSync),
}

impl SyncPayload {
    /// Handler tag for this payload
    pub fn kind(&self) -> OperationKind {
        match self {
            SyncPayload::Analysis(_) => OperationKind::Analysis,
            SyncPayload::UserData(_) => OperationKind::UserData,
            SyncPayload::Notification(_) => OperationKind::Notification,
            SyncPayload::Preference(_) => OperationKind::Preference,
        }
    }

    /// Identifier of the server-side resource targeted by update/delete
    pub fn resource_id(&self) -> Option<String> {
        match self {
            SyncPayload::Analysis(a) => Some(a.job_id.to_string()),
            SyncPayload::UserData(u) => u.record_id.clone(),
            SyncPayload::Notification(n) => n.notification_id.clone(),
            SyncPayload::Preference(p) => Some(p.key.clone()),
        }
    }

    /// Request body sent to the API
    pub fn body(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            SyncPayload::Analysis(a) => serde_json::to_value(a),
            SyncPayload::UserData(u) => serde_json::to_value(u),
            SyncPayload::Notification(n) => serde_json::to_value(n),
            SyncPayload::Preference(p) => serde_json::to_value(p),
        }
    }
}

/// Durable, retryable unit of sync work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: Uuid,
    pub payload: SyncPayload,
    pub operation: OperationVerb,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Enqueue order; breaks timestamp ties
    #[serde(default)]
    pub sequence: u64,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: SyncOperationStatus,
    pub last_attempt: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// End of the current backoff window
    #[serde(default)]
    pub next_eligible_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    /// Build a fresh pending operation from a spec
    pub fn from_spec(spec: &OperationSpec, now: DateTime<Utc>, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: spec.payload.clone(),
            operation: spec.operation,
            timestamp: now,
            sequence,
            priority: spec.priority,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            status: SyncOperationStatus::Pending,
            last_attempt: None,
            error_message: None,
            next_eligible_at: None,
            completed_at: None,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    /// Pending and outside any backoff window
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == SyncOperationStatus::Pending
            && self.next_eligible_at.map_or(true, |at| at <= now)
    }

    /// Drain order: priority descending, then FIFO
    pub fn dispatch_order(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }

    fn sort_key(&self) -> (Reverse<Priority>, DateTime<Utc>, u64) {
        (Reverse(self.priority), self.timestamp, self.sequence)
    }
}

/// Caller-supplied description of an operation to enqueue
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSpec {
    pub payload: SyncPayload,
    pub operation: OperationVerb,
    pub priority: Priority,
    /// Overrides the queue's configured retry budget
    pub max_retries: Option<u32>,
    /// User on whose behalf the operation runs; exposed to templates
    pub user_id: Option<String>,
    /// Render `{{variable}}` placeholders in the payload at enqueue time
    pub render_templates: bool,
}

impl OperationSpec {
    pub fn new(payload: SyncPayload, operation: OperationVerb) -> Self {
        Self {
            payload,
            operation,
            priority: Priority::default(),
            max_retries: None,
            user_id: None,
            render_templates: false,
        }
    }

    pub fn create(payload: SyncPayload) -> Self {
        Self::new(payload, OperationVerb::Create)
    }

    pub fn update(payload: SyncPayload) -> Self {
        Self::new(payload, OperationVerb::Update)
    }

    pub fn delete(payload: SyncPayload) -> Self {
        Self::new(payload, OperationVerb::Delete)
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn templated(mut self) -> Self {
        self.render_templates = true;
        self
    }
}
