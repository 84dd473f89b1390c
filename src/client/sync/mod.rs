//! # Sync Coordination
//!
//! Everything that decides *when* the offline queue talks to the server:
//!
//! - **Event Bus** (`event_bus.rs`): lifecycle events for UIs and observers
//! - **Network Monitor** (`network_monitor.rs`): connectivity state reported by the platform
//! - **Scheduler** (`scheduler.rs`): periodic timer and trigger loop
//! - **Metrics** (`metrics.rs`): running drain statistics

pub mod event_bus;
pub mod metrics;
pub mod network_monitor;
pub mod scheduler;

pub use event_bus::{EventBus, EventHandler, EventHandlerError, SubscriptionId};
pub use metrics::DrainMetrics;
pub use network_monitor::{NetworkMonitor, NetworkStatus};
pub use scheduler::{DrainTarget, DrainTrigger, SyncScheduler};
