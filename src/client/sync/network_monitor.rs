//! # Network Monitor
//!
//! Holds the connectivity state reported by the host platform and lets the
//! trigger loop react to transitions. Platform hooks (OS reachability APIs,
//! browser `online` events) call [`NetworkMonitor::set_online`]; the queue
//! never checks reachability itself.

use tokio::sync::watch;

/// Network connectivity status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

/// Connectivity state shared by the queue components
#[derive(Debug)]
pub struct NetworkMonitor {
    status_tx: watch::Sender<NetworkStatus>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (status_tx, _) = watch::channel(initial);
        Self { status_tx }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.status_tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status() == NetworkStatus::Online
    }

    /// Record a connectivity report
    ///
    /// Returns `true` when this call moved the state from offline to online.
    pub fn set_online(&self, online: bool) -> bool {
        let next = if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };
        let mut restored = false;
        self.status_tx.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            restored = next == NetworkStatus::Online;
            tracing::info!("[Network] Connectivity changed: {:?} -> {:?}", status, next);
            *status = next;
            true
        });
        restored
    }

    /// Receiver notified on every transition
    pub fn watch(&self) -> watch::Receiver<NetworkStatus> {
        self.status_tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::Online)
    }
}
