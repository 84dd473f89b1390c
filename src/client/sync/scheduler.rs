//! # Sync Scheduler
//!
//! The trigger loop behind automatic drains. One background task waits on
//! four sources and forwards each wake-up to a [`DrainTarget`]:
//!
//! - the periodic timer (only acted on while online),
//! - connectivity transitions to online,
//! - the trigger channel (retry timers, foregrounding, manual sync),
//! - the shutdown signal.
//!
//! Triggers are handled one at a time, so a burst of retry timers turns into
//! back-to-back drain requests rather than concurrent ones.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::client::sync::network_monitor::NetworkStatus;

/// Why a drain was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    Periodic,
    ConnectivityRestored,
    Foreground,
    /// Backoff window of an operation elapsed
    RetryDue(Uuid),
    Manual,
}

/// Receiver of scheduler wake-ups
#[async_trait]
pub trait DrainTarget: Send + Sync {
    async fn on_trigger(&self, trigger: DrainTrigger);
}

/// Owner of the trigger loop task
#[derive(Debug)]
pub struct SyncScheduler {
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            interval,
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Spawn the trigger loop
    ///
    /// Returns `false` when a loop is already running.
    pub fn start(
        &self,
        target: Arc<dyn DrainTarget>,
        triggers: mpsc::UnboundedReceiver<DrainTrigger>,
        network: watch::Receiver<NetworkStatus>,
    ) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        self.shutdown_tx.send_replace(false);
        let shutdown = self.shutdown_tx.subscribe();
        let interval = self.interval;
        *handle = Some(tokio::spawn(run_loop(interval, target, triggers, network, shutdown)));
        tracing::info!("[Scheduler] Started (drain every {:?})", interval);
        true
    }

    /// Stop the loop and wait for the trigger in progress to finish
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("[Scheduler] Trigger loop ended abnormally: {}", e);
            }
            tracing::info!("[Scheduler] Stopped");
        }
    }
}

async fn run_loop(
    interval: Duration,
    target: Arc<dyn DrainTarget>,
    mut triggers: mpsc::UnboundedReceiver<DrainTrigger>,
    mut network: watch::Receiver<NetworkStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    network.borrow_and_update();

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            changed = network.changed() => {
                if changed.is_err() {
                    tracing::debug!("[Scheduler] Network monitor dropped");
                    break;
                }
                if *network.borrow_and_update() == NetworkStatus::Online {
                    target.on_trigger(DrainTrigger::ConnectivityRestored).await;
                }
            }
            trigger = triggers.recv() => match trigger {
                Some(trigger) => {
                    tracing::trace!("[Scheduler] Trigger {:?}", trigger);
                    target.on_trigger(trigger).await;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if *network.borrow() == NetworkStatus::Online {
                    target.on_trigger(DrainTrigger::Periodic).await;
                }
            }
        }
    }
}
