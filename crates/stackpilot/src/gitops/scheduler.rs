//! Periodic GitOps sync scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use super::sync::GitOpsSyncEngine;

/// Runs [`GitOpsSyncEngine::sync_all_enabled`] on a fixed tick, or
/// immediately when a manual trigger arrives.
pub struct SyncScheduler {
    engine: Arc<GitOpsSyncEngine>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<GitOpsSyncEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Starts the loop on the current runtime.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut trigger_open = true;

            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = wake.notified() => {}
                    received = trigger_rx.recv(), if trigger_open => match received {
                        Ok(()) => log::info!("Manual GitOps sync triggered"),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::debug!("Coalesced {} manual sync triggers", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => trigger_open = false,
                    },
                }

                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                if let Err(e) = engine.sync_all_enabled(Utc::now()).await {
                    log::error!("GitOps pass failed: {}", e);
                }
            }
            log::info!("GitOps scheduler stopped");
        })
    }

    /// Signals the loop to exit. A pass already in progress finishes first.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}
