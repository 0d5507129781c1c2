//! Periodic eviction of consumed results past their TTL.

use crate::metrics::BatcherMetrics;
use crate::registry::ResultRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Background task sweeping the result registry every `ttl`.
pub(crate) struct CleanupSweeper<T> {
    registry: Arc<ResultRegistry<T>>,
    ttl: Duration,
}

impl<T: Send + 'static> CleanupSweeper<T> {
    pub(crate) fn new(registry: Arc<ResultRegistry<T>>, ttl: Duration) -> Self {
        Self { registry, ttl }
    }

    /// Spawn the sweep loop
    ///
    /// # Returns
    /// - `watch::Sender<()>` - Send (or drop) to stop the sweeper
    /// - `tokio::task::JoinHandle` - Task handle for awaiting completion
    pub(crate) fn spawn(self) -> (watch::Sender<()>, tokio::task::JoinHandle<()>) {
        let (stop_tx, mut stop_rx) = watch::channel(());

        let handle = tokio::spawn(async move {
            debug!(ttl_ms = self.ttl.as_millis() as u64, "Cleanup sweeper started");

            let mut timer = interval(self.ttl);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        break;
                    }
                    _ = timer.tick() => {
                        self.sweep_once();
                    }
                }
            }

            info!("Cleanup sweeper stopped");
        });

        (stop_tx, handle)
    }

    /// Run a single sweep. Returns the number of evicted results.
    pub(crate) fn sweep_once(&self) -> usize {
        debug!("Checking for any old consumed results for cleanup");
        let evicted = self.registry.sweep_expired(self.ttl);
        if evicted > 0 {
            debug!(evicted, "Evicted expired results");
            BatcherMetrics::record_evicted(evicted);
        }
        evicted
    }
}
