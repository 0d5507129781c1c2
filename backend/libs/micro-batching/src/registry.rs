//! Result slot registry
//!
//! Maps job ids to single-use result conduits. The batching loop writes into
//! a conduit exactly once and removes it in the same critical section; the TTL
//! sweep inspects whatever is still registered.

use crate::job::JobResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{debug, warn};

type SharedReceiver<T> = Arc<AsyncMutex<mpsc::Receiver<JobResult<T>>>>;

/// Read side of a job's result conduit.
///
/// Yields exactly one [`JobResult`] and then reports the conduit as closed.
/// A conduit evicted by the TTL sweep closes without yielding.
pub struct ResultReceiver<T> {
    job_id: String,
    rx: SharedReceiver<T>,
}

impl<T> ResultReceiver<T> {
    /// Id of the job this receiver belongs to.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Wait for the result. Returns `None` once the conduit is closed and empty.
    pub async fn recv(&mut self) -> Option<JobResult<T>> {
        self.rx.lock().await.recv().await
    }

    /// Take the result if it has already been delivered.
    pub fn try_recv(&mut self) -> Option<JobResult<T>> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }
}

impl<T> fmt::Debug for ResultReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultReceiver")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

/// Counts from distributing one batch of results.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeliveryReport {
    pub delivered: usize,
    /// Results whose job id had no registered conduit
    pub dropped: usize,
    /// Jobs left without a result because the processor returned too few
    pub undelivered: usize,
    /// Results beyond the batch length
    pub surplus: usize,
}

struct ResultSlot<T> {
    tx: mpsc::Sender<JobResult<T>>,
    rx: SharedReceiver<T>,
    receipt: oneshot::Sender<()>,
}

impl<T> ResultSlot<T> {
    /// Write the single value, fire the receipt, and close the conduit.
    fn deliver(self, job_id: &str, result: JobResult<T>) {
        if self.tx.try_send(result).is_err() {
            warn!(job_id = %job_id, "Result conduit already holds a value, dropping result");
        }
        let _ = self.receipt.send(());
    }

    /// Sweep one slot. Returns false when the slot should be evicted.
    fn survives_sweep(&self, job_id: &str, now: DateTime<Utc>, ttl: Duration) -> bool {
        // Reader is parked on the conduit: nothing buffered to inspect.
        let Ok(mut rx) = self.rx.try_lock() else {
            return true;
        };

        match rx.try_recv() {
            Ok(result) => {
                if result.age(now) > ttl && result.consumed {
                    debug!(job_id = %job_id, "Result expired and cleaned up");
                    false
                } else {
                    // Capacity is one and we just emptied it.
                    let _ = self.tx.try_send(result);
                    true
                }
            }
            Err(_) => true,
        }
    }
}

/// Lock-protected job id to result conduit map.
pub(crate) struct ResultRegistry<T> {
    slots: Mutex<HashMap<String, ResultSlot<T>>>,
}

impl<T> ResultRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate and register a conduit for `job_id`.
    ///
    /// Returns the caller-facing receiver and a receipt that resolves when
    /// the result is written, or errors when the slot is dropped unwritten.
    pub(crate) fn register(&self, job_id: &str) -> (ResultReceiver<T>, oneshot::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        let (receipt_tx, receipt_rx) = oneshot::channel();
        let rx = Arc::new(AsyncMutex::new(rx));

        let slot = ResultSlot {
            tx,
            rx: rx.clone(),
            receipt: receipt_tx,
        };

        let previous = self.slots.lock().insert(job_id.to_string(), slot);
        if previous.is_some() {
            warn!(
                job_id = %job_id,
                "Duplicate job id, previous submitter's conduit closed without a result"
            );
        }

        (
            ResultReceiver {
                job_id: job_id.to_string(),
                rx,
            },
            receipt_rx,
        )
    }

    /// Route `results` to the conduits of `job_ids` by position.
    ///
    /// The whole distribution runs under the registry lock.
    pub(crate) fn deliver(&self, job_ids: &[String], results: Vec<JobResult<T>>) -> DeliveryReport {
        let mut report = DeliveryReport {
            undelivered: job_ids.len().saturating_sub(results.len()),
            surplus: results.len().saturating_sub(job_ids.len()),
            ..Default::default()
        };

        let mut slots = self.slots.lock();
        for (job_id, mut result) in job_ids.iter().zip(results) {
            result.stamp(Utc::now());
            match slots.remove(job_id) {
                Some(slot) => {
                    debug!(job_id = %job_id, success = result.success, "Sending result");
                    slot.deliver(job_id, result);
                    report.delivered += 1;
                }
                None => {
                    debug!(job_id = %job_id, "No conduit registered for job, dropping result");
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Evict consumed results older than `ttl`. Returns the number evicted.
    pub(crate) fn sweep_expired(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|job_id, slot| slot.survives_sweep(job_id, now, ttl));
        before - slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, job_id: &str) -> bool {
        self.slots.lock().contains_key(job_id)
    }

    /// Buffer a value in a registered conduit without removing it.
    #[cfg(test)]
    pub(crate) fn stash(&self, job_id: &str, result: JobResult<T>) -> bool {
        self.slots
            .lock()
            .get(job_id)
            .map(|slot| slot.tx.try_send(result).is_ok())
            .unwrap_or(false)
    }
}
