//! Batching loop
//!
//! A single task owns the pending batch. It flushes when the batch reaches
//! `batch_size`, when the interval timer ticks with work pending, and once
//! more when shutdown is raised.

use crate::barrier::CompletionBarrier;
use crate::job::Job;
use crate::metrics::BatcherMetrics;
use crate::processor::BatchProcessor;
use crate::registry::ResultRegistry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Upper bound on the pending buffer allocated up front.
const PREALLOCATED_JOBS: usize = 1024;

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Pending jobs reached `batch_size`
    Size,
    /// Interval timer fired with jobs pending
    Interval,
    /// Final flush while shutting down
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct Batcher<T: Send + 'static> {
    pub(crate) processor: Arc<dyn BatchProcessor<T>>,
    pub(crate) registry: Arc<ResultRegistry<T>>,
    pub(crate) barrier: Arc<CompletionBarrier>,
    pub(crate) admission: Arc<RwLock<()>>,
    pub(crate) jobs_rx: mpsc::Receiver<Job<T>>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
    pub(crate) batch_size: usize,
    pub(crate) batch_interval: Duration,
}

impl<T: Send + 'static> Batcher<T> {
    /// Run until shutdown. Releases the loop's barrier unit on exit.
    pub(crate) async fn run(mut self) {
        info!(
            batch_size = self.batch_size,
            batch_interval_ms = self.batch_interval.as_millis() as u64,
            "Batcher starting"
        );

        let mut ticker = tokio::time::interval(self.batch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // first tick completes immediately

        let mut pending: Vec<Job<T>> =
            Vec::with_capacity(self.batch_size.min(PREALLOCATED_JOBS));

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    let raised = *self.shutdown_rx.borrow();
                    if changed.is_err() || raised {
                        self.drain_on_shutdown(&mut pending).await;
                        break;
                    }
                }
                maybe_job = self.jobs_rx.recv() => {
                    match maybe_job {
                        Some(job) => {
                            debug!(job_id = %job.id, "Received job");
                            pending.push(job);
                            if pending.len() >= self.batch_size {
                                self.flush(&mut pending, FlushTrigger::Size).await;
                            }
                        }
                        None => {
                            // Every sender is gone; nothing more can arrive.
                            self.flush_all(&mut pending).await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        self.flush(&mut pending, FlushTrigger::Interval).await;
                    }
                }
            }
        }

        self.jobs_rx.close();
        self.barrier.done();
        info!("Batcher stopped");
    }

    /// Drain everything admitted before shutdown and flush it.
    ///
    /// Holding the admission gate exclusively waits out submitters that are
    /// between enqueue and registration, and keeps new ones out until the
    /// queue is closed.
    async fn drain_on_shutdown(&mut self, pending: &mut Vec<Job<T>>) {
        let _gate = self.admission.write().await;
        self.jobs_rx.close();

        while let Ok(job) = self.jobs_rx.try_recv() {
            pending.push(job);
        }

        if !pending.is_empty() {
            debug!(
                remaining = pending.len(),
                "Shutting down after flushing remaining jobs"
            );
        }
        self.flush_all(pending).await;
    }

    async fn flush_all(&self, pending: &mut Vec<Job<T>>) {
        while !pending.is_empty() {
            let take = pending.len().min(self.batch_size);
            let mut chunk: Vec<Job<T>> = pending.drain(..take).collect();
            self.flush(&mut chunk, FlushTrigger::Shutdown).await;
        }
    }

    /// Dispatch the pending jobs as one batch and clear them.
    async fn flush(&self, pending: &mut Vec<Job<T>>, trigger: FlushTrigger) {
        let batch = std::mem::take(pending);
        let batch_len = batch.len();
        debug!(batch_size = batch_len, trigger = %trigger, "Processing batch");
        BatcherMetrics::record_flush(trigger.as_str(), batch_len);

        let job_ids: Vec<String> = batch.iter().map(|job| job.id.clone()).collect();

        // Processor runs outside the registry lock.
        let results = self.processor.process(batch).await;
        let report = self.registry.deliver(&job_ids, results);

        if report.undelivered > 0 {
            warn!(
                batch_size = batch_len,
                undelivered = report.undelivered,
                "Processor returned fewer results than jobs"
            );
        }
        if report.surplus > 0 {
            warn!(
                batch_size = batch_len,
                surplus = report.surplus,
                "Processor returned more results than jobs, extra results ignored"
            );
        }
        if report.dropped > 0 {
            BatcherMetrics::record_dropped(report.dropped);
        }

        debug!(
            batch_size = batch_len,
            delivered = report.delivered,
            dropped = report.dropped,
            "Batch results distributed"
        );
    }
}
