//! # Micro-Batching Engine
//!
//! Groups independently submitted jobs into bounded batches and hands each
//! batch to a pluggable [`BatchProcessor`]. Every job's result is routed back
//! to its submitter through a single-use [`ResultReceiver`].
//!
//! A batch is flushed when either:
//! 1. `batch_size` jobs are pending (immediately), or
//! 2. the `batch_interval` timer ticks with at least one job pending, or
//! 3. shutdown is requested (final flush of everything admitted).
//!
//! ## Guarantees
//!
//! - **Positional routing**: result `i` of a batch goes to the submitter of job `i`
//! - **Single delivery**: each conduit receives at most one value and closes once
//! - **Drain on shutdown**: [`MicroBatcher::shutdown`] returns only after every
//!   admitted job has been flushed and its result written
//! - **Total rejection**: once shutdown is raised every submission fails with
//!   [`BatcherError::ShuttingDown`]
//!
//! The engine never retries a batch. Processor failures travel inside the
//! results (`success = false`).
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use micro_batching::{FnProcessor, Job, JobResult, MicroBatcher};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let processor = Arc::new(FnProcessor::new(|jobs: Vec<Job<String>>| {
//!         jobs.into_iter()
//!             .map(|job| JobResult::success(job.id, job.payload.to_uppercase()))
//!             .collect::<Vec<_>>()
//!     }));
//!
//!     let batcher = MicroBatcher::new(
//!         processor,
//!         3,                          // batch_size
//!         Duration::from_secs(2),     // batch_interval
//!         Duration::from_secs(10),    // result_ttl
//!     )?;
//!
//!     let mut receiver = batcher.submit_job(Job::new("job-1", "hello".to_string())).await?;
//!     batcher.shutdown().await;
//!
//!     if let Some(result) = receiver.recv().await {
//!         println!("{} -> {}", result.job_id, result.payload);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

mod barrier;
mod batcher;
mod config;
mod error;
mod job;
pub mod metrics;
mod processor;
mod registry;
mod sweeper;

pub use batcher::FlushTrigger;
pub use config::{BatcherConfig, MAX_QUEUE_CAPACITY, QUEUE_CAPACITY_FACTOR};
pub use error::{BatcherError, BatcherResult};
pub use job::{Job, JobResult};
pub use processor::{BatchProcessor, FnProcessor};
pub use registry::ResultReceiver;

use barrier::CompletionBarrier;
use batcher::Batcher;
use metrics::BatcherMetrics;
use registry::ResultRegistry;
use sweeper::CleanupSweeper;

/// The micro-batching engine.
///
/// Construction spawns two background tasks on the current tokio runtime:
/// the batching loop and the TTL cleanup sweeper. Both stop on
/// [`shutdown`](Self::shutdown), or when the engine is dropped.
///
/// # Lifecycle
/// 1. Create with [`new`](Self::new) or [`with_config`](Self::with_config)
/// 2. Submit jobs with [`submit_job`](Self::submit_job)
/// 3. Shut down with [`shutdown`](Self::shutdown), which waits for in-flight jobs
pub struct MicroBatcher<T: Send + 'static> {
    config: BatcherConfig,
    jobs_tx: mpsc::Sender<Job<T>>,
    registry: Arc<ResultRegistry<T>>,
    barrier: Arc<CompletionBarrier>,
    /// Submitters hold it shared; the batching loop takes it exclusively for its final drain.
    admission: Arc<RwLock<()>>,
    shutdown_tx: watch::Sender<bool>,
    sweeper_stop: watch::Sender<()>,
    /// Held for the whole join so concurrent shutdowns return after it.
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> MicroBatcher<T> {
    /// Create an engine and start its background tasks.
    ///
    /// # Arguments
    ///
    /// * `processor` - Capability invoked once per batch
    /// * `batch_size` - Pending jobs that trigger an immediate flush
    /// * `batch_interval` - Flush period for partially filled batches
    /// * `result_ttl` - Expiry for consumed results, also the sweep period
    ///
    /// # Errors
    ///
    /// Returns [`BatcherError::InvalidConfig`] for a zero size or duration.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(
        processor: Arc<dyn BatchProcessor<T>>,
        batch_size: usize,
        batch_interval: Duration,
        result_ttl: Duration,
    ) -> BatcherResult<Self> {
        Self::with_config(
            processor,
            BatcherConfig::new(batch_size, batch_interval, result_ttl),
        )
    }

    /// Create an engine from a full [`BatcherConfig`].
    pub fn with_config(
        processor: Arc<dyn BatchProcessor<T>>,
        config: BatcherConfig,
    ) -> BatcherResult<Self> {
        config.validate()?;

        let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry = Arc::new(ResultRegistry::new());
        let barrier = Arc::new(CompletionBarrier::new());
        let admission = Arc::new(RwLock::new(()));

        // Reserved for the batching loop itself, released when it exits.
        barrier.add();

        let batcher = Batcher {
            processor,
            registry: registry.clone(),
            barrier: barrier.clone(),
            admission: admission.clone(),
            jobs_rx,
            shutdown_rx,
            batch_size: config.batch_size,
            batch_interval: config.batch_interval,
        };
        let batcher_handle = tokio::spawn(batcher.run());

        let (sweeper_stop, sweeper_handle) =
            CleanupSweeper::new(registry.clone(), config.result_ttl).spawn();

        info!(
            batch_size = config.batch_size,
            batch_interval_ms = config.batch_interval.as_millis() as u64,
            result_ttl_ms = config.result_ttl.as_millis() as u64,
            queue_capacity = config.queue_capacity,
            "Micro-batching engine started"
        );

        Ok(Self {
            config,
            jobs_tx,
            registry,
            barrier,
            admission,
            shutdown_tx,
            sweeper_stop,
            tasks: AsyncMutex::new(vec![batcher_handle, sweeper_handle]),
        })
    }

    /// Submit a job for batching.
    ///
    /// Waits while the ingress queue is full. On success the returned
    /// receiver yields the job's result once its batch has been processed.
    ///
    /// # Errors
    ///
    /// Returns [`BatcherError::ShuttingDown`] if shutdown was raised before or
    /// while the job was being enqueued. A rejected job leaves no trace in the
    /// engine.
    pub async fn submit_job(&self, job: Job<T>) -> BatcherResult<ResultReceiver<T>> {
        debug!(job_id = %job.id, "Attempting to submit job");

        let _admission = self.admission.read().await;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            warn!(job_id = %job.id, "System is shutting down, cannot accept new jobs");
            BatcherMetrics::record_rejected("precheck");
            return Err(BatcherError::ShuttingDown);
        }

        // Reserving a slot and observing shutdown are exclusive outcomes.
        let permit = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => None,
            permit = self.jobs_tx.reserve() => permit.ok(),
        };
        let Some(permit) = permit else {
            warn!(job_id = %job.id, "System started shutting down, cannot accept new jobs");
            BatcherMetrics::record_rejected("enqueue");
            return Err(BatcherError::ShuttingDown);
        };

        // Register before the job becomes visible to the batching loop.
        self.barrier.add();
        let (receiver, receipt) = self.registry.register(&job.id);

        let barrier = self.barrier.clone();
        tokio::spawn(async move {
            // Ok on delivery, Err when the conduit is closed without a value.
            let _ = receipt.await;
            barrier.done();
        });

        debug!(job_id = %job.id, "Job added to job queue");
        permit.send(job);
        BatcherMetrics::record_submitted();

        Ok(receiver)
    }

    /// Gracefully shut down the engine.
    ///
    /// Raises the shutdown signal, waits until every admitted job has been
    /// flushed and its result written, then stops the background tasks.
    /// Calling it again is harmless.
    ///
    /// If the processor returns fewer results than jobs, the unanswered jobs
    /// keep this call waiting; use [`shutdown_with_timeout`](Self::shutdown_with_timeout)
    /// to bound it.
    pub async fn shutdown(&self) {
        if self.raise_shutdown() {
            info!("Shutting down MicroBatching system");
        } else {
            debug!("Shutdown already requested");
        }

        self.barrier.wait().await;
        self.stop_background_tasks().await;

        info!("MicroBatching system shut down");
    }

    /// Like [`shutdown`](Self::shutdown), but gives up after `timeout`.
    ///
    /// The engine stays in the shutting-down state either way.
    ///
    /// # Errors
    ///
    /// Returns [`BatcherError::ShutdownTimedOut`] if in-flight jobs were still
    /// outstanding when the timeout elapsed.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> BatcherResult<()> {
        if self.raise_shutdown() {
            info!(timeout_ms = timeout.as_millis() as u64, "Shutting down MicroBatching system");
        }

        match tokio::time::timeout(timeout, self.barrier.wait()).await {
            Ok(()) => {
                self.stop_background_tasks().await;
                info!("MicroBatching system shut down");
                Ok(())
            }
            Err(_) => {
                warn!(
                    outstanding = self.barrier.count(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Shutdown timed out waiting for in-flight jobs"
                );
                let _ = self.sweeper_stop.send(());
                Err(BatcherError::ShutdownTimedOut(timeout))
            }
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Number of registered conduits still waiting for delivery or eviction.
    pub fn pending_results(&self) -> usize {
        self.registry.len()
    }

    /// Engine configuration.
    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Raise the shutdown signal. Returns true only for the first caller.
    fn raise_shutdown(&self) -> bool {
        self.shutdown_tx.send_if_modified(|raised| {
            if *raised {
                false
            } else {
                *raised = true;
                true
            }
        })
    }

    async fn stop_background_tasks(&self) {
        let _ = self.sweeper_stop.send(());

        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Background task terminated abnormally");
            }
        }
    }
}

impl<T: Send + 'static> Drop for MicroBatcher<T> {
    fn drop(&mut self) {
        // Background tasks must not outlive the engine.
        self.raise_shutdown();
        let _ = self.sweeper_stop.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_processor() -> Arc<dyn BatchProcessor<u32>> {
        Arc::new(FnProcessor::new(|jobs: Vec<Job<u32>>| -> Vec<JobResult<u32>> {
            jobs.into_iter()
                .map(|job| JobResult::success(job.id, job.payload))
                .collect()
        }))
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let result = MicroBatcher::new(
            echo_processor(),
            0,
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(BatcherError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_new_keeps_configuration() {
        let batcher = MicroBatcher::new(
            echo_processor(),
            10,
            Duration::from_millis(100),
            Duration::from_secs(10),
        )
        .unwrap();

        assert_eq!(batcher.config().batch_size, 10);
        assert_eq!(batcher.config().batch_interval, Duration::from_millis(100));
        assert_eq!(batcher.config().result_ttl, Duration::from_secs(10));
        assert_eq!(batcher.config().queue_capacity, 100);
        assert!(!batcher.is_shutting_down());
        assert_eq!(batcher.pending_results(), 0);
        // Only the batching loop's unit is reserved.
        assert_eq!(batcher.barrier.count(), 1);
    }

    #[tokio::test]
    async fn test_submit_registers_conduit() {
        let batcher = MicroBatcher::new(
            echo_processor(),
            2,
            Duration::from_secs(60),
            Duration::from_secs(1),
        )
        .unwrap();

        let receiver = batcher.submit_job(Job::new("1", 42)).await.unwrap();
        assert_eq!(receiver.job_id(), "1");
        assert!(batcher.registry.contains("1"));
        assert_eq!(batcher.barrier.count(), 2);

        batcher.shutdown().await;
        assert_eq!(batcher.barrier.count(), 0);
        assert!(!batcher.registry.contains("1"));
    }

    #[tokio::test]
    async fn test_rejected_submission_leaves_no_trace() {
        let batcher = MicroBatcher::new(
            echo_processor(),
            2,
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
        .unwrap();

        batcher.raise_shutdown();
        let result = batcher.submit_job(Job::new("1", 42)).await;

        assert_eq!(result.unwrap_err(), BatcherError::ShuttingDown);
        assert_eq!(batcher.pending_results(), 0);
        assert!(batcher.barrier.count() <= 1);
    }

    #[tokio::test]
    async fn test_oversized_batch_returns_invalid_config() {
        let result = MicroBatcher::new(
            echo_processor(),
            usize::MAX / 4,
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(BatcherError::InvalidConfig(_))));

        let config = BatcherConfig::new(1, Duration::from_millis(10), Duration::from_secs(1))
            .with_queue_capacity(usize::MAX);
        let result = MicroBatcher::with_config(echo_processor(), config);
        assert!(matches!(result, Err(BatcherError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_huge_batch_size_with_bounded_queue() {
        let config = BatcherConfig::new(
            usize::MAX / 16,
            Duration::from_secs(60),
            Duration::from_secs(1),
        )
        .with_queue_capacity(16);
        let batcher = MicroBatcher::with_config(echo_processor(), config).unwrap();

        let mut receiver = batcher.submit_job(Job::new("1", 5)).await.unwrap();
        batcher.shutdown().await;
        assert_eq!(receiver.try_recv().map(|r| r.payload), Some(5));
    }

    #[tokio::test]
    async fn test_concurrent_shutdown_waits_for_task_join() {
        let batcher = Arc::new(
            MicroBatcher::new(
                echo_processor(),
                2,
                Duration::from_millis(20),
                Duration::from_secs(1),
            )
            .unwrap(),
        );

        // Stand in for a first shutdown caller that is still joining.
        let joining = batcher.tasks.lock().await;

        let second = {
            let batcher = batcher.clone();
            tokio::spawn(async move { batcher.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(batcher.is_shutting_down());
        assert!(!second.is_finished());

        drop(joining);
        tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .expect("second shutdown should finish once the join completes")
            .unwrap();
        assert!(batcher.tasks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_raise_shutdown_only_once() {
        let batcher = MicroBatcher::new(
            echo_processor(),
            2,
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
        .unwrap();

        assert!(batcher.raise_shutdown());
        assert!(!batcher.raise_shutdown());
        assert!(batcher.is_shutting_down());
    }
}
