use crate::job::{Job, JobResult};
use async_trait::async_trait;

/// Processing capability injected into the engine.
///
/// Receives a whole batch and must return one result per job, in the same
/// order: the result at index `i` is routed to the submitter of job `i`.
/// The engine does not look at `JobResult::job_id` when routing.
///
/// Failures belong inside the results (`success = false`). A shorter result
/// vector leaves the trailing jobs undelivered; extra results are ignored.
/// The call is awaited inline by the batching loop, so a slow processor
/// delays every later batch.
#[async_trait]
pub trait BatchProcessor<T: Send + 'static>: Send + Sync {
    /// Process a batch of jobs.
    async fn process(&self, jobs: Vec<Job<T>>) -> Vec<JobResult<T>>;
}

/// Adapter turning a synchronous closure into a [`BatchProcessor`].
///
/// ```rust
/// use micro_batching::{FnProcessor, JobResult};
///
/// let processor = FnProcessor::new(|jobs: Vec<micro_batching::Job<u32>>| {
///     jobs.into_iter()
///         .map(|job| JobResult::success(job.id, job.payload * 2))
///         .collect::<Vec<_>>()
/// });
/// # let _ = processor;
/// ```
pub struct FnProcessor<F> {
    func: F,
}

impl<F> FnProcessor<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<T, F> BatchProcessor<T> for FnProcessor<F>
where
    T: Send + 'static,
    F: Fn(Vec<Job<T>>) -> Vec<JobResult<T>> + Send + Sync,
{
    async fn process(&self, jobs: Vec<Job<T>>) -> Vec<JobResult<T>> {
        (self.func)(jobs)
    }
}
