//! Job and result types exchanged with the batch processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of work submitted to the engine.
///
/// The id is assigned by the caller; uniqueness is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job<T> {
    /// Caller-assigned identifier, used to route the result back
    pub id: String,

    /// Opaque payload handed to the processor
    pub payload: T,
}

impl<T> Job<T> {
    pub fn new(id: impl Into<String>, payload: T) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Outcome of one job, produced by the processor.
///
/// The engine overwrites `completed_at` and `consumed` when the batch
/// finishes, so whatever the processor sets there is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult<T> {
    /// Id of the job this result belongs to (informational; routing is positional)
    pub job_id: String,

    /// Whether the processor handled the job successfully
    pub success: bool,

    /// Processor output
    pub payload: T,

    /// Failure description when `success` is false
    pub error: Option<String>,

    /// Stamped by the engine when the batch completes
    pub completed_at: DateTime<Utc>,

    /// Checked by the TTL sweep; the engine always stamps `false`
    pub consumed: bool,
}

impl<T> JobResult<T> {
    /// Successful result carrying `payload`.
    pub fn success(job_id: impl Into<String>, payload: T) -> Self {
        Self {
            job_id: job_id.into(),
            success: true,
            payload,
            error: None,
            completed_at: Utc::now(),
            consumed: false,
        }
    }

    /// Failed result carrying a payload and an error description.
    pub fn failure_with_payload(
        job_id: impl Into<String>,
        payload: T,
        error: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            success: false,
            payload,
            error: Some(error.into()),
            completed_at: Utc::now(),
            consumed: false,
        }
    }

    /// Stamp completion time and reset the consumed flag.
    pub(crate) fn stamp(&mut self, now: DateTime<Utc>) {
        self.completed_at = now;
        self.consumed = false;
    }

    /// Age relative to `now`; results stamped in the future count as zero.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        now.signed_duration_since(self.completed_at)
            .to_std()
            .unwrap_or_default()
    }
}

impl<T: Default> JobResult<T> {
    /// Failed result with a default payload.
    pub fn failure(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::failure_with_payload(job_id, T::default(), error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    #[test]
    fn test_failure_uses_default_payload() {
        let result: JobResult<String> = JobResult::failure("job-1", "model unavailable");
        assert!(!result.success);
        assert_eq!(result.payload, "");
        assert_eq!(result.error.as_deref(), Some("model unavailable"));
    }

    #[test]
    fn test_stamp_resets_consumed() {
        let mut result = JobResult::success("job-1", 7);
        result.consumed = true;
        result.completed_at = Utc::now() - ChronoDuration::hours(2);

        let now = Utc::now();
        result.stamp(now);
        assert_eq!(result.completed_at, now);
        assert!(!result.consumed);
    }

    #[test]
    fn test_age_saturates_for_future_timestamps() {
        let now = Utc::now();
        let mut result = JobResult::success("job-1", ());

        result.completed_at = now + ChronoDuration::seconds(5);
        assert_eq!(result.age(now), Duration::ZERO);

        result.completed_at = now - ChronoDuration::seconds(5);
        assert_eq!(result.age(now), Duration::from_secs(5));
    }

    #[test]
    fn test_job_serializes_to_json() {
        let job = Job::new("job-1", "data-1".to_string());
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["id"], "job-1");
        assert_eq!(json["payload"], "data-1");
    }
}
