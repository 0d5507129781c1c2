/// Prometheus metrics for the batching engine
#[cfg(feature = "metrics")]
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;

#[cfg(feature = "metrics")]
static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "microbatch_jobs_submitted_total",
        "Total number of jobs admitted into the ingress queue"
    )
    .expect("Failed to register jobs submitted metric")
});

#[cfg(feature = "metrics")]
static JOBS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "microbatch_jobs_rejected_total",
        "Total number of submissions rejected during shutdown",
        &["stage"]
    )
    .expect("Failed to register jobs rejected metric")
});

#[cfg(feature = "metrics")]
static BATCHES_FLUSHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "microbatch_batches_flushed_total",
        "Total number of batches dispatched to the processor",
        &["trigger"]
    )
    .expect("Failed to register batches flushed metric")
});

#[cfg(feature = "metrics")]
static BATCH_SIZE: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "microbatch_batch_size",
        "Number of jobs per dispatched batch",
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
    )
    .expect("Failed to register batch size metric")
});

#[cfg(feature = "metrics")]
static RESULTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "microbatch_results_dropped_total",
        "Results discarded because their job id was no longer registered"
    )
    .expect("Failed to register results dropped metric")
});

#[cfg(feature = "metrics")]
static RESULTS_EVICTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "microbatch_results_evicted_total",
        "Consumed results evicted by the TTL sweep"
    )
    .expect("Failed to register results evicted metric")
});

/// Metrics collector for the batching engine
#[cfg(feature = "metrics")]
pub struct BatcherMetrics;

#[cfg(feature = "metrics")]
impl BatcherMetrics {
    pub fn record_submitted() {
        JOBS_SUBMITTED.inc();
    }

    pub fn record_rejected(stage: &str) {
        JOBS_REJECTED.with_label_values(&[stage]).inc();
    }

    pub fn record_flush(trigger: &str, batch_size: usize) {
        BATCHES_FLUSHED.with_label_values(&[trigger]).inc();
        BATCH_SIZE.observe(batch_size as f64);
    }

    pub fn record_dropped(count: usize) {
        RESULTS_DROPPED.inc_by(count as u64);
    }

    pub fn record_evicted(count: usize) {
        RESULTS_EVICTED.inc_by(count as u64);
    }
}

// No-op implementation when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub struct BatcherMetrics;

#[cfg(not(feature = "metrics"))]
impl BatcherMetrics {
    pub fn record_submitted() {}
    pub fn record_rejected(_stage: &str) {}
    pub fn record_flush(_trigger: &str, _batch_size: usize) {}
    pub fn record_dropped(_count: usize) {}
    pub fn record_evicted(_count: usize) {}
}
