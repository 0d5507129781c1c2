use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use micro_batching::{BatcherConfig, FnProcessor, Job, JobResult, MicroBatcher};
use serde_json::json;
use tracing::{error, info, warn};

const DEMO_JOBS: usize = 10;

fn wrap_payloads(jobs: Vec<Job<String>>) -> Vec<JobResult<String>> {
    jobs.into_iter()
        .map(|job| {
            let document = json!({ "message": format!("Processed data: {}", job.payload) });
            match serde_json::to_string(&document) {
                Ok(body) => JobResult::success(job.id, body),
                Err(e) => JobResult::failure(job.id, e.to_string()),
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "micro_batching=debug,microbatch_demo=info".into()),
        )
        .with_target(false)
        .init();

    let config = BatcherConfig::from_env_with_defaults(BatcherConfig::new(
        3,
        Duration::from_secs(2),
        Duration::from_secs(10),
    ))
    .context("invalid batcher configuration")?;

    info!(
        batch_size = config.batch_size,
        batch_interval_ms = config.batch_interval.as_millis() as u64,
        result_ttl_secs = config.result_ttl.as_secs(),
        "Starting micro-batching demo"
    );

    let batcher = MicroBatcher::with_config(Arc::new(FnProcessor::new(wrap_payloads)), config)?;

    let mut readers = Vec::with_capacity(DEMO_JOBS);
    for i in 1..=DEMO_JOBS {
        let job = Job::new(i.to_string(), format!("data {i}"));
        let mut receiver = match batcher.submit_job(job).await {
            Ok(receiver) => receiver,
            Err(e) if e.is_rejection() => {
                warn!(job_id = i, "Engine stopped accepting jobs");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        readers.push(tokio::spawn(async move {
            match receiver.recv().await {
                Some(result) if result.success => {
                    info!(job_id = %result.job_id, payload = %result.payload, "Job completed");
                }
                Some(result) => {
                    error!(
                        job_id = %result.job_id,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Job failed"
                    );
                }
                None => {
                    error!(job_id = %receiver.job_id(), "Result conduit closed without a result");
                }
            }
        }));
    }

    batcher.shutdown().await;

    for reader in readers {
        reader.await.context("result reader panicked")?;
    }

    info!("Micro-batching demo finished");
    Ok(())
}
