#![allow(clippy::missing_docs_in_private_items)]

pub mod chunker;
pub mod parser;
pub mod pipeline;

use std::sync::Arc;

use chrono::Utc;
use common::storage::types::job::{Job, JobKind};
pub use pipeline::JobRunner;
use tokio::time::{sleep, Duration};
use tracing::{error, info};
use uuid::Uuid;

const IDLE_BACKOFF: Duration = Duration::from_millis(500);
const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Claim-and-process loop for one queue kind. Runs until the task is
/// aborted; stage failures are handled inside the runner and logged here.
pub async fn run_worker_loop(runner: Arc<JobRunner>, kind: JobKind) {
    let worker_id = format!("{}-worker-{}", kind.as_str(), Uuid::new_v4());
    info!(%worker_id, "worker started");

    loop {
        match Job::claim_next_ready(&runner.db, kind, &worker_id, Utc::now()).await {
            Ok(Some(job)) => {
                let job_id = job.id;
                info!(%worker_id, job_id, attempt = job.attempts, "claimed job");
                if let Err(err) = runner.process(job).await {
                    error!(%worker_id, job_id, error = %err, "job processing failed");
                }
            }
            Ok(None) => {
                sleep(IDLE_BACKOFF).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim job; backing off");
                sleep(CLAIM_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Spawn one worker per queue kind and return their task handles.
pub fn spawn_workers(runner: Arc<JobRunner>) -> Vec<tokio::task::JoinHandle<()>> {
    [JobKind::Parse, JobKind::Chunk, JobKind::Embed]
        .into_iter()
        .map(|kind| {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { run_worker_loop(runner, kind).await })
        })
        .collect()
}
