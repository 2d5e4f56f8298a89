mod stages;

use std::sync::{atomic::AtomicU8, atomic::Ordering, Arc};
use std::time::Duration;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            document::{Document, DocumentStatus},
            job::{Job, JobKind},
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use realtime::{bus::EventBus, event::JobEvent};
use tracing::{debug, warn};

use crate::{chunker::ChunkerConfig, parser::ParserConfig};

/// Executes claimed jobs: runs the stage routine, reports progress, commits
/// outputs, and schedules the next stage or a retry.
pub struct JobRunner {
    pub(crate) db: Arc<SurrealDbClient>,
    pub(crate) storage: StorageManager,
    pub(crate) embedder: Arc<EmbeddingProvider>,
    pub(crate) bus: Arc<dyn EventBus>,
    pub(crate) config: AppConfig,
    pub(crate) parser_config: ParserConfig,
    pub(crate) chunker_config: ChunkerConfig,
}

impl JobRunner {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        embedder: Arc<EmbeddingProvider>,
        bus: Arc<dyn EventBus>,
        config: AppConfig,
    ) -> Self {
        let parser_config = ParserConfig::from_config(&config);
        let chunker_config = ChunkerConfig::from_config(&config);
        Self {
            db,
            storage,
            embedder,
            bus,
            config,
            parser_config,
            chunker_config,
        }
    }

    /// Drive one claimed job to a terminal or requeued state.
    ///
    /// Success commits stage outputs (already done inside the stage), marks
    /// the job done and enqueues the successor stage. Retryable failures go
    /// back on the queue with capped exponential backoff; terminal failures
    /// are recorded on the job and the document.
    #[tracing::instrument(
        skip_all,
        fields(
            job_id = job.id,
            document_id = job.document_id,
            kind = job.kind.as_str(),
            attempt = job.attempts,
            worker_id = job.worker_id.as_deref().unwrap_or("unknown-worker")
        )
    )]
    pub async fn process(&self, job: Job) -> Result<(), AppError> {
        self.bus.publish(JobEvent::started(&job)).await;
        let progress = ProgressReporter::new(self, &job);

        let outcome = match job.kind {
            JobKind::Parse => stages::run_parse(self, &job, &progress).await,
            JobKind::Chunk => stages::run_chunk(self, &job, &progress).await,
            JobKind::Embed => stages::run_embed(self, &job, &progress).await,
        };

        match outcome {
            Ok(()) => {
                Job::finalize_ok(&self.db, job.id).await?;
                self.bus.publish(JobEvent::done(&job)).await;

                if let Some(next) = job.kind.next() {
                    Job::enqueue(&self.db, job.document_id, &job.tenant_id, next).await?;
                }

                tracing::info!(job_id = job.id, kind = job.kind.as_str(), "job succeeded");
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();

                if err.is_retryable() && job.can_retry(self.config.max_attempts) {
                    let delay = self.retry_delay(job.attempts);
                    Job::requeue_with_backoff(&self.db, job.id, &reason, delay).await?;
                    warn!(
                        job_id = job.id,
                        attempt = job.attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %reason,
                        "job failed; scheduled retry"
                    );
                } else {
                    Job::finalize_err(&self.db, job.id, &reason).await?;
                    Document::set_status(&self.db, job.document_id, DocumentStatus::Failed)
                        .await?;
                    self.bus.publish(JobEvent::failed(&job, &reason)).await;
                    warn!(
                        job_id = job.id,
                        attempt = job.attempts,
                        error = %reason,
                        "job failed terminally"
                    );
                }

                Err(err)
            }
        }
    }

    /// Capped exponential backoff from the retry settings; attempt counts
    /// from 1.
    pub(crate) fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .config
            .backoff_base_ms
            .saturating_mul(2_u64.saturating_pow(exponent));
        Duration::from_millis(delay.min(self.config.backoff_max_ms))
    }
}

/// Publishes monotonic progress for one job: updates the authoritative row
/// and emits an advisory bus event. Regressing percentages are ignored.
pub struct ProgressReporter<'a> {
    runner: &'a JobRunner,
    job: &'a Job,
    last: AtomicU8,
}

impl<'a> ProgressReporter<'a> {
    fn new(runner: &'a JobRunner, job: &'a Job) -> Self {
        Self {
            runner,
            job,
            last: AtomicU8::new(0),
        }
    }

    pub async fn report(&self, percent: u8) {
        let percent = percent.min(100);
        if self.last.fetch_max(percent, Ordering::Relaxed) >= percent {
            return;
        }

        if let Err(err) = Job::update_progress(&self.runner.db, self.job.id, percent).await {
            debug!(job_id = self.job.id, error = %err, "progress update failed");
        }
        self.runner
            .bus
            .publish(JobEvent::progress(self.job, percent))
            .await;
    }
}
