use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Parse,
    Chunk,
    Embed,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Chunk => "chunk",
            Self::Embed => "embed",
        }
    }

    /// The stage enqueued when this one succeeds.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Parse => Some(Self::Chunk),
            Self::Chunk => Some(Self::Embed),
            Self::Embed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

stored_object!(Job, "job", {
    document_id: i64,
    tenant_id: String,
    kind: JobKind,
    status: JobStatus,
    progress: u8,
    error: Option<String>,
    attempts: u32,
    #[serde(
        serialize_with = "crate::storage::types::serialize_datetime",
        deserialize_with = "crate::storage::types::deserialize_datetime",
        default
    )]
    run_at: DateTime<Utc>,
    worker_id: Option<String>
});

impl Job {
    /// Enqueue a job for `(document_id, kind)`. Returns `None` without
    /// writing when a queued or running job of the same kind already exists
    /// for the document, preserving the single-non-terminal-job invariant.
    pub async fn enqueue(
        db: &SurrealDbClient,
        document_id: i64,
        tenant_id: &str,
        kind: JobKind,
    ) -> Result<Option<Self>, AppError> {
        let open: Vec<Self> = db
            .query(
                "SELECT * FROM job \
                 WHERE document_id = $document_id AND kind = $kind \
                   AND status IN ['queued', 'running'] \
                 LIMIT 1",
            )
            .bind(("document_id", document_id))
            .bind(("kind", kind))
            .await?
            .take(0)?;

        if !open.is_empty() {
            return Ok(None);
        }

        let now = Utc::now();
        let job = Self {
            id: db.next_id("job").await?,
            created_at: now,
            updated_at: now,
            document_id,
            tenant_id: tenant_id.to_string(),
            kind,
            status: JobStatus::Queued,
            progress: 0,
            error: None,
            attempts: 0,
            run_at: now,
            worker_id: None,
        };

        db.store_item(job.clone()).await?;
        Ok(Some(job))
    }

    /// Atomically claim the oldest ready job of a kind. The claim is a
    /// conditional update on a single record (`WHERE status = 'queued'`), so
    /// two workers racing for the same job see exactly one winner. Claiming
    /// also counts the attempt.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        kind: JobKind,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, AppError> {
        let candidates: Vec<Self> = db
            .query(
                "SELECT * FROM job \
                 WHERE kind = $kind AND status = 'queued' AND run_at <= $now \
                 ORDER BY created_at ASC LIMIT 4",
            )
            .bind(("kind", kind))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .await?
            .take(0)?;

        for candidate in candidates {
            let claimed: Vec<Self> = db
                .query(
                    "UPDATE type::thing('job', $id) SET \
                         status = 'running', \
                         worker_id = $worker_id, \
                         progress = 0, \
                         attempts += 1, \
                         updated_at = time::now() \
                     WHERE status = 'queued' \
                     RETURN AFTER",
                )
                .bind(("id", candidate.id))
                .bind(("worker_id", worker_id.to_owned()))
                .await?
                .take(0)?;

            if let Some(job) = claimed.into_iter().next() {
                return Ok(Some(job));
            }
            // Lost the race for this candidate; try the next one.
        }

        Ok(None)
    }

    pub async fn update_progress(
        db: &SurrealDbClient,
        id: i64,
        progress: u8,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('job', $id) SET \
                 progress = $progress, updated_at = time::now() \
             WHERE status = 'running';",
        )
        .bind(("id", id))
        .bind(("progress", progress.min(100)))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn finalize_ok(db: &SurrealDbClient, id: i64) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('job', $id) SET \
                 status = 'done', progress = 100, error = NONE, updated_at = time::now();",
        )
        .bind(("id", id))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn finalize_err(
        db: &SurrealDbClient,
        id: i64,
        error: &str,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('job', $id) SET \
                 status = 'failed', error = $error, updated_at = time::now();",
        )
        .bind(("id", id))
        .bind(("error", error.to_owned()))
        .await?
        .check()?;
        Ok(())
    }

    /// Put a failed attempt back on the queue, not claimable before `delay`
    /// has elapsed.
    pub async fn requeue_with_backoff(
        db: &SurrealDbClient,
        id: i64,
        error: &str,
        delay: Duration,
    ) -> Result<(), AppError> {
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));
        db.query(
            "UPDATE type::thing('job', $id) SET \
                 status = 'queued', error = $error, worker_id = NONE, \
                 run_at = $run_at, updated_at = time::now();",
        )
        .bind(("id", id))
        .bind(("error", error.to_owned()))
        .bind(("run_at", surrealdb::sql::Datetime::from(run_at)))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn for_document(
        db: &SurrealDbClient,
        document_id: i64,
    ) -> Result<Vec<Self>, AppError> {
        let jobs: Vec<Self> = db
            .query("SELECT * FROM job WHERE document_id = $document_id ORDER BY id ASC")
            .bind(("document_id", document_id))
            .await?
            .take(0)?;
        Ok(jobs)
    }

    pub async fn get_for_tenant(
        db: &SurrealDbClient,
        id: i64,
        tenant_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let job: Option<Self> = db.get_item(id).await?;
        Ok(job.filter(|j| j.tenant_id == tenant_id))
    }

    pub fn can_retry(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_enqueue_and_claim_roundtrip() {
        let db = memory_db().await;

        let job = Job::enqueue(&db, 1, "tenant-a", JobKind::Parse)
            .await
            .expect("enqueue")
            .expect("job created");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);

        let claimed = Job::claim_next_ready(&db, JobKind::Parse, "worker-1", Utc::now())
            .await
            .expect("claim")
            .expect("job claimable");
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));

        let second = Job::claim_next_ready(&db, JobKind::Parse, "worker-2", Utc::now())
            .await
            .expect("claim");
        assert!(second.is_none(), "a running job must not be claimed twice");
    }

    #[tokio::test]
    async fn test_enqueue_is_single_flight_per_document_kind() {
        let db = memory_db().await;

        let first = Job::enqueue(&db, 1, "tenant-a", JobKind::Parse)
            .await
            .expect("enqueue");
        let second = Job::enqueue(&db, 1, "tenant-a", JobKind::Parse)
            .await
            .expect("enqueue");
        assert!(first.is_some());
        assert!(second.is_none(), "duplicate open job must not be created");

        // A different kind for the same document is fine.
        let other_kind = Job::enqueue(&db, 1, "tenant-a", JobKind::Chunk)
            .await
            .expect("enqueue");
        assert!(other_kind.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let db = Arc::new(memory_db().await);
        Job::enqueue(&db, 1, "tenant-a", JobKind::Embed)
            .await
            .expect("enqueue");

        let mut handles = Vec::new();
        for n in 0..4 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                Job::claim_next_ready(&db, JobKind::Embed, &format!("worker-{n}"), Utc::now())
                    .await
                    .expect("claim")
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join").is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one worker may win the claim");
    }

    #[tokio::test]
    async fn test_requeue_respects_backoff_window() {
        let db = memory_db().await;
        let job = Job::enqueue(&db, 2, "tenant-a", JobKind::Parse)
            .await
            .expect("enqueue")
            .expect("job");

        Job::claim_next_ready(&db, JobKind::Parse, "worker-1", Utc::now())
            .await
            .expect("claim")
            .expect("claimable");
        Job::requeue_with_backoff(&db, job.id, "transient", Duration::from_secs(60))
            .await
            .expect("requeue");

        let early = Job::claim_next_ready(&db, JobKind::Parse, "worker-1", Utc::now())
            .await
            .expect("claim");
        assert!(early.is_none(), "job must stay invisible until run_at");

        let later = Utc::now() + chrono::Duration::seconds(120);
        let reclaimed = Job::claim_next_ready(&db, JobKind::Parse, "worker-1", later)
            .await
            .expect("claim")
            .expect("claimable after backoff");
        assert_eq!(reclaimed.id, job.id);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn test_finalize_records_terminal_states() {
        let db = memory_db().await;
        let job = Job::enqueue(&db, 3, "tenant-a", JobKind::Chunk)
            .await
            .expect("enqueue")
            .expect("job");

        Job::update_progress(&db, job.id, 40).await.expect("progress");
        Job::finalize_ok(&db, job.id).await.expect("finalize");

        let done: Option<Job> = db.get_item(job.id).await.expect("fetch");
        let done = done.expect("exists");
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.progress, 100);
        assert!(done.error.is_none());

        let failed_job = Job::enqueue(&db, 4, "tenant-a", JobKind::Chunk)
            .await
            .expect("enqueue")
            .expect("job");
        Job::finalize_err(&db, failed_job.id, "ParseFailed: empty document")
            .await
            .expect("finalize err");
        let failed: Option<Job> = db.get_item(failed_job.id).await.expect("fetch");
        let failed = failed.expect("exists");
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.error.as_deref(),
            Some("ParseFailed: empty document")
        );
    }

    #[tokio::test]
    async fn test_for_document_orders_by_id() {
        let db = memory_db().await;
        Job::enqueue(&db, 9, "tenant-a", JobKind::Parse)
            .await
            .expect("enqueue");
        Job::enqueue(&db, 9, "tenant-a", JobKind::Chunk)
            .await
            .expect("enqueue");
        Job::enqueue(&db, 9, "tenant-a", JobKind::Embed)
            .await
            .expect("enqueue");

        let jobs = Job::for_document(&db, 9).await.expect("list");
        assert_eq!(jobs.len(), 3);
        assert!(jobs.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_kind_ordering() {
        assert_eq!(JobKind::Parse.next(), Some(JobKind::Chunk));
        assert_eq!(JobKind::Chunk.next(), Some(JobKind::Embed));
        assert_eq!(JobKind::Embed.next(), None);
    }
}
