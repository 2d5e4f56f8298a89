use chrono::{DateTime, Utc};
use common::storage::types::job::{Job, JobKind};
use serde::{Deserialize, Serialize};

/// Wire payload for job lifecycle events, shared by the bus and the
/// WebSocket gateway. `ts` is RFC3339 UTC. Events are advisory; the
/// metadata store stays authoritative for job state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    pub event: String,
    pub job_id: i64,
    pub document_id: i64,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<JobKind>,
    pub progress: u8,
    pub error: Option<String>,
    pub ts: DateTime<Utc>,
}

impl JobEvent {
    fn for_job(job: &Job, suffix: &str, progress: u8, error: Option<String>) -> Self {
        Self {
            event: format!("{}_{suffix}", job.kind.as_str()),
            job_id: job.id,
            document_id: job.document_id,
            tenant_id: job.tenant_id.clone(),
            kind: Some(job.kind),
            progress,
            error,
            ts: Utc::now(),
        }
    }

    pub fn started(job: &Job) -> Self {
        Self::for_job(job, "started", 0, None)
    }

    pub fn progress(job: &Job, progress: u8) -> Self {
        Self::for_job(job, "progress", progress.min(100), None)
    }

    pub fn done(job: &Job) -> Self {
        Self::for_job(job, "done", 100, None)
    }

    pub fn failed(job: &Job, error: &str) -> Self {
        Self::for_job(job, "failed", job.progress, Some(error.to_string()))
    }

    /// Greeting sent once per accepted WebSocket connection.
    pub fn connected(tenant_id: &str) -> Self {
        Self {
            event: "connected".to_string(),
            job_id: 0,
            document_id: 0,
            tenant_id: tenant_id.to_string(),
            kind: None,
            progress: 0,
            error: None,
            ts: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(kind: JobKind) -> Job {
        let now = Utc::now();
        Job {
            id: 5,
            created_at: now,
            updated_at: now,
            document_id: 3,
            tenant_id: "tenant-a".to_string(),
            kind,
            status: common::storage::types::job::JobStatus::Running,
            progress: 40,
            error: None,
            attempts: 1,
            run_at: now,
            worker_id: Some("worker-1".to_string()),
        }
    }

    #[test]
    fn event_names_follow_kind_and_phase() {
        assert_eq!(JobEvent::started(&job(JobKind::Parse)).event, "parse_started");
        assert_eq!(JobEvent::progress(&job(JobKind::Chunk), 50).event, "chunk_progress");
        assert_eq!(JobEvent::done(&job(JobKind::Embed)).event, "embed_done");
        assert_eq!(
            JobEvent::failed(&job(JobKind::Parse), "boom").event,
            "parse_failed"
        );
    }

    #[test]
    fn serialized_payload_matches_schema() {
        let event = JobEvent::done(&job(JobKind::Embed));
        let value = serde_json::to_value(&event).expect("serialize");

        assert_eq!(value["event"], "embed_done");
        assert_eq!(value["job_id"], 5);
        assert_eq!(value["document_id"], 3);
        assert_eq!(value["tenant_id"], "tenant-a");
        assert_eq!(value["kind"], "embed");
        assert_eq!(value["progress"], 100);
        assert!(value["error"].is_null());
        assert!(value["ts"].as_str().is_some(), "ts must be an RFC3339 string");
    }

    #[test]
    fn connected_event_omits_kind() {
        let value = serde_json::to_value(JobEvent::connected("tenant-a")).expect("serialize");
        assert_eq!(value["event"], "connected");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn progress_is_capped_at_hundred() {
        assert_eq!(JobEvent::progress(&job(JobKind::Parse), 250).progress, 100);
    }
}
