use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    utils::config::{AppConfig, BusKind},
};
use futures::{Stream, StreamExt};
use surrealdb::Action;
use tokio::sync::broadcast;
use tracing::warn;

use crate::event::JobEvent;

const BROADCAST_CAPACITY: usize = 1024;

pub type EventStream = Pin<Box<dyn Stream<Item = JobEvent> + Send>>;

/// Tenant topic name. Topics exist implicitly; publishing to a topic nobody
/// listens on is not an error.
pub fn topic(tenant_id: &str) -> String {
    format!("{tenant_id}.jobs")
}

/// Pub/sub contract between pipeline workers and realtime subscribers.
///
/// Delivery is at-most-once to live subscribers, from subscription time
/// forward. Publishing is best-effort: failures bump a counter and are
/// swallowed, because progress events are advisory and must never break the
/// pipeline. A subscriber stream for tenant A only ever yields payloads
/// whose `tenant_id` is A.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: JobEvent);

    async fn subscribe(&self, tenant_id: &str) -> Result<EventStream, AppError>;

    /// Number of publishes that could not be delivered to the transport.
    fn dropped_publishes(&self) -> u64;
}

/// In-process bus: one broadcast channel per tenant topic. Suitable for
/// single-process deployments and tests.
pub struct InMemoryEventBus {
    topics: Mutex<HashMap<String, broadcast::Sender<JobEvent>>>,
    dropped: AtomicU64,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        }
    }

    fn sender(&self, tenant_id: &str) -> broadcast::Sender<JobEvent> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic(tenant_id))
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: JobEvent) {
        // A send error only means nobody is subscribed right now.
        let _ = self.sender(&event.tenant_id).send(event);
    }

    async fn subscribe(&self, tenant_id: &str) -> Result<EventStream, AppError> {
        let mut receiver = self.sender(tenant_id).subscribe();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event bus subscriber lagged; events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }

    fn dropped_publishes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Cross-process bus on the shared metadata store: a publish inserts a row
/// into `job_event` and subscribers follow the table with a live query.
/// Workers and API processes only need their existing DB connection.
pub struct DatabaseEventBus {
    db: Arc<SurrealDbClient>,
    dropped: AtomicU64,
}

impl DatabaseEventBus {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self {
            db,
            dropped: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl EventBus for DatabaseEventBus {
    async fn publish(&self, event: JobEvent) {
        let result = self
            .db
            .query("CREATE job_event CONTENT $event;")
            .bind(("event", event))
            .await;

        match result.map(surrealdb::Response::check) {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "event publish rejected; event dropped");
            }
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "event publish failed; event dropped");
            }
        }
    }

    async fn subscribe(&self, tenant_id: &str) -> Result<EventStream, AppError> {
        let tenant = tenant_id.to_string();
        let mut notifications = self
            .db
            .client
            .select::<Vec<JobEvent>>("job_event")
            .live()
            .await
            .map_err(|e| AppError::BusUnavailable(e.to_string()))?;

        // The live query covers the whole table; the tenant filter here is
        // the isolation boundary for subscribers.
        let stream = async_stream::stream! {
            while let Some(notification) = notifications.next().await {
                match notification {
                    Ok(notification) if matches!(notification.action, Action::Create) => {
                        if notification.data.tenant_id == tenant {
                            yield notification.data;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "live query notification error");
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }

    fn dropped_publishes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Select the bus implementation for this process.
pub fn bus_from_config(cfg: &AppConfig, db: &Arc<SurrealDbClient>) -> Arc<dyn EventBus> {
    match cfg.bus {
        BusKind::Memory => Arc::new(InMemoryEventBus::new()),
        BusKind::Database => Arc::new(DatabaseEventBus::new(Arc::clone(db))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::job::{Job, JobKind, JobStatus};
    use std::time::Duration;
    use uuid::Uuid;

    fn job(id: i64, tenant: &str) -> Job {
        let now = chrono::Utc::now();
        Job {
            id,
            created_at: now,
            updated_at: now,
            document_id: 1,
            tenant_id: tenant.to_string(),
            kind: JobKind::Parse,
            status: JobStatus::Running,
            progress: 0,
            error: None,
            attempts: 1,
            run_at: now,
            worker_id: None,
        }
    }

    async fn next_with_timeout(stream: &mut EventStream) -> Option<JobEvent> {
        tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn memory_bus_delivers_to_subscriber() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe("tenant-a").await.expect("subscribe");

        bus.publish(JobEvent::started(&job(1, "tenant-a"))).await;

        let event = next_with_timeout(&mut stream).await.expect("event");
        assert_eq!(event.event, "parse_started");
        assert_eq!(event.tenant_id, "tenant-a");
    }

    #[tokio::test]
    async fn memory_bus_isolates_tenants() {
        let bus = InMemoryEventBus::new();
        let mut stream_a = bus.subscribe("tenant-a").await.expect("subscribe");

        bus.publish(JobEvent::started(&job(1, "tenant-b"))).await;
        bus.publish(JobEvent::started(&job(2, "tenant-a"))).await;

        let event = next_with_timeout(&mut stream_a).await.expect("event");
        assert_eq!(
            event.tenant_id, "tenant-a",
            "tenant A must never observe tenant B payloads"
        );
        assert_eq!(event.job_id, 2);
    }

    #[tokio::test]
    async fn memory_bus_publish_without_subscribers_is_fine() {
        let bus = InMemoryEventBus::new();
        bus.publish(JobEvent::started(&job(1, "tenant-a"))).await;
        assert_eq!(bus.dropped_publishes(), 0);
    }

    #[tokio::test]
    async fn subscribers_only_see_events_from_subscription_forward() {
        let bus = InMemoryEventBus::new();
        bus.publish(JobEvent::started(&job(1, "tenant-a"))).await;

        let mut stream = bus.subscribe("tenant-a").await.expect("subscribe");
        bus.publish(JobEvent::done(&job(2, "tenant-a"))).await;

        let event = next_with_timeout(&mut stream).await.expect("event");
        assert_eq!(event.job_id, 2, "no replay of events published earlier");
    }

    #[tokio::test]
    async fn database_bus_roundtrip_and_isolation() {
        let db = Arc::new(
            SurrealDbClient::memory("bus_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory db"),
        );
        let bus = DatabaseEventBus::new(Arc::clone(&db));

        let mut stream = bus.subscribe("tenant-a").await.expect("subscribe");
        // Give the live query a moment to register before publishing.
        tokio::time::sleep(Duration::from_millis(50)).await;

        bus.publish(JobEvent::started(&job(9, "tenant-b"))).await;
        bus.publish(JobEvent::started(&job(10, "tenant-a"))).await;

        let event = next_with_timeout(&mut stream).await.expect("event");
        assert_eq!(event.tenant_id, "tenant-a");
        assert_eq!(event.job_id, 10);
        assert_eq!(bus.dropped_publishes(), 0);
    }
}
