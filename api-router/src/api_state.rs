use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::AppConfig,
};
use realtime::bus::EventBus;
use retrieval_pipeline::{answer::AnswerOrchestrator, Retriever};

/// Shared state for every API handler. Cheap to clone; everything heavy is
/// behind an Arc.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub storage: StorageManager,
    pub retriever: Arc<Retriever>,
    pub orchestrator: Arc<AnswerOrchestrator>,
    pub bus: Arc<dyn EventBus>,
    pub config: AppConfig,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        retriever: Arc<Retriever>,
        orchestrator: Arc<AnswerOrchestrator>,
        bus: Arc<dyn EventBus>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            storage,
            retriever,
            orchestrator,
            bus,
            config,
        }
    }
}

/// The authenticated tenant, resolved by the auth middleware and attached
/// as a request extension.
#[derive(Clone, Debug)]
pub struct TenantId(pub String);
