mod bootstrap;

use std::sync::Arc;

use api_router::api_state::ApiState;
use ingestion_pipeline::JobRunner;
use realtime::bus::bus_from_config;
use retrieval_pipeline::{
    answer::AnswerOrchestrator, reranking::RerankerProvider, Retriever, RetrieverConfig,
};
use tracing::info;

/// All-in-one process: HTTP facade and pipeline workers side by side. The
/// in-memory bus works here because publishers and subscribers share the
/// process.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();
    let config = bootstrap::load_config();

    let db = bootstrap::connect_db(&config).await;
    let storage = bootstrap::build_storage(&config).await;
    let embedder = bootstrap::build_embedder(&config);
    let bus = bus_from_config(&config, &db);

    let reranker = RerankerProvider::maybe_from_config(&config)?;
    let retriever = Arc::new(Retriever::new(
        Arc::clone(&db),
        Arc::clone(&embedder),
        reranker,
        RetrieverConfig::from_config(&config),
    ));
    let orchestrator = Arc::new(AnswerOrchestrator::from_config(
        Arc::clone(&db),
        Arc::clone(&retriever),
        &config,
    ));

    let runner = Arc::new(JobRunner::new(
        Arc::clone(&db),
        storage.clone(),
        Arc::clone(&embedder),
        Arc::clone(&bus),
        config.clone(),
    ));
    let worker_handles = ingestion_pipeline::spawn_workers(runner);

    let state = ApiState::new(db, storage, retriever, orchestrator, bus, config.clone());
    let app = api_router::router(state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting combined server and workers on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    for handle in worker_handles {
        handle.abort();
    }

    Ok(())
}
