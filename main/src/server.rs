mod bootstrap;

use std::sync::Arc;

use api_router::api_state::ApiState;
use realtime::bus::bus_from_config;
use retrieval_pipeline::{
    answer::AnswerOrchestrator, reranking::RerankerProvider, Retriever, RetrieverConfig,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();
    let config = bootstrap::load_config();

    let db = bootstrap::connect_db(&config).await;
    let storage = bootstrap::build_storage(&config).await;
    let embedder = bootstrap::build_embedder(&config);
    info!(
        embedding_backend = embedder.backend_label(),
        embedding_dimension = embedder.dimension(),
        "Embedding provider initialized"
    );

    let reranker = RerankerProvider::maybe_from_config(&config)?;
    let retriever = Arc::new(Retriever::new(
        Arc::clone(&db),
        embedder,
        reranker,
        RetrieverConfig::from_config(&config),
    ));
    let orchestrator = Arc::new(AnswerOrchestrator::from_config(
        Arc::clone(&db),
        Arc::clone(&retriever),
        &config,
    ));
    let bus = bus_from_config(&config, &db);

    let state = ApiState::new(db, storage, retriever, orchestrator, bus, config.clone());
    let app = api_router::router(state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
