mod bootstrap;

use std::sync::Arc;

use ingestion_pipeline::JobRunner;
use realtime::bus::bus_from_config;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();
    let config = bootstrap::load_config();

    let db = bootstrap::connect_db(&config).await;
    let storage = bootstrap::build_storage(&config).await;
    let embedder = bootstrap::build_embedder(&config);
    let bus = bus_from_config(&config, &db);

    let runner = Arc::new(JobRunner::new(db, storage, embedder, bus, config));

    info!("Starting ingestion workers");
    let handles = ingestion_pipeline::spawn_workers(runner);
    for handle in handles {
        handle.await?;
    }

    Ok(())
}
