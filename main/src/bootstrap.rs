use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, indexes::ensure_vector_index, store::StorageManager},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Process exit codes shared by all binaries: 2 usage, 3 configuration,
/// 4 upstream unavailable.
pub const EXIT_CONFIG: i32 = 3;
pub const EXIT_UPSTREAM: i32 = 4;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// Load and validate configuration; refuse to start on any error.
pub fn load_config() -> AppConfig {
    let config = match common::utils::config::get_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    if let Err(err) = config.validate() {
        eprintln!("configuration error: {err}");
        std::process::exit(EXIT_CONFIG);
    }

    config
}

/// Connect to the metadata store and make sure schema and vector index
/// match the configuration.
pub async fn connect_db(config: &AppConfig) -> Arc<SurrealDbClient> {
    let db = match SurrealDbClient::new(
        &config.db_url,
        &config.db_user,
        &config.db_pass,
        &config.db_namespace,
        &config.db_database,
    )
    .await
    {
        Ok(db) => Arc::new(db),
        Err(err) => {
            eprintln!("metadata store unavailable: {err}");
            std::process::exit(EXIT_UPSTREAM);
        }
    };

    if let Err(err) = db.ensure_schema().await {
        eprintln!("schema bootstrap failed: {err}");
        std::process::exit(EXIT_UPSTREAM);
    }
    if let Err(err) = ensure_vector_index(&db, config.embed_dim, config.index_lists).await {
        eprintln!("vector index bootstrap failed: {err}");
        std::process::exit(EXIT_UPSTREAM);
    }

    db
}

pub async fn build_storage(config: &AppConfig) -> StorageManager {
    match StorageManager::new(config).await {
        Ok(storage) => storage,
        Err(err) => {
            eprintln!("object store unavailable: {err}");
            std::process::exit(EXIT_UPSTREAM);
        }
    }
}

pub fn build_embedder(config: &AppConfig) -> Arc<EmbeddingProvider> {
    match EmbeddingProvider::from_config(config) {
        Ok(provider) => Arc::new(provider),
        Err(err @ AppError::Config(_)) => {
            eprintln!("configuration error: {err}");
            std::process::exit(EXIT_CONFIG);
        }
        Err(err) => {
            eprintln!("embedding provider unavailable: {err}");
            std::process::exit(EXIT_UPSTREAM);
        }
    }
}
