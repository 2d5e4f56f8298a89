use anyhow::{Context, Result};
use serde_json::Value;

use crate::error::AppError;

use super::db::SurrealDbClient;

pub const CHUNK_EMBEDDING_TABLE: &str = "chunk_embedding";
pub const CHUNK_EMBEDDING_INDEX: &str = "idx_embedding_chunk_embedding";

/// Ensure the HNSW vector index over chunk embeddings exists with the
/// configured dimension. When an index with a different dimension is found
/// it is overwritten; Surreal requires a fresh definition for that.
pub async fn ensure_vector_index(
    db: &SurrealDbClient,
    dimension: usize,
    efc: usize,
) -> Result<(), AppError> {
    ensure_vector_index_inner(db, dimension, efc)
        .await
        .map_err(|err| AppError::IndexUnavailable(err.to_string()))
}

async fn ensure_vector_index_inner(
    db: &SurrealDbClient,
    dimension: usize,
    efc: usize,
) -> Result<()> {
    let definition = match existing_index_dimension(db).await? {
        Some(existing) if existing == dimension => return Ok(()),
        Some(existing) => {
            tracing::info!(
                existing_dimension = existing,
                target_dimension = dimension,
                "Overwriting vector index to match new embedding dimension"
            );
            index_definition(dimension, efc, true)
        }
        None => index_definition(dimension, efc, false),
    };

    let response = db
        .client
        .query(definition)
        .await
        .context("defining chunk embedding vector index")?;
    response.check().context("vector index definition failed")?;

    Ok(())
}

fn index_definition(dimension: usize, efc: usize, overwrite: bool) -> String {
    let mode = if overwrite { "OVERWRITE" } else { "IF NOT EXISTS" };
    format!(
        "DEFINE INDEX {mode} {CHUNK_EMBEDDING_INDEX} ON TABLE {CHUNK_EMBEDDING_TABLE} \
         FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE TYPE F32 EFC {efc} M 8;"
    )
}

async fn existing_index_dimension(db: &SurrealDbClient) -> Result<Option<usize>> {
    let mut response = db
        .client
        .query(format!("INFO FOR TABLE {CHUNK_EMBEDDING_TABLE};"))
        .await
        .context("fetching chunk_embedding table info")?;

    let info: surrealdb::Value = response
        .take(0)
        .context("failed to take table info response")?;
    let info_json: Value =
        serde_json::to_value(info).context("serializing table info to JSON for parsing")?;

    let Some(definition) = info_json
        .get("Object")
        .and_then(|o| o.get("indexes"))
        .and_then(|i| i.get("Object"))
        .and_then(|i| i.get(CHUNK_EMBEDDING_INDEX))
        .and_then(|d| d.get("Strand"))
        .and_then(|v| v.as_str())
    else {
        return Ok(None);
    };

    Ok(extract_dimension(definition).and_then(|d| usize::try_from(d).ok()))
}

fn extract_dimension(definition: &str) -> Option<u64> {
    definition
        .split("DIMENSION")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(';').parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn extract_dimension_parses_value() {
        let definition = "DEFINE INDEX idx_embedding_chunk_embedding ON TABLE chunk_embedding FIELDS embedding HNSW DIMENSION 384 DIST COSINE TYPE F32 EFC 100 M 8;";
        assert_eq!(extract_dimension(definition), Some(384));
    }

    #[tokio::test]
    async fn ensure_vector_index_is_idempotent() {
        let db = SurrealDbClient::memory("indexes_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        ensure_vector_index(&db, 16, 100)
            .await
            .expect("initial index creation");
        ensure_vector_index(&db, 16, 100)
            .await
            .expect("second index creation");
    }

    #[tokio::test]
    async fn ensure_vector_index_overwrites_dimension() {
        let db = SurrealDbClient::memory("indexes_dim", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        ensure_vector_index(&db, 16, 100)
            .await
            .expect("initial index creation");
        ensure_vector_index(&db, 8, 100)
            .await
            .expect("overwritten index creation");
    }
}
