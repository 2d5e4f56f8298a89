use chrono::Utc;
use serde::Deserialize;
use surrealdb::RecordId;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{chunk::Chunk, StoredObject};

stored_object!(ChunkEmbedding, "chunk_embedding", {
    /// Record link to the owning chunk; the embedding record reuses the
    /// chunk's id so upserts replace on conflict.
    chunk_id: RecordId,
    document_id: i64,
    tenant_id: String,
    embedding: Vec<f32>,
    provider_tag: String,
    dim: usize
});

/// A raw index hit before hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: i64,
    pub score: f32,
}

impl ChunkEmbedding {
    pub fn new(
        chunk: &Chunk,
        embedding: Vec<f32>,
        provider_tag: &str,
    ) -> Self {
        let now = Utc::now();
        let dim = embedding.len();
        Self {
            id: chunk.id,
            created_at: now,
            updated_at: now,
            chunk_id: RecordId::from_table_key(Chunk::table_name(), chunk.id),
            document_id: chunk.document_id,
            tenant_id: chunk.tenant_id.clone(),
            embedding,
            provider_tag: provider_tag.to_string(),
            dim,
        }
    }

    /// Replace a document's embeddings in one transaction and mark the
    /// document `ready`. Keyed by chunk id, so re-delivery of the embed
    /// stage leaves exactly one embedding per chunk.
    pub async fn replace_for_document(
        db: &SurrealDbClient,
        document_id: i64,
        rows: Vec<ChunkEmbedding>,
    ) -> Result<(), AppError> {
        db.query(
            "BEGIN TRANSACTION;
             DELETE chunk_embedding WHERE document_id = $document_id;
             INSERT INTO chunk_embedding $rows;
             UPDATE type::thing('document', $document_id) SET \
                 status = 'ready', updated_at = time::now();
             COMMIT TRANSACTION;",
        )
        .bind(("document_id", document_id))
        .bind(("rows", rows))
        .await?
        .check()?;
        Ok(())
    }

    /// Cosine top-k over the HNSW index. The tenant predicate is part of the
    /// query, so cross-tenant rows can never appear in the result. `probes`
    /// is the search-time ef hint.
    pub async fn search(
        db: &SurrealDbClient,
        tenant_id: &str,
        query_embedding: Vec<f32>,
        k: usize,
        probes: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "crate::storage::types::deserialize_numeric_id")]
            id: i64,
            score: f32,
        }

        if k == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, vector::similarity::cosine(embedding, $embedding) AS score \
             FROM {table} \
             WHERE tenant_id = $tenant \
               AND embedding <|{k},{probes}|> $embedding \
             ORDER BY score DESC \
             LIMIT {k};",
            table = Self::table_name(),
            k = k,
            probes = probes.max(1),
        );

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_embedding))
            .bind(("tenant", tenant_id.to_owned()))
            .await
            .map_err(|e| AppError::IndexUnavailable(e.to_string()))?;

        let rows: Vec<Row> = response
            .take(0)
            .map_err(|e| AppError::IndexUnavailable(e.to_string()))?;

        // Scores are similarities already; clamp into [0,1] and break ties
        // on the lower chunk id for a stable ordering.
        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .map(|row| SearchHit {
                chunk_id: row.id,
                score: row.score.clamp(0.0, 1.0),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);

        Ok(hits)
    }

    pub async fn count_for_document(
        db: &SurrealDbClient,
        document_id: i64,
    ) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: u64,
        }

        let mut response = db
            .query(
                "SELECT count() AS count FROM chunk_embedding \
                 WHERE document_id = $document_id GROUP ALL;",
            )
            .bind(("document_id", document_id))
            .await?;
        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.first().map_or(0, |r| usize::try_from(r.count).unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::indexes::ensure_vector_index;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        ensure_vector_index(&db, 3, 100)
            .await
            .expect("vector index");
        db
    }

    fn chunk(id: i64, document_id: i64, tenant: &str) -> Chunk {
        let now = Utc::now();
        Chunk {
            id,
            created_at: now,
            updated_at: now,
            document_id,
            tenant_id: tenant.to_string(),
            ordinal: id,
            page: None,
            token_count: 3,
            text: format!("chunk {id}"),
            header_path: Vec::new(),
            is_table: false,
        }
    }

    async fn seed(db: &SurrealDbClient, id: i64, tenant: &str, vector: Vec<f32>) {
        let c = chunk(id, 1, tenant);
        db.store_item(c.clone()).await.expect("store chunk");
        let row = ChunkEmbedding::new(&c, vector, "deterministic");
        db.store_item(row).await.expect("store embedding");
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let db = memory_db().await;
        seed(&db, 1, "tenant-a", vec![1.0, 0.0, 0.0]).await;
        seed(&db, 2, "tenant-a", vec![0.0, 1.0, 0.0]).await;

        let hits = ChunkEmbedding::search(&db, "tenant-a", vec![0.0, 1.0, 0.0], 2, 40)
            .await
            .expect("search");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, 2);
        assert!(hits[0].score >= hits[1].score);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }

    #[tokio::test]
    async fn test_search_never_returns_cross_tenant_hits() {
        let db = memory_db().await;
        seed(&db, 1, "tenant-a", vec![1.0, 0.0, 0.0]).await;
        seed(&db, 2, "tenant-b", vec![1.0, 0.0, 0.0]).await;

        let hits = ChunkEmbedding::search(&db, "tenant-a", vec![1.0, 0.0, 0.0], 10, 40)
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 1);
    }

    #[tokio::test]
    async fn test_replace_for_document_is_idempotent_and_marks_ready() {
        let db = memory_db().await;
        let doc = crate::storage::types::document::Document::new(
            1,
            "tenant-a".into(),
            "d.md".into(),
            "text/markdown".into(),
            1,
            "tenant-a/1/x.md".into(),
        );
        db.store_item(doc).await.expect("store doc");

        let c = chunk(7, 1, "tenant-a");
        db.store_item(c.clone()).await.expect("store chunk");

        let make = || vec![ChunkEmbedding::new(&c, vec![0.0, 0.0, 1.0], "deterministic")];
        ChunkEmbedding::replace_for_document(&db, 1, make())
            .await
            .expect("first replace");
        ChunkEmbedding::replace_for_document(&db, 1, make())
            .await
            .expect("second replace");

        assert_eq!(
            ChunkEmbedding::count_for_document(&db, 1).await.expect("count"),
            1
        );

        let status = crate::storage::types::document::Document::aggregate_status(&db, 1)
            .await
            .expect("status");
        assert_eq!(status.map(|s| s.as_str()), Some("ready"));
    }

    #[tokio::test]
    async fn test_search_with_zero_k_is_empty() {
        let db = memory_db().await;
        let hits = ChunkEmbedding::search(&db, "tenant-a", vec![1.0, 0.0, 0.0], 0, 40)
            .await
            .expect("search");
        assert!(hits.is_empty());
    }
}
