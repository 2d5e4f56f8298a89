use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::StoredObject;

stored_object!(Chunk, "chunk", {
    document_id: i64,
    tenant_id: String,
    /// Monotonic retrieval order within the document.
    ordinal: i64,
    page: Option<u32>,
    token_count: usize,
    text: String,
    /// Ancestor headings from the document root down to the chunk start.
    header_path: Vec<String>,
    is_table: bool
});

impl Chunk {
    /// Replace a document's chunks in one transaction: stale chunks and
    /// their embeddings go away together and the document advances to
    /// `embedding`. Re-running the chunk stage converges to the same rows.
    pub async fn replace_for_document(
        db: &SurrealDbClient,
        document_id: i64,
        chunks: Vec<Chunk>,
    ) -> Result<(), AppError> {
        db.query(
            "BEGIN TRANSACTION;
             DELETE chunk_embedding WHERE document_id = $document_id;
             DELETE chunk WHERE document_id = $document_id;
             INSERT INTO chunk $chunks;
             UPDATE type::thing('document', $document_id) SET \
                 status = 'embedding', updated_at = time::now();
             COMMIT TRANSACTION;",
        )
        .bind(("document_id", document_id))
        .bind(("chunks", chunks))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn for_document(
        db: &SurrealDbClient,
        document_id: i64,
    ) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<Self> = db
            .query("SELECT * FROM chunk WHERE document_id = $document_id ORDER BY ordinal ASC")
            .bind(("document_id", document_id))
            .await?
            .take(0)?;
        Ok(chunks)
    }

    /// Hydrate chunks by id for one tenant. Rows belonging to other tenants
    /// are silently absent from the result.
    pub async fn get_by_ids(
        db: &SurrealDbClient,
        tenant_id: &str,
        ids: &[i64],
    ) -> Result<Vec<Self>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let record_ids: Vec<surrealdb::RecordId> = ids
            .iter()
            .map(|id| surrealdb::RecordId::from_table_key(Self::table_name(), *id))
            .collect();

        let chunks: Vec<Self> = db
            .query("SELECT * FROM chunk WHERE tenant_id = $tenant AND id IN $ids")
            .bind(("tenant", tenant_id.to_owned()))
            .bind(("ids", record_ids))
            .await?
            .take(0)?;
        Ok(chunks)
    }

    pub async fn get_for_tenant(
        db: &SurrealDbClient,
        id: i64,
        tenant_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let chunk: Option<Self> = db.get_item(id).await?;
        Ok(chunk.filter(|c| c.tenant_id == tenant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    pub(crate) fn chunk(id: i64, document_id: i64, ordinal: i64, text: &str) -> Chunk {
        let now = chrono::Utc::now();
        Chunk {
            id,
            created_at: now,
            updated_at: now,
            document_id,
            tenant_id: "tenant-a".to_string(),
            ordinal,
            page: Some(1),
            token_count: 12,
            text: text.to_string(),
            header_path: vec!["Intro".to_string()],
            is_table: false,
        }
    }

    #[tokio::test]
    async fn test_replace_and_load() {
        let db = memory_db().await;

        Chunk::replace_for_document(&db, 1, vec![chunk(11, 1, 0, "a"), chunk(12, 1, 1, "b")])
            .await
            .expect("replace");

        let loaded = Chunk::for_document(&db, 1).await.expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].ordinal, 0);
        assert_eq!(loaded[1].ordinal, 1);
    }

    #[tokio::test]
    async fn test_replace_removes_stale_embeddings() {
        let db = memory_db().await;

        Chunk::replace_for_document(&db, 2, vec![chunk(21, 2, 0, "old")])
            .await
            .expect("replace");
        db.query("CREATE chunk_embedding:21 SET document_id = 2, tenant_id = 'tenant-a';")
            .await
            .expect("seed embedding");

        Chunk::replace_for_document(&db, 2, vec![chunk(22, 2, 0, "new")])
            .await
            .expect("second replace");

        let embeddings: Vec<serde_json::Value> = db
            .query("SELECT * FROM chunk_embedding WHERE document_id = 2")
            .await
            .expect("query")
            .take(0)
            .unwrap_or_default();
        assert!(
            embeddings.is_empty(),
            "chunk replacement must drop stale embeddings"
        );

        let chunks = Chunk::for_document(&db, 2).await.expect("load");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "new");
    }

    #[tokio::test]
    async fn test_get_by_ids_is_tenant_scoped() {
        let db = memory_db().await;

        let mut foreign = chunk(31, 3, 0, "foreign");
        foreign.tenant_id = "tenant-b".to_string();
        Chunk::replace_for_document(&db, 3, vec![foreign])
            .await
            .expect("replace");
        Chunk::replace_for_document(&db, 4, vec![chunk(41, 4, 0, "mine")])
            .await
            .expect("replace");

        let found = Chunk::get_by_ids(&db, "tenant-a", &[31, 41])
            .await
            .expect("get");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 41);

        assert!(Chunk::get_for_tenant(&db, 31, "tenant-a")
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn test_get_by_ids_empty_input() {
        let db = memory_db().await;
        let found = Chunk::get_by_ids(&db, "tenant-a", &[]).await.expect("get");
        assert!(found.is_empty());
    }
}
