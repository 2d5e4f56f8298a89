use std::ops::Deref;

use serde::Deserialize;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

use crate::error::AppError;

use super::types::StoredObject;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connect and authenticate against a running SurrealDB instance.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define the lookup indexes the data plane relies on. Idempotent; the
    /// vector index is handled separately because its definition depends on
    /// the configured embedding dimension.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_job_kind_status ON TABLE job FIELDS kind, status;
                 DEFINE INDEX IF NOT EXISTS idx_job_document ON TABLE job FIELDS document_id;
                 DEFINE INDEX IF NOT EXISTS idx_document_tenant ON TABLE document FIELDS tenant_id;
                 DEFINE INDEX IF NOT EXISTS idx_element_document ON TABLE element FIELDS document_id;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_document ON TABLE chunk FIELDS document_id;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_tenant ON TABLE chunk FIELDS tenant_id;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_embedding_tenant ON TABLE chunk_embedding FIELDS tenant_id;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_embedding_document ON TABLE chunk_embedding FIELDS document_id;
                 DEFINE INDEX IF NOT EXISTS idx_job_event_tenant ON TABLE job_event FIELDS tenant_id;
                 DEFINE INDEX IF NOT EXISTS idx_usage_tenant ON TABLE usage_record FIELDS tenant_id;",
            )
            .await?;

        Ok(())
    }

    /// Allocate the next value of a named sequence. The increment is a
    /// single UPSERT, so concurrent allocators never hand out the same id.
    pub async fn next_id(&self, sequence: &str) -> Result<i64, AppError> {
        #[derive(Deserialize)]
        struct Row {
            value: i64,
        }

        let mut response = self
            .client
            .query("UPSERT type::thing('sequence', $name) SET value += 1 RETURN AFTER;")
            .bind(("name", sequence.to_owned()))
            .await?;

        let rows: Vec<Row> = response.take(0)?;
        rows.into_iter()
            .next()
            .map(|row| row.value)
            .ok_or_else(|| AppError::InternalError(format!("sequence {sequence} returned no row")))
    }

    /// Allocate a contiguous block of `count` sequence values and return
    /// the last one; the block is `last - count + 1 ..= last`.
    pub async fn next_id_block(&self, sequence: &str, count: i64) -> Result<i64, AppError> {
        #[derive(Deserialize)]
        struct Row {
            value: i64,
        }

        let mut response = self
            .client
            .query("UPSERT type::thing('sequence', $name) SET value += $count RETURN AFTER;")
            .bind(("name", sequence.to_owned()))
            .bind(("count", count))
            .await?;

        let rows: Vec<Row> = response.take(0)?;
        rows.into_iter()
            .next()
            .map(|row| row.value)
            .ok_or_else(|| AppError::InternalError(format!("sequence {sequence} returned no row")))
    }

    /// Store an object under its own record id.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        let record_id = item.record_id();
        self.client.create(record_id).content(item).await
    }

    /// Fetch a single object by key.
    pub async fn get_item<T>(&self, key: T::Key) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .select(surrealdb::RecordId::from_table_key(T::table_name(), key))
            .await
    }

    /// Delete a single object by key, returning it when it existed.
    pub async fn delete_item<T>(&self, key: T::Key) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .delete(surrealdb::RecordId::from_table_key(T::table_name(), key))
            .await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject,
    {
        self.client.select(T::table_name()).await
    }

}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
