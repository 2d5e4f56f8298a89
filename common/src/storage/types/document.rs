use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::StoredObject;

/// Aggregate pipeline state of a document. Failures leave the status at the
/// last successfully reached stage; only `Job.error` records what broke.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Parsing,
    Chunking,
    Embedding,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Parsing => "parsing",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

stored_object!(Document, "document", {
    tenant_id: String,
    name: String,
    mime: String,
    size_bytes: i64,
    storage_uri: String,
    status: DocumentStatus
});

impl Document {
    pub fn new(
        id: i64,
        tenant_id: String,
        name: String,
        mime: String,
        size_bytes: i64,
        storage_uri: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            tenant_id,
            name,
            mime,
            size_bytes,
            storage_uri,
            status: DocumentStatus::Uploaded,
        }
    }

    pub async fn get_for_tenant(
        db: &SurrealDbClient,
        id: i64,
        tenant_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let doc: Option<Self> = db.get_item(id).await?;
        Ok(doc.filter(|d| d.tenant_id == tenant_id))
    }

    pub async fn list_for_tenant(
        db: &SurrealDbClient,
        tenant_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let docs: Vec<Self> = db
            .query(format!(
                "SELECT * FROM {} WHERE tenant_id = $tenant ORDER BY created_at DESC",
                Self::table_name()
            ))
            .bind(("tenant", tenant_id.to_owned()))
            .await?
            .take(0)?;
        Ok(docs)
    }

    pub async fn set_status(
        db: &SurrealDbClient,
        id: i64,
        status: DocumentStatus,
    ) -> Result<(), AppError> {
        db.query(format!(
            "UPDATE type::thing('{}', $id) SET status = $status, updated_at = time::now();",
            Self::table_name()
        ))
        .bind(("id", id))
        .bind(("status", status))
        .await?
        .check()?;
        Ok(())
    }

    /// The authoritative aggregate status; progress events are advisory.
    pub async fn aggregate_status(
        db: &SurrealDbClient,
        id: i64,
    ) -> Result<Option<DocumentStatus>, AppError> {
        let doc: Option<Self> = db.get_item(id).await?;
        Ok(doc.map(|d| d.status))
    }

    /// Delete the document and everything derived from it. The object store
    /// prefix is the caller's concern; this only touches metadata rows.
    pub async fn delete_cascade(db: &SurrealDbClient, id: i64) -> Result<(), AppError> {
        db.query(
            "BEGIN TRANSACTION;
             DELETE chunk_embedding WHERE document_id = $id;
             DELETE chunk WHERE document_id = $id;
             DELETE element WHERE document_id = $id;
             DELETE job WHERE document_id = $id;
             DELETE type::thing('document', $id);
             COMMIT TRANSACTION;",
        )
        .bind(("id", id))
        .await?
        .check()?;
        Ok(())
    }
}
