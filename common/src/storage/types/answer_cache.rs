use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::StoredObject;

/// A cached grounded answer, keyed by the request fingerprint. Entries are
/// only served while younger than the configured TTL; stale rows are
/// overwritten in place on the next miss.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerCacheEntry {
    #[serde(deserialize_with = "crate::storage::types::deserialize_string_id")]
    pub id: String,
    #[serde(
        serialize_with = "crate::storage::types::serialize_datetime",
        deserialize_with = "crate::storage::types::deserialize_datetime",
        default
    )]
    pub created_at: DateTime<Utc>,
    #[serde(
        serialize_with = "crate::storage::types::serialize_datetime",
        deserialize_with = "crate::storage::types::deserialize_datetime",
        default
    )]
    pub updated_at: DateTime<Utc>,
    pub tenant_id: String,
    pub answer: String,
    /// Citations exactly as returned to the client.
    pub citations: serde_json::Value,
    pub in_tokens: i64,
    pub out_tokens: i64,
    pub model: String,
}

impl StoredObject for AnswerCacheEntry {
    type Key = String;

    fn table_name() -> &'static str {
        "answer_cache"
    }

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl AnswerCacheEntry {
    pub async fn put(db: &SurrealDbClient, entry: AnswerCacheEntry) -> Result<(), AppError> {
        db.query("UPSERT type::thing('answer_cache', $id) CONTENT $entry;")
            .bind(("id", entry.id.clone()))
            .bind(("entry", entry))
            .await?
            .check()?;
        Ok(())
    }

    /// Fetch an entry no older than `ttl_secs`, for the owning tenant only.
    pub async fn get_fresh(
        db: &SurrealDbClient,
        fingerprint: &str,
        tenant_id: &str,
        ttl_secs: u64,
    ) -> Result<Option<Self>, AppError> {
        let entry: Option<Self> = db.get_item(fingerprint.to_string()).await?;

        let ttl = Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX));
        Ok(entry
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| e.created_at + ttl > Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(fingerprint: &str, created_at: DateTime<Utc>) -> AnswerCacheEntry {
        AnswerCacheEntry {
            id: fingerprint.to_string(),
            created_at,
            updated_at: created_at,
            tenant_id: "tenant-a".to_string(),
            answer: "Beta is discussed on page 2.".to_string(),
            citations: serde_json::json!([{ "doc_id": 1, "chunk_id": 2 }]),
            in_tokens: 120,
            out_tokens: 24,
            model: "test-model".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fresh_entries_hit_and_stale_entries_miss() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        AnswerCacheEntry::put(&db, entry("fp-1", Utc::now()))
            .await
            .expect("put");
        let hit = AnswerCacheEntry::get_fresh(&db, "fp-1", "tenant-a", 300)
            .await
            .expect("get");
        assert!(hit.is_some());

        AnswerCacheEntry::put(&db, entry("fp-2", Utc::now() - Duration::seconds(301)))
            .await
            .expect("put");
        let stale = AnswerCacheEntry::get_fresh(&db, "fp-2", "tenant-a", 300)
            .await
            .expect("get");
        assert!(stale.is_none(), "expired entries must not be served");
    }

    #[tokio::test]
    async fn test_entries_are_tenant_scoped() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        AnswerCacheEntry::put(&db, entry("fp-3", Utc::now()))
            .await
            .expect("put");
        let other = AnswerCacheEntry::get_fresh(&db, "fp-3", "tenant-b", 300)
            .await
            .expect("get");
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_in_place() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        AnswerCacheEntry::put(&db, entry("fp-4", Utc::now()))
            .await
            .expect("first put");
        let mut updated = entry("fp-4", Utc::now());
        updated.answer = "A newer answer.".to_string();
        AnswerCacheEntry::put(&db, updated).await.expect("second put");

        let hit = AnswerCacheEntry::get_fresh(&db, "fp-4", "tenant-a", 300)
            .await
            .expect("get")
            .expect("entry");
        assert_eq!(hit.answer, "A newer answer.");
    }
}
