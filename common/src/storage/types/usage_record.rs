use chrono::Utc;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(UsageRecord, "usage_record", {
    tenant_id: String,
    /// Which surface consumed the tokens: "query", "answer", "answer_stream".
    endpoint: String,
    provider: String,
    model: String,
    in_tokens: i64,
    out_tokens: i64,
    latency_ms: i64
});

impl UsageRecord {
    /// Persist a usage sample. Best-effort: accounting must never fail a
    /// request, so callers log and continue on error.
    pub async fn record(
        db: &SurrealDbClient,
        tenant_id: &str,
        endpoint: &str,
        provider: &str,
        model: &str,
        in_tokens: i64,
        out_tokens: i64,
        latency_ms: i64,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let record = Self {
            id: db.next_id("usage_record").await?,
            created_at: now,
            updated_at: now,
            tenant_id: tenant_id.to_string(),
            endpoint: endpoint.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            in_tokens,
            out_tokens,
            latency_ms,
        };
        db.store_item(record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_record_persists_sample() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        UsageRecord::record(&db, "tenant-a", "answer", "openai", "test-model", 120, 30, 450)
            .await
            .expect("record");

        let rows: Vec<UsageRecord> = db.get_all_stored_items().await.expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tenant_id, "tenant-a");
        assert_eq!(rows[0].in_tokens, 120);
        assert_eq!(rows[0].out_tokens, 30);
    }
}
