use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{error::AppError, storage::db::SurrealDbClient};

/// Tenant-scoped counters with fixed time windows, backing the per-minute
/// rate limit and the daily token quota. Increments are single atomic
/// UPSERTs in the store, so every API process sees the same counts.
pub struct QuotaCounter;

impl QuotaCounter {
    /// Key of the per-minute request window.
    pub fn minute_key(tenant_id: &str, now: DateTime<Utc>) -> String {
        format!("{tenant_id}:rpm:{}", now.format("%Y%m%d%H%M"))
    }

    /// Key of the per-day token window.
    pub fn day_key(tenant_id: &str, now: DateTime<Utc>) -> String {
        format!("{tenant_id}:tokens:{}", now.format("%Y%m%d"))
    }

    /// Atomically add `by` to the window and return the new total.
    pub async fn increment(
        db: &SurrealDbClient,
        key: &str,
        by: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        #[derive(Deserialize)]
        struct Row {
            count: i64,
        }

        let mut response = db
            .query(
                "UPSERT type::thing('quota_counter', $key) SET \
                     count += $by, \
                     expires_at = $expires_at, \
                     created_at = IF created_at != NONE THEN created_at ELSE time::now() END, \
                     updated_at = time::now() \
                 RETURN AFTER;",
            )
            .bind(("key", key.to_owned()))
            .bind(("by", by))
            .bind(("expires_at", surrealdb::sql::Datetime::from(expires_at)))
            .await?;

        let rows: Vec<Row> = response.take(0)?;
        rows.into_iter()
            .next()
            .map(|row| row.count)
            .ok_or_else(|| AppError::InternalError("quota counter returned no row".into()))
    }

    /// Current total of a window; zero when the window has never been hit.
    pub async fn current(db: &SurrealDbClient, key: &str) -> Result<i64, AppError> {
        #[derive(Deserialize)]
        struct Row {
            count: i64,
        }

        let mut response = db
            .query("SELECT * FROM type::thing('quota_counter', $key);")
            .bind(("key", key.to_owned()))
            .await?;
        let rows: Vec<Row> = response.take(0)?;
        Ok(rows.into_iter().next().map_or(0, |row| row.count))
    }

    /// Drop windows that have passed their expiry. Called opportunistically;
    /// correctness never depends on it.
    pub async fn purge_expired(db: &SurrealDbClient) -> Result<(), AppError> {
        db.query("DELETE quota_counter WHERE expires_at < time::now();")
            .await?
            .check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_increment_accumulates_per_window() {
        let db = memory_db().await;
        let now = Utc::now();
        let key = QuotaCounter::minute_key("tenant-a", now);
        let expiry = now + Duration::minutes(2);

        assert_eq!(
            QuotaCounter::increment(&db, &key, 1, expiry).await.expect("inc"),
            1
        );
        assert_eq!(
            QuotaCounter::increment(&db, &key, 1, expiry).await.expect("inc"),
            2
        );
        assert_eq!(
            QuotaCounter::increment(&db, &key, 5, expiry).await.expect("inc"),
            7
        );
        assert_eq!(QuotaCounter::current(&db, &key).await.expect("current"), 7);
    }

    #[tokio::test]
    async fn test_windows_are_tenant_scoped() {
        let db = memory_db().await;
        let now = Utc::now();
        let expiry = now + Duration::minutes(2);

        let key_a = QuotaCounter::minute_key("tenant-a", now);
        let key_b = QuotaCounter::minute_key("tenant-b", now);
        QuotaCounter::increment(&db, &key_a, 3, expiry).await.expect("inc");

        assert_eq!(QuotaCounter::current(&db, &key_a).await.expect("a"), 3);
        assert_eq!(QuotaCounter::current(&db, &key_b).await.expect("b"), 0);
    }

    #[tokio::test]
    async fn test_purge_drops_expired_windows() {
        let db = memory_db().await;
        let now = Utc::now();

        let stale_key = QuotaCounter::day_key("tenant-a", now - Duration::days(2));
        QuotaCounter::increment(&db, &stale_key, 9, now - Duration::days(1))
            .await
            .expect("inc");
        let live_key = QuotaCounter::day_key("tenant-a", now);
        QuotaCounter::increment(&db, &live_key, 1, now + Duration::days(1))
            .await
            .expect("inc");

        QuotaCounter::purge_expired(&db).await.expect("purge");

        assert_eq!(QuotaCounter::current(&db, &stale_key).await.expect("stale"), 0);
        assert_eq!(QuotaCounter::current(&db, &live_key).await.expect("live"), 1);
    }

    #[test]
    fn test_window_keys_embed_tenant_and_time() {
        let at = DateTime::parse_from_rfc3339("2026-08-01T10:15:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        assert_eq!(
            QuotaCounter::minute_key("acme", at),
            "acme:rpm:202608011015"
        );
        assert_eq!(QuotaCounter::day_key("acme", at), "acme:tokens:20260801");
    }
}
