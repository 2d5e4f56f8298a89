use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::StoredObject;

/// The isolation boundary. Tenants are named externally (their id is the
/// token subject); the row itself is bookkeeping, created lazily on first
/// ingest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
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
    pub name: String,
}

impl StoredObject for Tenant {
    type Key = String;

    fn table_name() -> &'static str {
        "tenant"
    }

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Tenant {
    pub async fn ensure(db: &SurrealDbClient, tenant_id: &str) -> Result<(), AppError> {
        db.query(
            "UPSERT type::thing('tenant', $id) SET \
                 name = $id, \
                 created_at = IF created_at != NONE THEN created_at ELSE time::now() END, \
                 updated_at = time::now();",
        )
        .bind(("id", tenant_id.to_owned()))
        .await?
        .check()?;
        Ok(())
    }
}
