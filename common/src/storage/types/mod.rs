use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use surrealdb::sql::{Id, Thing};

pub mod answer_cache;
pub mod chunk;
pub mod chunk_embedding;
pub mod document;
pub mod element;
pub mod job;
pub mod quota_counter;
pub mod tenant;
pub mod usage_record;

/// Anything persisted as a SurrealDB record. `Key` is the record key type:
/// i64 for sequence-allocated rows (documents, jobs, elements, chunks) and
/// String for externally-named rows (tenants, counters, cache entries).
pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    type Key: Clone + Into<surrealdb::RecordIdKey>;

    fn table_name() -> &'static str;
    fn key(&self) -> Self::Key;

    fn record_id(&self) -> surrealdb::RecordId
    where
        Self: Sized,
    {
        surrealdb::RecordId::from_table_key(Self::table_name(), self.key())
    }
}

struct NumericIdVisitor;

impl<'de> Visitor<'de> for NumericIdVisitor {
    type Value = i64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an integer or a record id Thing")
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value)
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        i64::try_from(value).map_err(de::Error::custom)
    }

    fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let thing = Thing::deserialize(de::value::MapAccessDeserializer::new(map))?;
        match thing.id {
            Id::Number(n) => Ok(n),
            other => other.to_raw().parse().map_err(de::Error::custom),
        }
    }
}

/// Accepts both a plain integer and a Surreal `Thing` for the `id` field, so
/// rows round-trip whether they were read raw or through a record link.
pub fn deserialize_numeric_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(NumericIdVisitor)
}

struct StringIdVisitor;

impl<'de> Visitor<'de> for StringIdVisitor {
    type Value = String;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string or a record id Thing")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value.to_string())
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value)
    }

    fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let thing = Thing::deserialize(de::value::MapAccessDeserializer::new(map))?;
        Ok(thing.id.to_raw())
    }
}

pub fn deserialize_string_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(StringIdVisitor)
}

pub fn serialize_datetime<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    Into::<surrealdb::sql::Datetime>::into(*date).serialize(serializer)
}

pub fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let dt = surrealdb::sql::Datetime::deserialize(deserializer)?;
    Ok(DateTime::<Utc>::from(dt))
}

/// Defines a sequence-keyed stored type: `id: i64` plus `created_at` /
/// `updated_at` timestamps and the listed fields, wired for SurrealDB's
/// record-id and datetime representations.
#[macro_export]
macro_rules! stored_object {
    ($name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),* $(,)?}) => {
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
        pub struct $name {
            #[serde(deserialize_with = "crate::storage::types::deserialize_numeric_id")]
            pub id: i64,
            #[serde(
                serialize_with = "crate::storage::types::serialize_datetime",
                deserialize_with = "crate::storage::types::deserialize_datetime",
                default
            )]
            pub created_at: chrono::DateTime<chrono::Utc>,
            #[serde(
                serialize_with = "crate::storage::types::serialize_datetime",
                deserialize_with = "crate::storage::types::deserialize_datetime",
                default
            )]
            pub updated_at: chrono::DateTime<chrono::Utc>,
            $( $(#[$attr])* pub $field: $ty ),*
        }

        impl $crate::storage::types::StoredObject for $name {
            type Key = i64;

            fn table_name() -> &'static str {
                $table
            }

            fn key(&self) -> i64 {
                self.id
            }
        }
    };
}
