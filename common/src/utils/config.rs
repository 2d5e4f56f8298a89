use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
    S3,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedProviderKind {
    Local,
    Remote,
    /// Seeded hash embedder; only usable with the `test-utils` feature.
    Deterministic,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Memory,
    Database,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RerankProviderKind {
    Local,
    Remote,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    // HTTP
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_ingest_max_body_bytes")]
    pub ingest_max_body_bytes: usize,

    // Metadata store
    #[serde(default = "default_db_url")]
    pub db_url: String,
    #[serde(default = "default_db_user")]
    pub db_user: String,
    #[serde(default = "default_db_pass")]
    pub db_pass: String,
    #[serde(default = "default_db_namespace")]
    pub db_namespace: String,
    #[serde(default = "default_db_database")]
    pub db_database: String,

    // Event bus
    #[serde(default = "default_bus_kind", alias = "bus_url")]
    pub bus: BusKind,

    // Object store (s3 backend)
    pub s3_endpoint: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_key: Option<String>,
    pub s3_secret: Option<String>,
    pub s3_region: Option<String>,

    // Embeddings
    #[serde(default = "default_embed_provider")]
    pub embed_provider: EmbedProviderKind,
    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    pub remote_embed_url: Option<String>,
    pub remote_embed_token: Option<String>,
    #[serde(default = "default_remote_embed_model")]
    pub remote_embed_model: String,
    #[serde(default = "default_embed_pool_size")]
    pub embed_pool_size: usize,
    pub fastembed_cache_dir: Option<String>,

    // Generation
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_timeout_secs", alias = "llm_timeout")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,
    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f32,

    // Retrieval bounds
    #[serde(default = "default_top_k_default")]
    pub top_k_default: usize,
    #[serde(default = "default_top_k_max")]
    pub top_k_max: usize,
    #[serde(default = "default_max_ctx_tokens")]
    pub max_ctx_tokens: usize,
    #[serde(default = "default_max_ctx_cap")]
    pub max_ctx_cap: usize,
    #[serde(default = "default_max_ctx_chunks")]
    pub max_ctx_chunks: usize,
    #[serde(default = "default_snippet_max_chars")]
    pub snippet_max_chars: usize,

    // Reranking
    #[serde(default)]
    pub rerank_enabled: bool,
    #[serde(default = "default_rerank_provider")]
    pub rerank_provider: RerankProviderKind,
    pub rerank_url: Option<String>,
    pub rerank_token: Option<String>,
    pub rerank_pool_size: Option<usize>,

    // Vector index tuning. `lists` maps to the HNSW build-time EFC and
    // `probes` to the search-time EF; the pgvector-style spellings are
    // accepted as aliases.
    #[serde(default = "default_index_lists", alias = "ivfflat_lists")]
    pub index_lists: usize,
    #[serde(default = "default_index_probes", alias = "ivfflat_probes")]
    pub index_probes: usize,

    // Job retries
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    // Tenant limits
    #[serde(default = "default_rate_limit_per_min")]
    pub rate_limit_per_min: i64,
    #[serde(default = "default_daily_token_quota")]
    pub daily_token_quota: i64,

    // Answer cache
    #[serde(default = "default_answer_cache_ttl_secs", alias = "answer_cache_ttl")]
    pub answer_cache_ttl_secs: u64,

    // Realtime gateway
    #[serde(default = "default_ws_buffer_limit")]
    pub ws_buffer_limit: usize,
    #[serde(default = "default_ping_interval_secs", alias = "ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_ping_timeout_secs", alias = "ping_timeout")]
    pub ping_timeout_secs: u64,

    // Auth
    #[serde(default = "default_auth_secret")]
    pub auth_secret: String,
    #[serde(default)]
    pub require_auth: bool,

    // Chunker
    #[serde(default = "default_chunk_min_tokens")]
    pub chunk_min_tokens: usize,
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
    /// Defaults to 15% of `chunk_max_tokens` when unset.
    pub chunk_overlap_tokens: Option<usize>,
    #[serde(default = "default_header_break_level")]
    pub header_break_level: u8,
    #[serde(default = "default_max_table_rows")]
    pub max_table_rows: usize,
    #[serde(default = "default_table_group_min_rows")]
    pub table_group_min_rows: usize,
    #[serde(default = "default_table_group_max_rows")]
    pub table_group_max_rows: usize,
}

fn default_http_port() -> u16 {
    3000
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}
fn default_ingest_max_body_bytes() -> usize {
    25 * 1024 * 1024
}
fn default_db_url() -> String {
    "ws://127.0.0.1:8000".to_string()
}
fn default_db_user() -> String {
    "root".to_string()
}
fn default_db_pass() -> String {
    "root".to_string()
}
fn default_db_namespace() -> String {
    "rag".to_string()
}
fn default_db_database() -> String {
    "rag".to_string()
}
fn default_bus_kind() -> BusKind {
    BusKind::Database
}
fn default_embed_provider() -> EmbedProviderKind {
    EmbedProviderKind::Local
}
fn default_embed_dim() -> usize {
    384
}
fn default_embed_batch_size() -> usize {
    32
}
fn default_remote_embed_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embed_pool_size() -> usize {
    2
}
fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_llm_max_tokens() -> u32 {
    512
}
fn default_llm_temperature() -> f32 {
    0.2
}
fn default_top_k_default() -> usize {
    5
}
fn default_top_k_max() -> usize {
    20
}
fn default_max_ctx_tokens() -> usize {
    1500
}
fn default_max_ctx_cap() -> usize {
    4000
}
fn default_max_ctx_chunks() -> usize {
    6
}
fn default_snippet_max_chars() -> usize {
    400
}
fn default_rerank_provider() -> RerankProviderKind {
    RerankProviderKind::Local
}
fn default_index_lists() -> usize {
    100
}
fn default_index_probes() -> usize {
    40
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_rate_limit_per_min() -> i64 {
    120
}
fn default_daily_token_quota() -> i64 {
    200_000
}
fn default_answer_cache_ttl_secs() -> u64 {
    300
}
fn default_ws_buffer_limit() -> usize {
    256
}
fn default_ping_interval_secs() -> u64 {
    20
}
fn default_ping_timeout_secs() -> u64 {
    60
}
fn default_auth_secret() -> String {
    String::new()
}
fn default_chunk_min_tokens() -> usize {
    350
}
fn default_chunk_max_tokens() -> usize {
    700
}
fn default_header_break_level() -> u8 {
    2
}
fn default_max_table_rows() -> usize {
    500
}
fn default_table_group_min_rows() -> usize {
    20
}
fn default_table_group_max_rows() -> usize {
    60
}

impl AppConfig {
    /// Effective chunk overlap: configured value or 15% of the max.
    pub fn chunk_overlap_tokens(&self) -> usize {
        self.chunk_overlap_tokens
            .unwrap_or(self.chunk_max_tokens * 15 / 100)
    }

    /// Startup validation. The process refuses to start on any failure here.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.embed_dim == 0 {
            return Err(AppError::Config("EMBED_DIM must be greater than zero".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(AppError::Config(
                "EMBED_BATCH_SIZE must be greater than zero".into(),
            ));
        }
        if self.embed_provider == EmbedProviderKind::Remote && self.remote_embed_url.is_none() {
            return Err(AppError::Config(
                "REMOTE_EMBED_URL is required when EMBED_PROVIDER=remote".into(),
            ));
        }
        if self.storage == StorageKind::S3 && self.s3_bucket.is_none() {
            return Err(AppError::Config("S3_BUCKET is required when STORAGE=s3".into()));
        }
        if self.rerank_enabled
            && self.rerank_provider == RerankProviderKind::Remote
            && self.rerank_url.is_none()
        {
            return Err(AppError::Config(
                "RERANK_URL is required when RERANK_ENABLED with a remote provider".into(),
            ));
        }
        if self.require_auth && self.auth_secret.is_empty() {
            return Err(AppError::Config(
                "AUTH_SECRET is required when REQUIRE_AUTH is set".into(),
            ));
        }
        if self.top_k_default == 0 || self.top_k_default > self.top_k_max {
            return Err(AppError::Config(
                "TOP_K_DEFAULT must be within 1..=TOP_K_MAX".into(),
            ));
        }
        if self.max_ctx_tokens > self.max_ctx_cap {
            return Err(AppError::Config(
                "MAX_CTX_TOKENS must not exceed MAX_CTX_CAP".into(),
            ));
        }
        if self.chunk_min_tokens == 0 || self.chunk_min_tokens > self.chunk_max_tokens {
            return Err(AppError::Config(
                "chunk token bounds require 0 < CHUNK_MIN_TOKENS <= CHUNK_MAX_TOKENS".into(),
            ));
        }
        if self.chunk_overlap_tokens() >= self.chunk_min_tokens {
            return Err(AppError::Config(
                "CHUNK_OVERLAP_TOKENS must be smaller than CHUNK_MIN_TOKENS".into(),
            ));
        }
        if self.table_group_min_rows == 0
            || self.table_group_min_rows > self.table_group_max_rows
        {
            return Err(AppError::Config(
                "table row group bounds require 0 < min <= max".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(AppError::Config("MAX_ATTEMPTS must be greater than zero".into()));
        }
        Ok(())
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;

    /// A fully-defaulted configuration for unit tests: memory storage,
    /// deterministic embeddings, in-process bus, auth disabled.
    pub fn test_config() -> AppConfig {
        AppConfig {
            http_port: 0,
            data_dir: "/tmp/unused".into(),
            storage: StorageKind::Memory,
            ingest_max_body_bytes: default_ingest_max_body_bytes(),
            db_url: "mem://".into(),
            db_user: "test".into(),
            db_pass: "test".into(),
            db_namespace: "test".into(),
            db_database: "test".into(),
            bus: BusKind::Memory,
            s3_endpoint: None,
            s3_bucket: None,
            s3_key: None,
            s3_secret: None,
            s3_region: None,
            embed_provider: EmbedProviderKind::Deterministic,
            embed_dim: 16,
            embed_batch_size: 8,
            remote_embed_url: None,
            remote_embed_token: None,
            remote_embed_model: default_remote_embed_model(),
            embed_pool_size: 1,
            fastembed_cache_dir: None,
            llm_provider: default_llm_provider(),
            llm_model: "test-model".into(),
            llm_base_url: default_llm_base_url(),
            llm_api_key: None,
            llm_timeout_secs: 5,
            llm_max_tokens: 128,
            llm_temperature: 0.0,
            top_k_default: 5,
            top_k_max: 20,
            max_ctx_tokens: 1500,
            max_ctx_cap: 4000,
            max_ctx_chunks: 6,
            snippet_max_chars: 400,
            rerank_enabled: false,
            rerank_provider: RerankProviderKind::Local,
            rerank_url: None,
            rerank_token: None,
            rerank_pool_size: None,
            index_lists: 100,
            index_probes: 40,
            max_attempts: 3,
            backoff_base_ms: 10,
            backoff_max_ms: 100,
            rate_limit_per_min: 1000,
            daily_token_quota: 1_000_000,
            answer_cache_ttl_secs: 300,
            ws_buffer_limit: 8,
            ping_interval_secs: 20,
            ping_timeout_secs: 60,
            auth_secret: "test-secret".into(),
            require_auth: false,
            chunk_min_tokens: 350,
            chunk_max_tokens: 700,
            chunk_overlap_tokens: None,
            header_break_level: 2,
            max_table_rows: 500,
            table_group_min_rows: 20,
            table_group_max_rows: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::test_config;
    use super::*;

    #[test]
    fn default_overlap_is_fifteen_percent_of_max() {
        let cfg = test_config();
        assert_eq!(cfg.chunk_overlap_tokens(), 700 * 15 / 100);
    }

    #[test]
    fn validate_accepts_test_config() {
        test_config().validate().expect("test config should be valid");
    }

    #[test]
    fn validate_rejects_dimension_zero() {
        let mut cfg = test_config();
        cfg.embed_dim = 0;
        assert!(matches!(cfg.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn validate_rejects_remote_embedder_without_url() {
        let mut cfg = test_config();
        cfg.embed_provider = EmbedProviderKind::Remote;
        cfg.remote_embed_url = None;
        assert!(matches!(cfg.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn validate_rejects_overlap_at_least_min() {
        let mut cfg = test_config();
        cfg.chunk_overlap_tokens = Some(350);
        assert!(matches!(cfg.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn validate_rejects_auth_without_secret() {
        let mut cfg = test_config();
        cfg.require_auth = true;
        cfg.auth_secret = String::new();
        assert!(matches!(cfg.validate(), Err(AppError::Config(_))));
    }
}
