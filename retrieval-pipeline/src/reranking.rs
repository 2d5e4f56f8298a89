use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use common::{
    error::AppError,
    utils::config::{AppConfig, RerankProviderKind},
};
use fastembed::{RerankInitOptions, TextRerank};
use serde::Deserialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Second-pass scorer over (query, document) pairs. Scores come back in
/// input order and always land in [0,1]; they are not calibrated against
/// cosine similarities.
pub enum RerankerProvider {
    Local(RerankerPool),
    Remote(RemoteReranker),
}

impl RerankerProvider {
    pub fn maybe_from_config(cfg: &AppConfig) -> Result<Option<Arc<Self>>, AppError> {
        if !cfg.rerank_enabled {
            return Ok(None);
        }

        let provider = match cfg.rerank_provider {
            RerankProviderKind::Local => {
                let pool_size = cfg.rerank_pool_size.unwrap_or_else(default_pool_size);
                Self::Local(RerankerPool::new(pool_size, cfg.fastembed_cache_dir.as_deref())?)
            }
            RerankProviderKind::Remote => {
                let url = cfg.rerank_url.clone().ok_or_else(|| {
                    AppError::Config("RERANK_URL is required for the remote reranker".into())
                })?;
                Self::Remote(RemoteReranker::new(url, cfg.rerank_token.clone()))
            }
        };

        Ok(Some(Arc::new(provider)))
    }

    /// Score each document against the query, preserving input order.
    pub async fn rerank(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<f32>, AppError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Local(pool) => pool.rerank(query, documents).await,
            Self::Remote(remote) => remote.rerank(query, documents).await,
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|value| value.get().min(2))
        .unwrap_or(2)
        .max(1)
}

/// Pool of cross-encoder engines; a semaphore enforces backpressure and a
/// round-robin counter avoids always hammering engine zero.
pub struct RerankerPool {
    engines: Vec<Arc<Mutex<TextRerank>>>,
    semaphore: Arc<Semaphore>,
    next_engine: AtomicUsize,
}

impl RerankerPool {
    pub fn new(pool_size: usize, cache_dir: Option<&str>) -> Result<Self, AppError> {
        if pool_size == 0 {
            return Err(AppError::Config(
                "reranker pool size must be greater than zero".into(),
            ));
        }

        let mut options = RerankInitOptions::default();
        options.show_download_progress = false;
        if let Some(dir) = cache_dir {
            std::fs::create_dir_all(dir)?;
            options.cache_dir = dir.into();
        }

        let mut engines = Vec::with_capacity(pool_size);
        for n in 0..pool_size {
            debug!("Creating reranking engine: {n}");
            let engine = TextRerank::try_new(options.clone())
                .map_err(|e| AppError::Config(format!("failed to load reranker model: {e}")))?;
            engines.push(Arc::new(Mutex::new(engine)));
        }

        Ok(Self {
            engines,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            next_engine: AtomicUsize::new(0),
        })
    }

    async fn checkout(&self) -> Result<RerankerLease, AppError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::InternalError("reranker pool closed".into()))?;

        let idx = self.next_engine.fetch_add(1, Ordering::Relaxed) % self.engines.len();
        let engine = Arc::clone(
            self.engines
                .get(idx)
                .ok_or_else(|| AppError::InternalError("reranker pool is empty".into()))?,
        );

        Ok(RerankerLease {
            _permit: permit,
            engine,
        })
    }

    async fn rerank(&self, query: &str, documents: Vec<String>) -> Result<Vec<f32>, AppError> {
        let count = documents.len();
        let lease = self.checkout().await?;
        let mut guard = lease.engine.lock().await;

        let results = guard
            .rerank(query.to_owned(), documents, false, None)
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        // Raw cross-encoder logits are unbounded; squash into [0,1].
        let mut scores = vec![0.0f32; count];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = sigmoid(result.score);
            }
        }
        Ok(scores)
    }
}

/// Active lease on a single engine; dropping it releases the permit.
struct RerankerLease {
    _permit: OwnedSemaphorePermit,
    engine: Arc<Mutex<TextRerank>>,
}

/// Jina-style HTTP reranker: POST {query, documents}, response carries
/// per-index relevance scores.
pub struct RemoteReranker {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct RemoteRerankResponse {
    results: Vec<RemoteRerankResult>,
}

#[derive(Deserialize)]
struct RemoteRerankResult {
    index: usize,
    relevance_score: f32,
}

impl RemoteReranker {
    pub fn new(url: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            token,
        }
    }

    async fn rerank(&self, query: &str, documents: Vec<String>) -> Result<Vec<f32>, AppError> {
        let count = documents.len();
        let mut request = self.client.post(&self.url).json(&serde_json::json!({
            "query": query,
            "documents": documents,
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::RetrievalUnavailable(format!("reranker call failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::RetrievalUnavailable(format!("reranker rejected call: {e}")))?;

        let body: RemoteRerankResponse = response
            .json()
            .await
            .map_err(|e| AppError::RetrievalUnavailable(format!("bad reranker response: {e}")))?;

        let mut scores = vec![0.0f32; count];
        for result in body.results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.relevance_score.clamp(0.0, 1.0);
            }
        }
        Ok(scores)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_lands_in_unit_interval() {
        for x in [-20.0, -1.0, 0.0, 1.0, 20.0] {
            let y = sigmoid(x);
            assert!((0.0..=1.0).contains(&y), "sigmoid({x}) = {y}");
        }
        assert!(sigmoid(2.0) > sigmoid(-2.0));
    }

    #[test]
    fn disabled_rerank_builds_no_provider() {
        let cfg = common::utils::config::testing::test_config();
        let provider = RerankerProvider::maybe_from_config(&cfg).expect("config");
        assert!(provider.is_none());
    }

    #[test]
    fn remote_without_url_is_config_error() {
        let mut cfg = common::utils::config::testing::test_config();
        cfg.rerank_enabled = true;
        cfg.rerank_provider = RerankProviderKind::Remote;
        cfg.rerank_url = None;
        assert!(matches!(
            RerankerProvider::maybe_from_config(&cfg),
            Err(AppError::Config(_))
        ));
    }
}
