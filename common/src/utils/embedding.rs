use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::{Mutex, Semaphore};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbedProviderKind},
};

/// Dimension of the bundled local model (AllMiniLML6V2).
const LOCAL_MODEL_DIM: usize = 384;
const LOCAL_MODEL_TAG: &str = "fastembed:all-minilm-l6-v2";
const REMOTE_RETRY_ATTEMPTS: usize = 3;

/// Text embedding provider. Backends are interchangeable behind this type;
/// every vector leaving it is L2-normalized and has the configured
/// dimension, so callers never branch on the active backend.
pub struct EmbeddingProvider {
    backend: Backend,
    dim: usize,
    batch_size: usize,
    tag: String,
}

enum Backend {
    Local(LocalPool),
    Remote {
        client: Client<OpenAIConfig>,
        model: String,
    },
    #[cfg(any(test, feature = "test-utils"))]
    Deterministic,
}

/// Round-robin pool of fastembed engines with a semaphore enforcing
/// backpressure, one permit per engine.
struct LocalPool {
    engines: Vec<Arc<Mutex<TextEmbedding>>>,
    semaphore: Arc<Semaphore>,
    next_engine: AtomicUsize,
}

impl LocalPool {
    fn new(pool_size: usize, cache_dir: Option<&str>) -> Result<Self, AppError> {
        if pool_size == 0 {
            return Err(AppError::Config(
                "embedding pool size must be greater than zero".into(),
            ));
        }

        let mut options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            std::fs::create_dir_all(dir)?;
            options = options.with_cache_dir(dir.into());
        }

        let mut engines = Vec::with_capacity(pool_size);
        for n in 0..pool_size {
            debug!("Creating embedding engine: {n}");
            let engine = TextEmbedding::try_new(options.clone())
                .map_err(|e| AppError::Config(format!("failed to load embedding model: {e}")))?;
            engines.push(Arc::new(Mutex::new(engine)));
        }

        Ok(Self {
            engines,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            next_engine: AtomicUsize::new(0),
        })
    }

    async fn embed(
        &self,
        texts: Vec<String>,
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::EmbedUnavailable("embedding pool closed".into()))?;

        let idx = self.next_engine.fetch_add(1, Ordering::Relaxed) % self.engines.len();
        let engine = Arc::clone(
            self.engines
                .get(idx)
                .ok_or_else(|| AppError::InternalError("embedding pool is empty".into()))?,
        );

        let mut guard = engine.lock().await;
        guard
            .embed(texts, Some(batch_size))
            .map_err(|e| AppError::EmbedUnavailable(e.to_string()))
    }
}

impl EmbeddingProvider {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AppError> {
        match cfg.embed_provider {
            EmbedProviderKind::Local => {
                if cfg.embed_dim != LOCAL_MODEL_DIM {
                    return Err(AppError::Config(format!(
                        "EMBED_DIM {} does not match the local model dimension {LOCAL_MODEL_DIM}",
                        cfg.embed_dim
                    )));
                }
                let pool = LocalPool::new(cfg.embed_pool_size, cfg.fastembed_cache_dir.as_deref())?;
                Ok(Self {
                    backend: Backend::Local(pool),
                    dim: LOCAL_MODEL_DIM,
                    batch_size: cfg.embed_batch_size,
                    tag: LOCAL_MODEL_TAG.to_string(),
                })
            }
            EmbedProviderKind::Remote => {
                let base_url = cfg.remote_embed_url.clone().ok_or_else(|| {
                    AppError::Config("REMOTE_EMBED_URL is required for the remote embedder".into())
                })?;
                let mut openai_config = OpenAIConfig::new().with_api_base(base_url);
                if let Some(token) = &cfg.remote_embed_token {
                    openai_config = openai_config.with_api_key(token);
                }
                Ok(Self {
                    backend: Backend::Remote {
                        client: Client::with_config(openai_config),
                        model: cfg.remote_embed_model.clone(),
                    },
                    dim: cfg.embed_dim,
                    batch_size: cfg.embed_batch_size,
                    tag: format!("remote:{}", cfg.remote_embed_model),
                })
            }
            #[cfg(any(test, feature = "test-utils"))]
            EmbedProviderKind::Deterministic => Ok(Self::deterministic(cfg.embed_dim)),
            #[cfg(not(any(test, feature = "test-utils")))]
            EmbedProviderKind::Deterministic => Err(AppError::Config(
                "the deterministic embedder requires the test-utils feature".into(),
            )),
        }
    }

    /// Seeded hash embedder for tests: no model download, no network, and
    /// texts sharing words land close in the vector space.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn deterministic(dim: usize) -> Self {
        Self {
            backend: Backend::Deterministic,
            dim,
            batch_size: 32,
            tag: "deterministic".to_string(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn provider_tag(&self) -> &str {
        &self.tag
    }

    pub fn backend_label(&self) -> &'static str {
        match &self.backend {
            Backend::Local(_) => "local",
            Backend::Remote { .. } => "remote",
            #[cfg(any(test, feature = "test-utils"))]
            Backend::Deterministic => "deterministic",
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::EmbedUnavailable("no embedding returned".into()))
    }

    /// Embed a batch of texts. Output order matches input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = match &self.backend {
            Backend::Local(pool) => pool.embed(texts.to_vec(), self.batch_size).await?,
            Backend::Remote { client, model } => {
                self.embed_remote(client, model, texts).await?
            }
            #[cfg(any(test, feature = "test-utils"))]
            Backend::Deterministic => texts
                .iter()
                .map(|text| hashed_embedding(text, self.dim))
                .collect(),
        };

        for vector in &mut vectors {
            if vector.len() != self.dim {
                return Err(AppError::Config(format!(
                    "embedding dimension {} does not match configured dimension {}",
                    vector.len(),
                    self.dim
                )));
            }
            l2_normalize(vector);
        }

        Ok(vectors)
    }

    async fn embed_remote(
        &self,
        client: &Client<OpenAIConfig>,
        model: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let retry_strategy = ExponentialBackoff::from_millis(100)
                .map(jitter)
                .take(REMOTE_RETRY_ATTEMPTS);

            let response = Retry::spawn(retry_strategy, || async {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model)
                    .input(batch.to_vec())
                    .dimensions(u32::try_from(self.dim).unwrap_or(u32::MAX))
                    .build()?;
                client.embeddings().create(request).await
            })
            .await
            .map_err(|e| AppError::EmbedUnavailable(e.to_string()))?;

            if response.data.len() != batch.len() {
                return Err(AppError::EmbedUnavailable(format!(
                    "remote embedder returned {} vectors for {} inputs",
                    response.data.len(),
                    batch.len()
                )));
            }
            out.extend(response.data.into_iter().map(|d| d.embedding));
        }

        Ok(out)
    }
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left unscaled
/// with their first component set so the norm invariant still holds.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    } else if let Some(first) = vector.first_mut() {
        *first = 1.0;
    }
}

#[cfg(any(test, feature = "test-utils"))]
fn hashed_embedding(text: &str, dim: usize) -> Vec<f32> {
    use std::hash::{Hash, Hasher};

    let mut vector = vec![0.0f32; dim];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.to_lowercase().hash(&mut hasher);
        let bucket = usize::try_from(hasher.finish() % dim as u64).unwrap_or(0);
        if let Some(slot) = vector.get_mut(bucket) {
            *slot += 1.0;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[tokio::test]
    async fn deterministic_embeddings_are_normalized() {
        let provider = EmbeddingProvider::deterministic(16);
        let vectors = provider
            .embed_batch(&["alpha beta gamma".to_string(), "delta".to_string()])
            .await
            .expect("embed batch");

        assert_eq!(vectors.len(), 2);
        for vector in &vectors {
            assert_eq!(vector.len(), 16);
            assert!((norm(vector) - 1.0).abs() <= 1e-3);
        }
    }

    #[tokio::test]
    async fn deterministic_embeddings_are_stable() {
        let provider = EmbeddingProvider::deterministic(16);
        let a = provider.embed("the same text").await.expect("embed");
        let b = provider.embed("the same text").await.expect("embed");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn shared_words_score_closer_than_disjoint_words() {
        let provider = EmbeddingProvider::deterministic(64);
        let query = provider.embed("tokio scheduler").await.expect("embed");
        let near = provider
            .embed("the tokio scheduler is cooperative")
            .await
            .expect("embed");
        let far = provider
            .embed("grapes wine vineyard harvest")
            .await
            .expect("embed");

        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&query, &near) > dot(&query, &far));
    }

    #[test]
    fn normalize_handles_zero_vectors() {
        let mut v = vec![0.0f32; 4];
        l2_normalize(&mut v);
        assert!((norm(&v) - 1.0).abs() <= 1e-3);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let provider = EmbeddingProvider::deterministic(8);
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let out = rt.block_on(provider.embed_batch(&[])).expect("embed");
        assert!(out.is_empty());
    }
}
