#![allow(clippy::missing_docs_in_private_items)]

pub mod answer;
pub mod reranking;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{chunk::Chunk, chunk_embedding::ChunkEmbedding},
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider, token_count},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use reranking::RerankerProvider;

/// Retrieval inputs after facade validation and defaulting.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub top_k: usize,
    pub rerank: bool,
    pub max_ctx_tokens: usize,
    /// Search-time probes hint; falls back to the configured default.
    pub probes: Option<usize>,
}

/// A retrieved chunk with score and presentation metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    #[serde(rename = "doc_id")]
    pub document_id: i64,
    pub chunk_id: i64,
    pub page: Option<u32>,
    pub score: f32,
    pub snippet: String,
    pub breadcrumbs: Vec<String>,
}

/// Result of a retrieval pass: ranked matches that fit the context budget,
/// plus the token accounting for usage reporting.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub matches: Vec<Match>,
    /// Tokens of the included chunks, by the shared tokenizer.
    pub context_tokens: usize,
    pub query_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub top_k_max: usize,
    pub max_ctx_cap: usize,
    pub max_ctx_chunks: usize,
    pub snippet_max_chars: usize,
    pub index_probes: usize,
}

impl RetrieverConfig {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            top_k_max: cfg.top_k_max,
            max_ctx_cap: cfg.max_ctx_cap,
            max_ctx_chunks: cfg.max_ctx_chunks,
            snippet_max_chars: cfg.snippet_max_chars,
            index_probes: cfg.index_probes,
        }
    }
}

/// Dense retrieval with an optional rerank pass and a token-budgeted
/// context builder.
pub struct Retriever {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    reranker: Option<Arc<RerankerProvider>>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        reranker: Option<Arc<RerankerProvider>>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            reranker,
            config,
        }
    }

    /// Embed the query, search the index, hydrate and optionally rerank the
    /// candidates, then pack matches greedily under the token budget.
    ///
    /// Guarantees: matches are ordered by final score descending, contain no
    /// duplicate chunk ids, and all belong to `tenant_id`.
    #[instrument(skip_all, fields(tenant_id, top_k = request.top_k, rerank = request.rerank))]
    pub async fn retrieve(
        &self,
        tenant_id: &str,
        request: &RetrievalRequest,
    ) -> Result<Retrieval, AppError> {
        self.validate(request)?;

        let query_tokens = token_count::count_tokens(&request.query)?;

        let query_vector = self
            .embedder
            .embed(&request.query)
            .await
            .map_err(|e| AppError::RetrievalUnavailable(format!("query embedding failed: {e}")))?;

        let probes = request.probes.unwrap_or(self.config.index_probes);
        let hits = ChunkEmbedding::search(
            &self.db,
            tenant_id,
            query_vector,
            request.top_k,
            probes,
        )
        .await
        .map_err(|e| AppError::RetrievalUnavailable(format!("index search failed: {e}")))?;

        let ids: Vec<i64> = hits.iter().map(|hit| hit.chunk_id).collect();
        let chunks: HashMap<i64, Chunk> = Chunk::get_by_ids(&self.db, tenant_id, &ids)
            .await?
            .into_iter()
            .map(|chunk| (chunk.id, chunk))
            .collect();

        // Hydrate in rank order; hits without a surviving chunk row drop out.
        let mut candidates: Vec<(Chunk, f32)> = hits
            .into_iter()
            .filter_map(|hit| chunks.get(&hit.chunk_id).cloned().map(|c| (c, hit.score)))
            .collect();

        if request.rerank {
            if let Some(reranker) = &self.reranker {
                let documents: Vec<String> =
                    candidates.iter().map(|(chunk, _)| chunk.text.clone()).collect();
                let scores = reranker.rerank(&request.query, documents).await?;
                for (candidate, score) in candidates.iter_mut().zip(scores) {
                    candidate.1 = score;
                }
                candidates.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.id.cmp(&b.0.id))
                });
            }
        }

        // Greedy context packing: keep rank order, skip anything that would
        // burst the budget, stop at the chunk cap.
        let mut matches = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();
        let mut context_tokens = 0usize;

        for (chunk, score) in candidates {
            if matches.len() >= self.config.max_ctx_chunks {
                break;
            }
            if !seen.insert(chunk.id) {
                continue;
            }
            if context_tokens + chunk.token_count > request.max_ctx_tokens {
                continue;
            }
            context_tokens += chunk.token_count;
            matches.push(Match {
                document_id: chunk.document_id,
                chunk_id: chunk.id,
                page: chunk.page,
                score,
                snippet: snippet_of(&chunk.text, self.config.snippet_max_chars),
                breadcrumbs: chunk.header_path,
            });
        }

        Ok(Retrieval {
            matches,
            context_tokens,
            query_tokens,
        })
    }

    fn validate(&self, request: &RetrievalRequest) -> Result<(), AppError> {
        if request.query.trim().is_empty() {
            return Err(AppError::Validation("query must not be empty".into()));
        }
        if request.top_k == 0 || request.top_k > self.config.top_k_max {
            return Err(AppError::Validation(format!(
                "top_k must be within 1..={}",
                self.config.top_k_max
            )));
        }
        if request.max_ctx_tokens == 0 || request.max_ctx_tokens > self.config.max_ctx_cap {
            return Err(AppError::Validation(format!(
                "max_ctx must be within 1..={}",
                self.config.max_ctx_cap
            )));
        }
        Ok(())
    }
}

/// Truncate chunk text for presentation, preferring a sentence boundary
/// and falling back to a word boundary.
pub fn snippet_of(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }

    let head: String = trimmed.chars().take(max_chars).collect();

    for boundary in [". ", "! ", "? "] {
        if let Some(position) = head.rfind(boundary) {
            return head[..position + 1].trim_end().to_string();
        }
    }

    match head.rfind(' ') {
        Some(position) => format!("{}…", head[..position].trim_end()),
        None => format!("{head}…"),
    }
}
