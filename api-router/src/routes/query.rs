use std::time::Instant;

use axum::{extract::State, response::IntoResponse, Extension, Json};
use common::storage::types::usage_record::UsageRecord;
use retrieval_pipeline::RetrievalRequest;
use serde::Deserialize;
use serde_json::json;

use crate::{
    api_state::{ApiState, TenantId},
    error::ApiError,
};

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub query: String,
    pub top_k: Option<usize>,
    pub rerank: Option<bool>,
    pub max_ctx: Option<usize>,
    pub probes: Option<usize>,
}

impl QueryBody {
    pub(crate) fn into_retrieval_request(self, state: &ApiState) -> RetrievalRequest {
        RetrievalRequest {
            query: self.query,
            top_k: self.top_k.unwrap_or(state.config.top_k_default),
            rerank: self.rerank.unwrap_or(false),
            max_ctx_tokens: self.max_ctx.unwrap_or(state.config.max_ctx_tokens),
            probes: self.probes,
        }
    }
}

/// Retrieval without generation: ranked matches plus token accounting.
pub async fn query(
    State(state): State<ApiState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Json(body): Json<QueryBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.into_retrieval_request(&state);

    let started = Instant::now();
    let retrieval = state.retriever.retrieve(&tenant, &request).await?;
    let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

    let in_tokens = i64::try_from(retrieval.query_tokens).unwrap_or(0);
    if let Err(err) = UsageRecord::record(
        &state.db,
        &tenant,
        "query",
        "index",
        "vector-search",
        in_tokens,
        0,
        latency_ms,
    )
    .await
    {
        tracing::debug!(error = %err, "failed to record query usage");
    }

    Ok(Json(json!({
        "matches": retrieval.matches,
        "usage": {
            "in_tokens": in_tokens,
            "latency_ms": latency_ms,
        },
    })))
}
