use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension, Json,
};
use futures::StreamExt;
use retrieval_pipeline::answer::{AnswerEvent, AnswerRequest};
use serde::Deserialize;
use serde_json::json;

use crate::{
    api_state::{ApiState, TenantId},
    error::ApiError,
    routes::query::QueryBody,
};

#[derive(Debug, Deserialize)]
pub struct AnswerBody {
    pub query: String,
    pub top_k: Option<usize>,
    pub rerank: Option<bool>,
    pub max_ctx: Option<usize>,
    pub probes: Option<usize>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl AnswerBody {
    fn into_answer_request(self, state: &ApiState) -> AnswerRequest {
        let temperature = self.temperature;
        let max_tokens = self.max_tokens;
        let retrieval = QueryBody {
            query: self.query,
            top_k: self.top_k,
            rerank: self.rerank,
            max_ctx: self.max_ctx,
            probes: self.probes,
        }
        .into_retrieval_request(state);

        AnswerRequest {
            retrieval,
            temperature,
            max_tokens,
        }
    }
}

/// Full grounded answer, non-streaming.
pub async fn answer(
    State(state): State<ApiState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Json(body): Json<AnswerBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.into_answer_request(&state);
    let answer = state.orchestrator.answer(&tenant, &request).await?;

    Ok(Json(json!({
        "answer": answer.answer,
        "citations": answer.citations,
        "usage": answer.usage,
    })))
}

/// Streamed answer over SSE: `chunk` events while tokens arrive, then one
/// terminal `done` (citations + usage) or `error`.
pub async fn answer_stream(
    State(state): State<ApiState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Json(body): Json<AnswerBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.into_answer_request(&state);
    let events = state.orchestrator.answer_stream(&tenant, &request).await?;

    let stream = events.map(|event| {
        Ok::<Event, Infallible>(match event {
            AnswerEvent::Chunk(text) => Event::default().event("chunk").data(text),
            AnswerEvent::Done { citations, usage } => Event::default().event("done").data(
                json!({ "citations": citations, "usage": usage }).to_string(),
            ),
            AnswerEvent::Error(message) => Event::default().event("error").data(message),
        })
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
