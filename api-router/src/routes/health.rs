use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Readiness: the process is only useful when the metadata store answers.
pub async fn readyz(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .query("RETURN 1;")
        .await
        .map_err(|e| ApiError::Unavailable(format!("metadata store unreachable: {e}")))?;

    Ok(Json(json!({ "status": "ready" })))
}
