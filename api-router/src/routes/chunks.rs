use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use common::storage::types::chunk::Chunk;
use serde_json::json;

use crate::{
    api_state::{ApiState, TenantId},
    error::ApiError,
};

/// Fetch one chunk's full text, for citation expansion in clients.
pub async fn get_chunk(
    State(state): State<ApiState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Path(chunk_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let chunk = Chunk::get_for_tenant(&state.db, chunk_id, &tenant)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("chunk {chunk_id}")))?;

    Ok(Json(json!({
        "id": chunk.id,
        "doc_id": chunk.document_id,
        "page": chunk.page,
        "text": chunk.text,
        "header_path": chunk.header_path,
    })))
}
