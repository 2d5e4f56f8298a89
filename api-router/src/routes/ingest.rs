use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::storage::{
    store::{document_prefix, extension_of, object_location, sha256_hex},
    types::{
        document::Document,
        job::{Job, JobKind},
        tenant::Tenant,
    },
};
use ingestion_pipeline::parser::supported_mime;
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::info;

use crate::{
    api_state::{ApiState, TenantId},
    error::ApiError,
};

/// Formats whose parsers only read plain text; everything else is refused
/// when the client asks for safe mode.
const SAFE_MODE_MIMES: [&str; 4] = [
    "text/plain",
    "text/markdown",
    "text/csv",
    "text/tab-separated-values",
];

#[derive(Debug, TryFromMultipart)]
pub struct IngestParams {
    // The transport cap is the config-driven DefaultBodyLimit layer on the
    // route; no per-field limit here, so raising INGEST_MAX_BODY_BYTES
    // never trips a hidden extractor ceiling.
    #[form_data(limit = "unlimited")]
    pub file: FieldData<NamedTempFile>,
    pub safe_mode: Option<bool>,
}

/// Accept an upload, persist it, and enqueue the parse stage.
pub async fn ingest(
    State(state): State<ApiState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    TypedMultipart(input): TypedMultipart<IngestParams>,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = input
        .file
        .metadata
        .file_name
        .clone()
        .unwrap_or_else(|| "upload".to_string());

    let mime = input
        .file
        .metadata
        .content_type
        .clone()
        .filter(|ct| ct != "application/octet-stream")
        .unwrap_or_else(|| {
            mime_guess::from_path(&file_name)
                .first_or_octet_stream()
                .to_string()
        });

    if !supported_mime(&mime) {
        return Err(ApiError::UnsupportedMedia(format!(
            "cannot ingest {mime} documents"
        )));
    }
    if input.safe_mode.unwrap_or(false)
        && !SAFE_MODE_MIMES.contains(&mime.split(';').next().unwrap_or("").trim())
    {
        return Err(ApiError::UnsupportedMedia(format!(
            "{mime} is not allowed in safe mode"
        )));
    }

    let bytes = tokio::fs::read(input.file.contents.path())
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    if bytes.len() > state.config.ingest_max_body_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "upload of {} bytes exceeds the {} byte cap",
            bytes.len(),
            state.config.ingest_max_body_bytes
        )));
    }

    let sha = sha256_hex(&bytes);
    let size = i64::try_from(bytes.len()).unwrap_or(i64::MAX);

    Tenant::ensure(&state.db, &tenant).await?;

    let document_id = state.db.next_id("document").await?;
    let uri = object_location(&tenant, document_id, &sha, extension_of(&file_name));

    state.storage.put(&uri, bytes::Bytes::from(bytes)).await?;

    let document = Document::new(document_id, tenant.clone(), file_name, mime, size, uri);
    state.db.store_item(document).await.map_err(|e| {
        tracing::error!(error = %e, "failed to store document row");
        ApiError::InternalError("failed to store document".to_string())
    })?;

    let job = Job::enqueue(&state.db, document_id, &tenant, JobKind::Parse)
        .await?
        .ok_or_else(|| ApiError::InternalError("parse job already open".to_string()))?;

    info!(document_id, job_id = job.id, %tenant, "document accepted for ingestion");

    Ok((
        StatusCode::OK,
        Json(json!({
            "job_id": job.id,
            "document_id": document_id,
            "status": "queued",
        })),
    ))
}

/// Authoritative job status, straight from the metadata store.
pub async fn get_job(
    State(state): State<ApiState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Path(job_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let job = Job::get_for_tenant(&state.db, job_id, &tenant)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;

    Ok(Json(json!({
        "job_id": job.id,
        "kind": job.kind.as_str(),
        "status": job.status,
        "progress": job.progress,
        "document_id": job.document_id,
        "created_at": job.created_at,
        "updated_at": job.updated_at,
        "error": job.error,
    })))
}

/// All jobs for a document plus its aggregate status.
pub async fn get_document(
    State(state): State<ApiState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Path(document_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let document = Document::get_for_tenant(&state.db, document_id, &tenant)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document {document_id}")))?;

    let jobs: Vec<serde_json::Value> = Job::for_document(&state.db, document_id)
        .await?
        .into_iter()
        .map(|job| {
            json!({
                "job_id": job.id,
                "kind": job.kind.as_str(),
                "status": job.status,
                "progress": job.progress,
                "created_at": job.created_at,
                "updated_at": job.updated_at,
                "error": job.error,
            })
        })
        .collect();

    Ok(Json(json!({
        "document_id": document_id,
        "status": document.status.as_str(),
        "jobs": jobs,
    })))
}

/// List the tenant's documents, newest first.
pub async fn list_documents(
    State(state): State<ApiState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
) -> Result<impl IntoResponse, ApiError> {
    let documents: Vec<serde_json::Value> = Document::list_for_tenant(&state.db, &tenant)
        .await?
        .into_iter()
        .map(|doc| {
            json!({
                "document_id": doc.id,
                "name": doc.name,
                "mime": doc.mime,
                "size_bytes": doc.size_bytes,
                "status": doc.status.as_str(),
                "created_at": doc.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "documents": documents })))
}

/// Delete a document, everything derived from it, and its stored objects.
pub async fn delete_document(
    State(state): State<ApiState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Path(document_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Document::get_for_tenant(&state.db, document_id, &tenant)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document {document_id}")))?;

    Document::delete_cascade(&state.db, document_id).await?;
    state
        .storage
        .delete_prefix(&document_prefix(&tenant, document_id))
        .await?;

    info!(document_id, %tenant, "document deleted");
    Ok((StatusCode::OK, Json(json!({ "status": "deleted" }))))
}
