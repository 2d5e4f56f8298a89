#![allow(clippy::missing_docs_in_private_items)]

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod middleware_quota;
mod routes;

use api_state::ApiState;

/// Assemble the full HTTP surface. Probes and the WebSocket upgrade are
/// public (the gateway authenticates inside the connection); everything
/// else sits behind tenant auth and the quota gate.
pub fn router(state: ApiState) -> Router {
    let public = Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz))
        .route("/ws", get(routes::ws::ws_upgrade));

    let protected = Router::new()
        .route(
            "/ingest",
            post(routes::ingest::ingest).layer(DefaultBodyLimit::max(
                state.config.ingest_max_body_bytes + 64 * 1024,
            )),
        )
        .route("/ingest/{job_id}", get(routes::ingest::get_job))
        .route(
            "/ingest/document/{document_id}",
            get(routes::ingest::get_document).delete(routes::ingest::delete_document),
        )
        .route("/documents", get(routes::ingest::list_documents))
        .route("/query", post(routes::query::query))
        .route("/answer", post(routes::answer::answer))
        .route("/answer/stream", post(routes::answer::answer_stream))
        .route("/chunks/{id}", get(routes::chunks::get_chunk))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_quota::enforce_quotas,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_api_auth::api_auth,
        ));

    public.merge(protected).with_state(state)
}
