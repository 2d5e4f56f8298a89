use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use common::utils::auth::{token_tenant, verify_token};
use realtime::gateway::{
    self, GatewayConfig, CLOSE_MISSING_TENANT, CLOSE_UNAUTHORIZED,
};
use serde::Deserialize;
use tracing::debug;

use crate::{api_state::ApiState, middleware_api_auth::DEFAULT_TENANT};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Signed tenant token; browsers cannot set Authorization headers on
    /// WebSocket requests, so the token may ride in the query string. The
    /// tenant used for filtering always comes out of the validated token.
    pub token: Option<String>,
}

/// Upgrade to a WebSocket and bridge the tenant's event topic onto it.
/// Authentication failures close with the gateway's 4001/4002 codes after
/// the upgrade, so clients get a deterministic close frame.
pub async fn ws_upgrade(
    State(state): State<ApiState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
) -> Response {
    let token = header_token(&headers).or(params.token);
    let gateway_config = GatewayConfig::from_config(&state.config);

    ws.on_upgrade(move |socket| async move {
        let tenant = match token {
            None if !state.config.require_auth => DEFAULT_TENANT.to_string(),
            None => {
                gateway::reject(socket, CLOSE_UNAUTHORIZED, "unauthorized").await;
                return;
            }
            Some(token) => {
                if token_tenant(&token).is_none() {
                    gateway::reject(socket, CLOSE_MISSING_TENANT, "missing tenant").await;
                    return;
                }
                match verify_token(&state.config.auth_secret, &token) {
                    Ok(tenant) => tenant,
                    Err(err) => {
                        debug!(error = %err, "websocket auth failed");
                        gateway::reject(socket, CLOSE_UNAUTHORIZED, "unauthorized").await;
                        return;
                    }
                }
            }
        };

        gateway::run_connection(socket, tenant, state.bus, gateway_config).await;
    })
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|auth| auth.strip_prefix("Bearer ").map(str::trim))
        })
        .map(String::from)
}
