use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use common::utils::auth::verify_token;

use crate::{api_state::ApiState, error::ApiError};

/// The fallback tenant used when authentication is disabled.
pub const DEFAULT_TENANT: &str = "default";

/// Resolve the tenant from bearer/API-key credentials and attach it as an
/// extension. With `REQUIRE_AUTH` off, requests without credentials run as
/// the default tenant; presented credentials are still validated.
pub async fn api_auth(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let tenant = match extract_api_key(&request) {
        Some(token) => verify_token(&state.config.auth_secret, &token)
            .map_err(|_| ApiError::Unauthorized("invalid credentials".to_string()))?,
        None if !state.config.require_auth => DEFAULT_TENANT.to_string(),
        None => {
            return Err(ApiError::Unauthorized(
                "You have to be authenticated".to_string(),
            ))
        }
    };

    request
        .extensions_mut()
        .insert(crate::api_state::TenantId(tenant));

    Ok(next.run(request).await)
}

pub fn extract_api_key(request: &Request) -> Option<String> {
    request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|auth| auth.strip_prefix("Bearer ").map(str::trim))
        })
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    fn request_with_header(name: &str, value: &str) -> Request {
        HttpRequest::builder()
            .uri("/query")
            .header(name, value)
            .body(Body::empty())
            .expect("request")
    }

    #[test]
    fn bearer_and_api_key_headers_are_accepted() {
        let bearer = request_with_header("Authorization", "Bearer abc.def");
        assert_eq!(extract_api_key(&bearer), Some("abc.def".to_string()));

        let api_key = request_with_header("X-API-Key", "abc.def");
        assert_eq!(extract_api_key(&api_key), Some("abc.def".to_string()));

        let none = HttpRequest::builder()
            .uri("/query")
            .body(Body::empty())
            .expect("request");
        assert_eq!(extract_api_key(&none), None);
    }
}
