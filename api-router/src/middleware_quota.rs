use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    Extension,
};
use chrono::{Duration, Utc};
use common::storage::types::quota_counter::QuotaCounter;

use crate::{
    api_state::{ApiState, TenantId},
    error::ApiError,
};

/// Per-tenant request rate limiting and daily token quota gate. Counters
/// live in the metadata store, so every API process shares the same
/// windows.
pub async fn enforce_quotas(
    State(state): State<ApiState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let now = Utc::now();

    let minute_key = QuotaCounter::minute_key(&tenant, now);
    let requests = QuotaCounter::increment(
        &state.db,
        &minute_key,
        1,
        now + Duration::minutes(2),
    )
    .await
    .map_err(ApiError::from)?;

    if requests > state.config.rate_limit_per_min {
        return Err(ApiError::TooManyRequests(format!(
            "rate limit of {} requests per minute exceeded",
            state.config.rate_limit_per_min
        )));
    }

    let day_key = QuotaCounter::day_key(&tenant, now);
    let tokens_today = QuotaCounter::current(&state.db, &day_key)
        .await
        .map_err(ApiError::from)?;
    if tokens_today >= state.config.daily_token_quota {
        return Err(ApiError::TooManyRequests(format!(
            "daily token quota of {} exhausted",
            state.config.daily_token_quota
        )));
    }

    Ok(next.run(request).await)
}
