//! Operator endpoints. Authentication is expected in front of `/admin`.

use axum::{
    extract::{Path, State},
    Json,
};
use shopsearch_core::redact_identifier;
use validator::Validate;

use crate::{
    dto::*,
    error::{ApiError, ApiResult},
    resilience::circuit_breaker::CircuitBreakerSnapshot,
    security::rate_limit::AccessList,
    AppState,
};

pub async fn invalidate_cache(
    State(state): State<AppState>,
    Json(payload): Json<InvalidateRequest>,
) -> ApiResult<Json<InvalidateResponse>> {
    let cache = state.orchestrator.cache();
    let deleted = match payload {
        InvalidateRequest::Pattern { pattern } => {
            if pattern.trim().is_empty() {
                return Err(ApiError::BadRequest("pattern must not be empty".to_string()));
            }
            cache.delete(&pattern).await
        }
        InvalidateRequest::Event { event } => cache.invalidate(&event).await,
    };

    Ok(Json(InvalidateResponse { deleted }))
}

pub async fn list_circuit_breakers(
    State(state): State<AppState>,
) -> Json<CircuitBreakersResponse> {
    Json(CircuitBreakersResponse {
        circuit_breakers: state.breakers.snapshots().await,
    })
}

pub async fn reset_circuit_breaker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<CircuitBreakerSnapshot>> {
    let breaker = state
        .breakers
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Circuit breaker {} not found", name)))?;

    breaker.reset().await;
    Ok(Json(breaker.snapshot().await))
}

async fn change_list(
    state: &AppState,
    list: AccessList,
    payload: ListEntryRequest,
    add: bool,
) -> ApiResult<Json<ListEntryResponse>> {
    payload.validate()?;
    let limiter = state.orchestrator.limiter();

    let status = if add {
        limiter.add_to(list, &payload.identifier);
        "added"
    } else if limiter.remove_from(list, &payload.identifier) {
        "removed"
    } else {
        return Err(ApiError::NotFound(format!(
            "{} is not on the {}",
            redact_identifier(&payload.identifier),
            list.as_str()
        )));
    };

    Ok(Json(ListEntryResponse {
        status: status.to_string(),
        identifier: redact_identifier(&payload.identifier),
    }))
}

pub async fn add_to_allowlist(
    State(state): State<AppState>,
    Json(payload): Json<ListEntryRequest>,
) -> ApiResult<Json<ListEntryResponse>> {
    change_list(&state, AccessList::Allowlist, payload, true).await
}

pub async fn remove_from_allowlist(
    State(state): State<AppState>,
    Json(payload): Json<ListEntryRequest>,
) -> ApiResult<Json<ListEntryResponse>> {
    change_list(&state, AccessList::Allowlist, payload, false).await
}

pub async fn add_to_blocklist(
    State(state): State<AppState>,
    Json(payload): Json<ListEntryRequest>,
) -> ApiResult<Json<ListEntryResponse>> {
    change_list(&state, AccessList::Blocklist, payload, true).await
}

pub async fn remove_from_blocklist(
    State(state): State<AppState>,
    Json(payload): Json<ListEntryRequest>,
) -> ApiResult<Json<ListEntryResponse>> {
    change_list(&state, AccessList::Blocklist, payload, false).await
}

pub async fn rate_limit_status(State(state): State<AppState>) -> Json<RateLimitStatusResponse> {
    Json(RateLimitStatusResponse {
        status: state.orchestrator.limiter().status(),
        abuse_signals: state.orchestrator.abuse().signals(),
    })
}
