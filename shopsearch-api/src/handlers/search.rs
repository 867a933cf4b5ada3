use std::net::SocketAddr;

use axum::{
    extract::{rejection::QueryRejection, ConnectInfo, Query, State},
    http::HeaderMap,
    response::Response,
    Extension,
};
use shopsearch_core::{CacheKey, Endpoint};
use validator::Validate;

use super::{products_response, protected, request_context};
use crate::{
    dto::SearchParams,
    error::{ApiError, ApiResult},
    observability::logging::RequestId,
    AppState,
};

/// Quota is charged before the query string is parsed or validated.
pub async fn search(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<Response> {
    let mut ctx = request_context(&headers, connect, request_id, Endpoint::Search);
    if let Ok(Query(params)) = &params {
        ctx = ctx.with_query(&params.q);
    }
    let admitted = state.orchestrator.admitted(&ctx).await?;

    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    params.validate()?;
    if params.q.trim().is_empty() {
        return Err(ApiError::BadRequest("q must not be blank".to_string()));
    }

    let key = CacheKey::search(&params.q, params.user_id.as_deref(), params.k);
    let served = state
        .orchestrator
        .serve_admitted(&ctx, admitted, key, || {
            protected(&state.backend_breaker, || {
                state
                    .backend
                    .search(&params.q, params.user_id.as_deref(), params.k)
            })
        })
        .await?;

    Ok(products_response(served, ctx.request_id))
}
