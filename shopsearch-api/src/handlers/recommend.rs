use std::net::SocketAddr;

use axum::{
    extract::{rejection::QueryRejection, ConnectInfo, Path, Query, State},
    http::HeaderMap,
    response::Response,
    Extension,
};
use shopsearch_core::{CacheKey, Endpoint};
use validator::Validate;

use super::{products_response, protected, request_context};
use crate::{
    dto::RecommendParams,
    error::{ApiError, ApiResult},
    observability::logging::RequestId,
    AppState,
};

/// Quota is charged before the query string is parsed or validated.
pub async fn recommend(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    params: Result<Query<RecommendParams>, QueryRejection>,
) -> ApiResult<Response> {
    let ctx = request_context(&headers, connect, request_id, Endpoint::Recommend)
        .with_resource_id(&user_id);
    let admitted = state.orchestrator.admitted(&ctx).await?;

    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    params.validate()?;
    if user_id.is_empty() || user_id.len() > 128 {
        return Err(ApiError::BadRequest(
            "user_id must be between 1 and 128 characters".to_string(),
        ));
    }

    let key = CacheKey::recommend(&user_id, params.category.as_deref(), params.k);
    let served = state
        .orchestrator
        .serve_admitted(&ctx, admitted, key, || {
            protected(&state.backend_breaker, || {
                state
                    .backend
                    .recommend(&user_id, params.category.as_deref(), params.k)
            })
        })
        .await?;

    Ok(products_response(served, ctx.request_id))
}
