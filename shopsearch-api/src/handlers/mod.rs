pub mod admin;
pub mod health;
pub mod recommend;
pub mod search;

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Extension, Json,
};
use shopsearch_core::{CoreError, Endpoint, RankedProduct};
use uuid::Uuid;

use crate::dto::ProductsResponse;
use crate::observability::logging::RequestId;
use crate::orchestrator::{RequestContext, Served};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::security::rate_limit::{
    add_rate_limit_headers, extract_client_identity, extract_client_ip,
};

fn request_context(
    headers: &HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    request_id: Option<Extension<RequestId>>,
    endpoint: Endpoint,
) -> RequestContext {
    let remote = connect.map(|ConnectInfo(addr)| addr);
    let identity = extract_client_identity(headers, remote);
    let request_id = request_id
        .map(|Extension(RequestId(id))| id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    RequestContext::new(identity, endpoint, request_id)
        .with_client_ip(extract_client_ip(headers, remote))
}

/// Runs the backend computation under its breaker. An open breaker has no fallback.
async fn protected<T, F, Fut>(breaker: &CircuitBreaker, f: F) -> shopsearch_core::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = shopsearch_core::Result<T>>,
{
    breaker.call(f).await.map_err(|e| match e {
        CircuitBreakerError::Open { name, state } => {
            CoreError::Internal(format!("{} circuit is {}", name, state))
        }
        CircuitBreakerError::Operation(e) => e,
    })
}

fn products_response(served: Served<Vec<RankedProduct>>, request_id: String) -> Response {
    let mut response = Json(ProductsResponse {
        results: served.value,
        cache: served.cache,
        request_id,
    })
    .into_response();

    add_rate_limit_headers(response.headers_mut(), &served.rate_limit);
    response
        .headers_mut()
        .insert("X-Cache", HeaderValue::from_static(served.cache.as_str()));
    response
}
