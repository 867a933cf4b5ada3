use std::time::Duration;

use axum::{extract::State, Json};
use shopsearch_core::StoreError;

use crate::{
    dto::{BreakerHealth, HealthResponse, StoreHealth},
    resilience::{circuit_breaker::CircuitState, timeout::with_timeout},
    AppState,
};

const PING_TIMEOUT: Duration = Duration::from_millis(250);

/// Always 200; `status` is `degraded` when the store is unreachable or any breaker is not closed.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = match with_timeout(PING_TIMEOUT, state.store.ping()).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %StoreError::from(e), "health_store_ping_failed");
            false
        }
    };

    let snapshots = state.breakers.snapshots().await;
    let all_closed = snapshots.iter().all(|s| s.state == CircuitState::Closed);

    Json(HealthResponse {
        status: if reachable && all_closed {
            "healthy"
        } else {
            "degraded"
        },
        store: StoreHealth {
            backend: state.store.backend(),
            reachable,
        },
        circuit_breakers: snapshots
            .into_iter()
            .map(|s| BreakerHealth {
                name: s.name,
                state: s.state.to_string(),
            })
            .collect(),
        cache: state.orchestrator.cache().statistics().await,
    })
}
