use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use shopsearch_api::{
    observability::{init_logging, init_metrics},
    routes, AppState,
};
use shopsearch_core::{KeyValueStore, SearchBackend};
use shopsearch_storage::{CatalogBackend, MemoryStore, RedisConfig, RedisStore};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::load()?;

    init_logging(config.logging.clone()).map_err(|e| anyhow::anyhow!(e))?;
    init_metrics()?;
    tracing::info!("Starting ShopSearch server");

    let store: Arc<dyn KeyValueStore> = match &config.store.redis_url {
        Some(url) => {
            let redis_config =
                RedisConfig::new(url.clone()).with_scan_batch_size(config.store.scan_batch_size);
            let store = RedisStore::connect(&redis_config)
                .await
                .context("failed to connect to redis")?;
            Arc::new(store)
        }
        None => {
            let store = MemoryStore::new().with_scan_batch_size(config.store.scan_batch_size);
            store.start_cleanup_task(config.store.cleanup_interval());
            tracing::warn!("No redis_url configured; quotas and cache are local to this process");
            Arc::new(store)
        }
    };

    let backend: Arc<dyn SearchBackend> = match &config.catalog_path {
        Some(path) => Arc::new(CatalogBackend::load_json(path).await?),
        None => Arc::new(CatalogBackend::sample()),
    };

    let state = AppState::new(store, backend, config.resilience);
    state
        .orchestrator
        .abuse()
        .start_cleanup_task(config.resilience.abuse.window());

    let mut app = routes(state).layer(TraceLayer::new_for_http());
    if config.server.permissive_cors {
        app = app.layer(CorsLayer::permissive());
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
