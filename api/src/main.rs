mod config;
mod constants;
mod content_filter;
mod domain;
mod error;
mod logging;
mod routes;
mod services;

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use config::Config;
use content_filter::{AdapterRegistry, FaceAdapter, NudityAdapter};
use services::coordinator::{Coordinator, CoordinatorOptions};

pub struct AppState {
    pub coordinator: Coordinator,
    pub config: Config,
    pub started_at: Instant,
}

/// Full router with middleware, shared by `main` and the route tests
fn app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;

    routes::build_routes()
        .layer(DefaultBodyLimit::max(body_limit))
        // Moderation is called from other backends and browsers alike
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Load every model on the blocking pool without holding up startup.
/// A failed warm-up is retried lazily by the first request that needs the model.
fn spawn_warm_up(adapters: &AdapterRegistry) {
    for adapter in adapters.adapters() {
        let adapter = adapter.clone();
        tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            match adapter.warm_up() {
                Ok(()) => tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "[warmup] {} model loaded",
                    adapter.operation()
                ),
                Err(e) => tracing::error!("[warmup] {} model failed to load: {}", adapter.operation(), e),
            }
        });
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received, draining connections"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let config = Config::from_env();
    tracing::info!(
        port = config.port,
        redis = config.redis_url_redacted().as_deref().unwrap_or("-"),
        cache_ttl_secs = config.cache_ttl.as_secs(),
        inference_workers = config.inference_workers,
        "Starting {} v{}",
        constants::SERVICE_NAME,
        constants::VERSION
    );

    let cache = services::cache::connect(&config).await;
    let stats = cache.stats().await;
    tracing::info!(
        backend = stats.backend,
        connected = stats.connected,
        used_memory = stats.used_memory.as_deref().unwrap_or("-"),
        connected_clients = stats.connected_clients.unwrap_or_default(),
        "[cache] store ready"
    );

    let adapters = AdapterRegistry::new()
        .register(Arc::new(NudityAdapter::new(config.nudity_model_repo.clone())))
        .register(Arc::new(FaceAdapter::new(config.face_model_repo.clone())));

    if config.warmup_models {
        spawn_warm_up(&adapters);
    } else {
        tracing::info!("[warmup] skipped, models load on first use");
    }

    let coordinator = Coordinator::new(cache, adapters, CoordinatorOptions::from(&config));
    let addr = format!("0.0.0.0:{}", config.port);

    let state = Arc::new(AppState {
        coordinator,
        config,
        started_at: Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
