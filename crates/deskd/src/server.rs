//! HTTP server for deskd

use crate::config::Config;
use crate::dispatch::{self, Delivery};
use crate::metrics::DeskMetrics;
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use desk_common::{Database, NotificationSink, QuotaEngine, SystemClock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub engine: QuotaEngine,
    pub metrics: DeskMetrics,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: QuotaEngine, metrics: DeskMetrics) -> Self {
        Self {
            engine,
            metrics,
            start_time: Instant::now(),
        }
    }
}

pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::catalog_routes())
        .merge(routes::quota_routes())
        .merge(routes::bundle_routes())
        .merge(routes::ticket_routes())
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}

/// Open storage, start the notification dispatcher and assemble the state.
pub async fn prepare(config: &Config) -> Result<(Arc<AppState>, JoinHandle<()>)> {
    let clock = SystemClock::from_offset_minutes(config.quota.utc_offset_minutes)?;
    let db = Database::open(&config.database.path)
        .await
        .with_context(|| format!("opening {}", config.database.path.display()))?;

    let metrics = DeskMetrics::new()?;
    let (sink, rx) = NotificationSink::channel();
    let dispatcher = dispatch::spawn(rx, Delivery::from_config(&config.notify)?, metrics.clone());

    let engine = QuotaEngine::new(db, Arc::new(clock), sink)
        .with_purchasable_sizes(config.quota.purchasable_bundle_sizes.clone());

    Ok((Arc::new(AppState::new(engine, metrics)), dispatcher))
}

/// Run the HTTP server
pub async fn run(config: Config) -> Result<()> {
    let (state, _dispatcher) = prepare(&config).await?;
    let app = build_app(state);

    let addr = config.server.bind_addr.as_str();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("  Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down gracefully");
        })
        .await?;
    Ok(())
}
