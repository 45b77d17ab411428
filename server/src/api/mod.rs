//! API Router and Application State
//!
//! Central routing configuration and shared state. This facade exists to
//! prove the core crate's three external contracts (ingestion runs in the
//! background, the live snapshot is subscribable, the stats repository is
//! queryable) are callable end to end; it intentionally stops short of a
//! dashboard.

mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use logwatch_core::ingest::coordinator::IngestionCoordinator;
use logwatch_core::live::LiveCollector;
use logwatch_core::stats::StatsRepository;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub stats: Arc<StatsRepository>,
    pub live: Arc<LiveCollector>,
    pub coordinator: Arc<IngestionCoordinator>,
}

impl AppState {
    #[must_use]
    pub fn new(
        db: SqlitePool,
        live: Arc<LiveCollector>,
        coordinator: Arc<IngestionCoordinator>,
    ) -> Self {
        let stats = Arc::new(StatsRepository::new(db.clone()));
        Self { db, stats, live, coordinator }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/live/snapshot", get(handlers::live_snapshot))
        .route("/api/stats/summary", get(handlers::stats_summary))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state)
}
