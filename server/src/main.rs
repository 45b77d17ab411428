//! Logwatch Server - Main Entry Point
//!
//! Self-hosted HTTP access-log analytics service: tails Traefik/Caddy
//! access logs, persists them in an embedded SQLite store, and serves
//! live metrics and historical stats over a thin Axum facade.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use logwatch_core::db::pool::{self, PoolSizing};
use logwatch_core::db::retention::{RetentionConfig, RetentionService};
use logwatch_core::db::writer::DeduplicatingWriter;
use logwatch_core::db;
use logwatch_core::enrich::geoip::{GeoIpEnricher, NullGeoLookup};
use logwatch_core::ingest::coordinator::IngestionCoordinator;
use logwatch_core::ingest::discovery::{self, ProcessEnv};
use logwatch_core::ingest::processor::ProcessorConfig;
use logwatch_core::live::LiveCollector;
use logwatch_core::parsers::ParserRegistry;

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logwatch_server=info,logwatch_core=info,tower_http=info".into()),
        )
        .json()
        .init();

    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting logwatch server");

    let PoolSizing { max_connections, min_connections } =
        pool::resolve_sizing(config.auto_tuning, config.max_open_conns, config.max_idle_conns);
    let lifecycle = db::PoolLifecycle { min_connections, max_lifetime: config.conn_max_life };
    let db_pool = db::create_pool(&config.database_url, max_connections, lifecycle).await?;
    db::run_migrations(&db_pool).await?;

    let parsers = Arc::new(ParserRegistry::new());

    let root_cancel = CancellationToken::new();
    let mut background_tasks = Vec::new();

    if config.pool_monitoring_enabled {
        let task = tokio::spawn(pool::monitor(
            db_pool.clone(),
            config.pool_monitoring_interval,
            config.pool_saturation_threshold,
            root_cancel.child_token(),
        ));
        background_tasks.push(task);
    }

    if config.log_auto_discover {
        match discovery::discover(&db_pool, &parsers, &ProcessEnv).await {
            Ok(sources) if !sources.is_empty() => {
                info!(count = sources.len(), "discovered log sources");
            }
            Ok(_) => info!("no new log sources discovered"),
            Err(err) => tracing::warn!(error = %err, "log source discovery failed"),
        }
    }

    let geoip = if config.geoip_enabled {
        let enricher = GeoIpEnricher::new(true, Arc::new(NullGeoLookup), db_pool.clone());
        enricher.warm_up().await;
        Arc::new(enricher)
    } else {
        Arc::new(GeoIpEnricher::disabled())
    };

    let live = Arc::new(LiveCollector::new());
    let live_task = tokio::spawn({
        let live = live.clone();
        let cancel = root_cancel.child_token();
        let interval = config.live_collector_interval;
        async move { live.start(interval, cancel).await }
    });
    background_tasks.push(live_task);

    let writer = Arc::new(DeduplicatingWriter::new(db_pool.clone()).await?);

    let processor_config = ProcessorConfig {
        batch_size: config.batch_size,
        worker_pool_width: config.worker_pool_size,
        initial_import_days: config.effective_initial_import_days(),
        ..ProcessorConfig::default()
    };

    let coordinator = Arc::new(IngestionCoordinator::new(
        db_pool.clone(),
        parsers,
        writer,
        geoip,
        live.clone(),
        processor_config,
    ));
    coordinator.start().await?;

    if !db::is_empty(&db_pool).await? {
        coordinator.run_index_reconciliation().await?;
    } else {
        info!("deferring index build until first load completes");
    }

    let sync_task = tokio::spawn({
        let coordinator = coordinator.clone();
        let cancel = root_cancel.child_token();
        let interval = config.coordinator_sync_interval;
        async move { coordinator.sync_with_database(interval, cancel).await }
    });
    background_tasks.push(sync_task);

    if config.retention_days > 0 {
        let retention_config = RetentionConfig {
            retention_days: config.retention_days,
            cleanup_time: RetentionConfig::parse_cleanup_time(&config.cleanup_time),
            cleanup_interval: config.cleanup_interval,
            vacuum_enabled: config.vacuum_enabled,
        };
        let retention = Arc::new(RetentionService::new(db_pool.clone(), retention_config));
        let retention_task = tokio::spawn({
            let retention = retention.clone();
            let cancel = root_cancel.child_token();
            async move { retention.run(cancel).await }
        });
        background_tasks.push(retention_task);
    }

    let state = api::AppState::new(db_pool, live, coordinator.clone());
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "server listening");

    let shutdown_signal = async {
        tokio::signal::ctrl_c().await.expect("failed to install CTRL+C signal handler");
        info!("received shutdown signal, draining processors...");
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal).await?;

    root_cancel.cancel();
    coordinator.stop().await;
    for task in background_tasks {
        task.abort();
    }

    info!("server shutdown complete");
    Ok(())
}
