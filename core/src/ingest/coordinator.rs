//! Ingestion coordinator: lifecycle of many source processors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::{self, index, registry, writer::DeduplicatingWriter};
use crate::enrich::geoip::GeoIpEnricher;
use crate::model::LogSource;
use crate::parsers::ParserRegistry;

use super::processor::{LiveSink, PauseGate, ProcessorConfig, ProcessorStatus, SourceProcessor};
use super::reader::IncrementalReader;

struct ProcessorHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
    gate: PauseGate,
    status: Arc<ProcessorStatus>,
}

/// The capability exposed to the index reconciler: pause every processor
/// before DDL and resume them afterward. No other shared mutable state
/// escapes the coordinator.
pub struct ProcessorGate<'a> {
    coordinator: &'a IngestionCoordinator,
}

impl ProcessorGate<'_> {
    pub async fn pause_all(&self) {
        self.coordinator.pause_all().await;
    }

    pub async fn resume_all(&self) {
        self.coordinator.resume_all().await;
    }
}

pub struct IngestionCoordinator {
    pool: SqlitePool,
    parsers: Arc<ParserRegistry>,
    writer: Arc<DeduplicatingWriter>,
    enricher: Arc<GeoIpEnricher>,
    live: Arc<dyn LiveSink>,
    config: ProcessorConfig,
    handles: Mutex<HashMap<String, ProcessorHandle>>,
    index_build_in_progress: AtomicBool,
}

impl IngestionCoordinator {
    #[must_use]
    pub fn new(
        pool: SqlitePool,
        parsers: Arc<ParserRegistry>,
        writer: Arc<DeduplicatingWriter>,
        enricher: Arc<GeoIpEnricher>,
        live: Arc<dyn LiveSink>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            pool,
            parsers,
            writer,
            enricher,
            live,
            config,
            handles: Mutex::new(HashMap::new()),
            index_build_in_progress: AtomicBool::new(false),
        }
    }

    /// Load every registered source and spawn a processor for each.
    pub async fn start(&self) -> Result<(), sqlx::Error> {
        let sources = registry::list(&self.pool).await?;
        info!(count = sources.len(), "starting ingestion coordinator");
        for source in sources {
            self.spawn_processor(source).await;
        }
        Ok(())
    }

    async fn spawn_processor(&self, source: LogSource) {
        let Some(parser_arc) = self.parsers.get_arc(&source.parser_type) else {
            warn!(source = %source.name, parser_type = %source.parser_type, "unknown parser type, skipping source");
            return;
        };

        let is_first_run = source.last_read_at.is_none() && source.last_position == 0;
        let reader = IncrementalReader::new(&source.path, source.last_position, source.last_inode, source.last_line_content.clone());
        let gate = PauseGate::new();
        let status = Arc::new(ProcessorStatus::default());
        let cancel = CancellationToken::new();

        let mut processor = SourceProcessor::new(
            source.name.clone(),
            reader,
            parser_arc,
            self.writer.clone(),
            self.pool.clone(),
            self.enricher.clone(),
            self.live.clone(),
            self.config.clone(),
            gate.clone(),
            status.clone(),
            is_first_run,
        );

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            processor.run(task_cancel).await;
        });

        let mut handles = self.handles.lock().await;
        handles.insert(source.name, ProcessorHandle { task, cancel, gate, status });
    }

    /// Cancel every processor and wait for each to drain and flush.
    pub async fn stop(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.values() {
            handle.cancel.cancel();
        }
        for (name, handle) in handles.drain() {
            if let Err(err) = handle.task.await {
                warn!(source = %name, error = %err, "processor task panicked");
            }
        }
    }

    pub async fn pause_all(&self) {
        let handles = self.handles.lock().await;
        for handle in handles.values() {
            handle.gate.pause();
        }
    }

    pub async fn resume_all(&self) {
        let handles = self.handles.lock().await;
        for handle in handles.values() {
            handle.gate.resume();
        }
    }

    #[must_use]
    pub fn gate(&self) -> ProcessorGate<'_> {
        ProcessorGate { coordinator: self }
    }

    /// Pause ingestion, reconcile indexes, then resume. `is_initial_load_complete`
    /// reports `false` for the duration.
    pub async fn run_index_reconciliation(&self) -> Result<(), sqlx::Error> {
        self.index_build_in_progress.store(true, Ordering::Relaxed);
        self.pause_all().await;
        let result = index::reconcile(&self.pool).await;
        self.resume_all().await;
        self.index_build_in_progress.store(false, Ordering::Relaxed);
        result
    }

    /// Periodic reconciliation: add processors for newly appeared sources,
    /// stop processors for deleted ones. Runs until `cancel` fires.
    pub async fn sync_with_database(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.sync_once().await {
                        warn!(error = %err, "database sync failed");
                    }
                }
            }
        }
    }

    async fn sync_once(&self) -> Result<(), sqlx::Error> {
        let names = registry::names(&self.pool).await?;
        let running: Vec<String> = { self.handles.lock().await.keys().cloned().collect() };

        for name in &names {
            if !running.contains(name) {
                if let Some(source) = registry::find(&self.pool, name).await? {
                    self.spawn_processor(source).await;
                }
            }
        }

        for name in running {
            if !names.contains(&name) {
                let handle = self.handles.lock().await.remove(&name);
                if let Some(handle) = handle {
                    handle.cancel.cancel();
                    let _ = handle.task.await;
                }
            }
        }
        Ok(())
    }

    /// `true` iff every running processor has finished its initial import
    /// and no index build is in progress.
    pub async fn is_initial_load_complete(&self) -> bool {
        if self.index_build_in_progress.load(Ordering::Relaxed) {
            return false;
        }
        let handles = self.handles.lock().await;
        handles.values().all(|h| h.status.is_initial_import_complete())
    }

    #[must_use]
    pub async fn has_existing_data(&self) -> Result<bool, sqlx::Error> {
        Ok(!db::is_empty(&self.pool).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::enrich::geoip::GeoIpEnricher;
    use crate::ingest::processor::NullLiveSink;
    use std::io::Write;

    async fn test_config() -> ProcessorConfig {
        ProcessorConfig {
            tick_interval: Duration::from_millis(10),
            batch_timeout: Duration::from_millis(20),
            ..ProcessorConfig::default()
        }
    }

    #[tokio::test]
    async fn start_spawns_a_processor_per_source_and_reaches_completion() {
        let pool = test_pool().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"time":"2025-06-01T10:00:00Z","request_X-Real-Ip":"1.2.3.4:1","RequestMethod":"GET","RequestPath":"/","DownstreamStatus":200,"Duration":1}}"#
        )
        .unwrap();
        registry::register(&pool, &LogSource::new("traefik-main", file.path().to_str().unwrap(), "traefik"))
            .await
            .unwrap();

        let writer = Arc::new(DeduplicatingWriter::new(pool.clone()).await.unwrap());
        let coordinator = IngestionCoordinator::new(
            pool.clone(),
            Arc::new(ParserRegistry::new()),
            writer,
            Arc::new(GeoIpEnricher::disabled()),
            Arc::new(NullLiveSink),
            test_config().await,
        );
        coordinator.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(coordinator.is_initial_load_complete().await);

        coordinator.stop().await;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM http_requests").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn pause_all_then_resume_all_does_not_lose_progress() {
        let pool = test_pool().await;
        let file = tempfile::NamedTempFile::new().unwrap();
        registry::register(&pool, &LogSource::new("traefik-main", file.path().to_str().unwrap(), "traefik"))
            .await
            .unwrap();

        let writer = Arc::new(DeduplicatingWriter::new(pool.clone()).await.unwrap());
        let coordinator = IngestionCoordinator::new(
            pool.clone(),
            Arc::new(ParserRegistry::new()),
            writer,
            Arc::new(GeoIpEnricher::disabled()),
            Arc::new(NullLiveSink),
            test_config().await,
        );
        coordinator.start().await.unwrap();
        coordinator.pause_all().await;
        coordinator.resume_all().await;
        coordinator.stop().await;
    }
}
