//! Source processor: the end-to-end pipeline for one tailed source.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{registry, writer::DeduplicatingWriter};
use crate::enrich::{self, geoip::GeoIpEnricher};
use crate::model::RequestEvent;
use crate::parsers::{truncated_preview, Parser};

use super::reader::IncrementalReader;

/// Seam the processor publishes committed events through, implemented by
/// the live-metrics collector. Kept independent of `live` so this module
/// has no dependency on it.
pub trait LiveSink: Send + Sync {
    fn ingest(&self, event: &RequestEvent);
}

pub struct NullLiveSink;
impl LiveSink for NullLiveSink {
    fn ingest(&self, _event: &RequestEvent) {}
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub batch_size: usize,
    pub worker_pool_width: usize,
    pub batch_timeout: Duration,
    pub tick_interval: Duration,
    /// Clamp applied only on a source's first-ever run: lines older than
    /// `now - initial_import_days` are discarded at parse time.
    pub initial_import_days: Option<i64>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            worker_pool_width: 4,
            batch_timeout: Duration::from_secs(2),
            tick_interval: Duration::from_secs(1),
            initial_import_days: None,
        }
    }
}

/// The pause gate a coordinator flips during index rebuilds. Cheap to
/// clone and share; consulted once per tick.
#[derive(Clone, Default)]
pub struct PauseGate(Arc<AtomicBool>);

impl PauseGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Observability and lifecycle state shared between a running processor
/// task and the coordinator that owns it. Kept outside [`SourceProcessor`]
/// itself so the coordinator can read it after the processor has been
/// moved into its task.
#[derive(Default)]
pub struct ProcessorStatus {
    errors: AtomicU64,
    initial_import_complete: AtomicBool,
}

impl ProcessorStatus {
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_initial_import_complete(&self) -> bool {
        self.initial_import_complete.load(Ordering::Relaxed)
    }
}

pub struct SourceProcessor {
    source_name: String,
    reader: IncrementalReader,
    parser: Arc<dyn Parser>,
    writer: Arc<DeduplicatingWriter>,
    registry_pool: SqlitePool,
    enricher: Arc<GeoIpEnricher>,
    live: Arc<dyn LiveSink>,
    config: ProcessorConfig,
    gate: PauseGate,
    status: Arc<ProcessorStatus>,
    is_first_run: bool,
}

impl SourceProcessor {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_name: String,
        reader: IncrementalReader,
        parser: Arc<dyn Parser>,
        writer: Arc<DeduplicatingWriter>,
        registry_pool: SqlitePool,
        enricher: Arc<GeoIpEnricher>,
        live: Arc<dyn LiveSink>,
        config: ProcessorConfig,
        gate: PauseGate,
        status: Arc<ProcessorStatus>,
        is_first_run: bool,
    ) -> Self {
        status.initial_import_complete.store(!is_first_run, Ordering::Relaxed);
        Self {
            source_name,
            reader,
            parser,
            writer,
            registry_pool,
            enricher,
            live,
            config,
            gate,
            status,
            is_first_run,
        }
    }

    /// Main loop: 1s ticker driving read → parse/enrich → batch → commit,
    /// until `cancel` fires, flushing any pending batch before returning.
    pub async fn run(&mut self, cancel: CancellationToken) {
        if let Err(err) = self.reader.reconcile() {
            warn!(source = %self.source_name, error = %err, "reader reconciliation failed");
        }

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        let mut batch: Vec<RequestEvent> = Vec::new();
        let mut batch_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.flush(&mut batch).await;
                    info!(source = %self.source_name, "processor cancelled, flushed pending batch");
                    return;
                }
                _ = ticker.tick() => {
                    if self.gate.is_paused() {
                        continue;
                    }
                    if let Err(err) = self.tick(&mut batch).await {
                        warn!(source = %self.source_name, error = %err, "reader error, retrying next tick");
                    }

                    if batch_deadline.is_none() && !batch.is_empty() {
                        batch_deadline = Some(Instant::now() + self.config.batch_timeout);
                    }
                    let full = batch.len() >= self.config.batch_size;
                    let timed_out = batch_deadline.is_some_and(|d| Instant::now() >= d);
                    if full || timed_out {
                        self.flush(&mut batch).await;
                        batch_deadline = None;
                    }
                }
            }
        }
    }

    async fn tick(&mut self, batch: &mut Vec<RequestEvent>) -> std::io::Result<()> {
        let remaining = self.config.batch_size.saturating_sub(batch.len());
        if remaining == 0 {
            return Ok(());
        }
        let read = self.reader.read_batch(remaining)?;
        if read.lines.is_empty() {
            return Ok(());
        }

        let events = self.process_lines(read.lines).await;
        batch.extend(events);
        Ok(())
    }

    /// Parse + enrich + classify every line, bounded by the worker pool
    /// width. Output order matches input order regardless of completion
    /// order, since per-source ordering depends on it.
    async fn process_lines(&self, lines: Vec<String>) -> Vec<RequestEvent> {
        let cutoff = self.import_cutoff();
        let mut out = Vec::with_capacity(lines.len());

        for chunk in lines.chunks(self.config.worker_pool_width.max(1)) {
            let futures = chunk.iter().map(|line| self.process_line(line, cutoff));
            let results = futures::future::join_all(futures).await;
            out.extend(results.into_iter().flatten());
        }
        out
    }

    fn import_cutoff(&self) -> Option<DateTime<Utc>> {
        if !self.is_first_run {
            return None;
        }
        self.config.initial_import_days.map(|days| Utc::now() - chrono::Duration::days(days))
    }

    async fn process_line(&self, line: &str, cutoff: Option<DateTime<Utc>>) -> Option<RequestEvent> {
        if !self.parser.can_parse(line) {
            return None;
        }
        let mut event = match self.parser.parse(line, &self.source_name) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    source = %self.source_name,
                    error = %err,
                    preview = %truncated_preview(line),
                    "failed to parse line"
                );
                return None;
            }
        };

        if let Some(cutoff) = cutoff {
            if event.timestamp < cutoff {
                return None;
            }
        }

        self.enricher.enrich(&mut event).await;
        enrich::apply_ua_classification(&mut event);
        Some(event)
    }

    async fn flush(&mut self, batch: &mut Vec<RequestEvent>) {
        if batch.is_empty() {
            self.status.initial_import_complete.store(true, Ordering::Relaxed);
            return;
        }

        match self.writer.create_batch(batch.clone()).await {
            Ok(outcome) => {
                debug!(
                    source = %self.source_name,
                    inserted = outcome.inserted,
                    duplicates = outcome.duplicates,
                    "batch committed"
                );
                for event in batch.iter() {
                    self.live.ingest(event);
                }
                let position = self.reader.position();
                let inode = self.reader.inode();
                let last_line = self.reader.last_line_content();
                if let Err(err) =
                    registry::update_position(&self.registry_pool, &self.source_name, position, inode, last_line).await
                {
                    warn!(source = %self.source_name, error = %err, "failed to persist reader position");
                }
                batch.clear();
                self.status.initial_import_complete.store(true, Ordering::Relaxed);
            }
            Err(err) => {
                self.status.errors.fetch_add(1, Ordering::Relaxed);
                warn!(source = %self.source_name, error = %err, count = batch.len(), "batch commit failed, will retry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::enrich::geoip::GeoIpEnricher;
    use crate::parsers::TraefikParser;
    use std::io::Write;

    fn traefik_line(ip: &str) -> String {
        format!(
            r#"{{"time":"2025-06-01T10:00:00Z","request_X-Real-Ip":"{ip}:5050","RequestMethod":"GET","RequestPath":"/a","DownstreamStatus":200,"Duration":1000000}}"#
        )
    }

    async fn test_processor(path: &std::path::Path, pool: sqlx::SqlitePool) -> SourceProcessor {
        let writer = Arc::new(DeduplicatingWriter::new(pool.clone()).await.unwrap());
        let reader = IncrementalReader::new(path, 0, 0, None);
        SourceProcessor::new(
            "traefik-main".into(),
            reader,
            Arc::new(TraefikParser),
            writer,
            pool,
            Arc::new(GeoIpEnricher::disabled()),
            Arc::new(NullLiveSink),
            ProcessorConfig::default(),
            PauseGate::new(),
            Arc::new(ProcessorStatus::default()),
            true,
        )
    }

    #[tokio::test]
    async fn processes_lines_in_order_and_commits() {
        let pool = test_pool().await;
        sqlx::query(
            "INSERT INTO log_sources (name, path, parser_type, last_position, last_inode, created_at, updated_at) \
             VALUES ('traefik-main','/p','traefik',0,0,datetime('now'),datetime('now'))",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", traefik_line("1.1.1.1")).unwrap();
        writeln!(file, "{}", traefik_line("2.2.2.2")).unwrap();
        file.flush().unwrap();

        let mut processor = test_processor(file.path(), pool.clone()).await;
        let mut batch = Vec::new();
        processor.tick(&mut batch).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].client_ip, "1.1.1.1");
        assert_eq!(batch[1].client_ip, "2.2.2.2");

        processor.flush(&mut batch).await;
        assert!(batch.is_empty());

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM http_requests").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn unparseable_lines_are_skipped_without_failing_batch() {
        let pool = test_pool().await;
        sqlx::query(
            "INSERT INTO log_sources (name, path, parser_type, last_position, last_inode, created_at, updated_at) \
             VALUES ('traefik-main','/p','traefik',0,0,datetime('now'),datetime('now'))",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json at all").unwrap();
        writeln!(file, "{}", traefik_line("3.3.3.3")).unwrap();
        file.flush().unwrap();

        let mut processor = test_processor(file.path(), pool).await;
        let mut batch = Vec::new();
        processor.tick(&mut batch).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].client_ip, "3.3.3.3");
    }
}
