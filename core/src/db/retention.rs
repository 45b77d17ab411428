//! Retention/cleanup service: deletes `http_requests` rows older than the
//! configured window on a daily schedule, with an optional post-purge
//! vacuum.

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use parking_lot::RwLock;
use sqlx::SqlitePool;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BATCH_SIZE: i64 = 1000;
const BATCH_PAUSE: StdDuration = StdDuration::from_millis(50);
const VACUUM_TIMEOUT: StdDuration = StdDuration::from_secs(600);
pub const DEFAULT_CLEANUP_TIME: &str = "02:00";

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub retention_days: i64,
    pub cleanup_time: NaiveTime,
    pub cleanup_interval: StdDuration,
    pub vacuum_enabled: bool,
}

impl RetentionConfig {
    /// Parse `"HH:MM"`. Anything unparsable falls back to
    /// [`DEFAULT_CLEANUP_TIME`] rather than failing startup.
    #[must_use]
    pub fn parse_cleanup_time(raw: &str) -> NaiveTime {
        NaiveTime::parse_from_str(raw, "%H:%M").unwrap_or_else(|_| {
            warn!(raw, default = DEFAULT_CLEANUP_TIME, "invalid cleanup_time, using default");
            NaiveTime::parse_from_str(DEFAULT_CLEANUP_TIME, "%H:%M").expect("default is valid")
        })
    }
}

/// Observability snapshot of the retention service's last run.
#[derive(Debug, Clone, Default)]
pub struct RetentionStats {
    pub last_run_time: Option<DateTime<Utc>>,
    pub records_deleted: u64,
    pub duration: StdDuration,
    pub next_scheduled_run: Option<DateTime<Utc>>,
}

pub struct RetentionService {
    pool: SqlitePool,
    config: RetentionConfig,
    stats: RwLock<RetentionStats>,
}

impl RetentionService {
    #[must_use]
    pub fn new(pool: SqlitePool, config: RetentionConfig) -> Self {
        Self { pool, config, stats: RwLock::new(RetentionStats::default()) }
    }

    #[must_use]
    pub fn stats(&self) -> RetentionStats {
        self.stats.read().clone()
    }

    /// Run the daily scheduling loop until `cancel` fires. Sleeps in
    /// `cleanup_interval`-sized slices so cancellation is observed promptly
    /// rather than after a single long sleep.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let next_run = next_run_at(self.config.cleanup_time, Local::now());
            self.stats.write().next_scheduled_run = Some(next_run.with_timezone(&Utc));

            let wait = (next_run - Local::now()).to_std().unwrap_or(StdDuration::ZERO);
            if !sleep_in_slices(wait, self.config.cleanup_interval, &cancel).await {
                return;
            }

            if let Err(err) = self.run_once().await {
                warn!(error = %err, "retention cleanup failed");
            }
        }
    }

    /// Delete rows older than `retention_days`, in batches, optionally
    /// followed by a vacuum. Returns the number of rows deleted.
    pub async fn run_once(&self) -> Result<u64, sqlx::Error> {
        let started = std::time::Instant::now();
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);
        let mut deleted: u64 = 0;

        loop {
            let result = sqlx::query(
                "DELETE FROM http_requests WHERE id IN \
                 (SELECT id FROM http_requests WHERE timestamp < ? LIMIT ?)",
            )
            .bind(cutoff)
            .bind(BATCH_SIZE)
            .execute(&self.pool)
            .await?;

            let affected = result.rows_affected();
            deleted += affected;
            if affected == 0 {
                break;
            }
            tokio::time::sleep(BATCH_PAUSE).await;
        }

        if deleted > 0 && self.config.vacuum_enabled {
            self.vacuum().await;
        }

        let mut stats = self.stats.write();
        stats.last_run_time = Some(Utc::now());
        stats.records_deleted = deleted;
        stats.duration = started.elapsed();
        info!(deleted, elapsed_ms = stats.duration.as_millis() as u64, "retention cleanup run complete");
        Ok(deleted)
    }

    async fn vacuum(&self) {
        match tokio::time::timeout(VACUUM_TIMEOUT, sqlx::query("VACUUM").execute(&self.pool)).await {
            Ok(Ok(_)) => debug!("post-retention vacuum complete"),
            Ok(Err(err)) => warn!(error = %err, "post-retention vacuum failed"),
            Err(_) => warn!(timeout_s = VACUUM_TIMEOUT.as_secs(), "post-retention vacuum timed out"),
        }
    }
}

fn next_run_at(cleanup_time: NaiveTime, now: DateTime<Local>) -> DateTime<Local> {
    let today = now.date_naive().and_time(cleanup_time);
    let today = Local.from_local_datetime(&today).single().unwrap_or(now);
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Sleep for `total`, checking `cancel` every `slice` at most. Returns
/// `false` if cancellation fired before the sleep completed.
async fn sleep_in_slices(total: StdDuration, slice: StdDuration, cancel: &CancellationToken) -> bool {
    let slice = if slice.is_zero() { StdDuration::from_secs(1) } else { slice };
    let mut remaining = total;
    while remaining > StdDuration::ZERO {
        let step = remaining.min(slice);
        tokio::select! {
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(step) => {}
        }
        remaining -= step;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::test_support::sample_event;

    #[test]
    fn invalid_cleanup_time_falls_back_to_default() {
        let parsed = RetentionConfig::parse_cleanup_time("not-a-time");
        assert_eq!(parsed, NaiveTime::parse_from_str(DEFAULT_CLEANUP_TIME, "%H:%M").unwrap());
    }

    #[test]
    fn valid_cleanup_time_parses() {
        let parsed = RetentionConfig::parse_cleanup_time("14:30");
        assert_eq!(parsed.format("%H:%M").to_string(), "14:30");
    }

    #[tokio::test]
    async fn run_once_deletes_rows_older_than_window() {
        let pool = test_pool().await;
        let mut old = sample_event("1.2.3.4", "h");
        old.timestamp = Utc::now() - chrono::Duration::days(400);
        old.request_hash = "old".into();
        let mut recent = sample_event("1.2.3.5", "h");
        recent.request_hash = "recent".into();

        let writer = crate::db::writer::DeduplicatingWriter::new(pool.clone()).await.unwrap();
        writer.create_batch(vec![old, recent]).await.unwrap();

        let service = RetentionService::new(
            pool.clone(),
            RetentionConfig {
                retention_days: 90,
                cleanup_time: NaiveTime::parse_from_str(DEFAULT_CLEANUP_TIME, "%H:%M").unwrap(),
                cleanup_interval: StdDuration::from_secs(60),
                vacuum_enabled: false,
            },
        );
        let deleted = service.run_once().await.unwrap();
        assert_eq!(deleted, 1);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM http_requests").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 1);
    }
}
