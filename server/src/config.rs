//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).ok().map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes")).unwrap_or(default)
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// SQLite connection URL (e.g. `sqlite:///var/lib/logwatch/db.sqlite3`)
    pub database_url: String,

    /// 0 disables cleanup; >0 enables the daily purge.
    pub retention_days: i64,

    /// `HH:MM`, local timezone; invalid values fall back to `02:00`.
    pub cleanup_time: String,

    /// Upper bound on one scheduler sleep slice.
    pub cleanup_interval: Duration,

    /// Compact storage with `VACUUM` after a non-empty purge.
    pub vacuum_enabled: bool,

    /// Operator-supplied pool size, used unless `auto_tuning` is set.
    pub max_open_conns: u32,

    /// Operator-supplied idle-connection floor, used unless `auto_tuning`
    /// is set.
    pub max_idle_conns: u32,

    /// Recycle a pooled connection after it has lived this long. `None`
    /// (the default) means connections are never force-recycled by age.
    pub conn_max_life: Option<Duration>,

    /// If set, raises pool size to `cpu_cores * 5` (idle floor 40%)
    /// instead of using `max_open_conns`/`max_idle_conns` verbatim.
    pub auto_tuning: bool,

    /// Whether to run the pool-saturation monitoring ticker.
    pub pool_monitoring_enabled: bool,

    /// Interval between pool-saturation log lines.
    pub pool_monitoring_interval: Duration,

    /// In-use/size ratio above which pool utilization logs at `warn`.
    pub pool_saturation_threshold: f64,

    /// Per-source ingestion batch size.
    pub batch_size: usize,

    /// Per-source worker-pool width.
    pub worker_pool_size: usize,

    /// If set, clamps a source's first-ever run to the last N days.
    pub initial_import_enable: bool,
    pub initial_import_days: Option<i64>,

    /// Run log-source discovery on startup if the registry is empty.
    pub log_auto_discover: bool,

    /// How often the coordinator reconciles its processor set against the
    /// source registry.
    pub coordinator_sync_interval: Duration,

    /// How often the live-metrics collector prunes and recomputes its
    /// cached snapshot.
    pub live_collector_interval: Duration,

    /// Whether GeoIP/ASN enrichment is enabled (no vendor database is
    /// bundled with this service; disabled leaves geo/ASN fields empty).
    pub geoip_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            retention_days: env_parse("RETENTION_DAYS", 0),
            cleanup_time: env::var("CLEANUP_TIME").unwrap_or_else(|_| "02:00".into()),
            cleanup_interval: Duration::from_secs(env_parse("CLEANUP_INTERVAL_SECS", 3600)),
            vacuum_enabled: env_bool("VACUUM_ENABLED", false),
            max_open_conns: env_parse("MAX_OPEN_CONNS", 10),
            max_idle_conns: env_parse("MAX_IDLE_CONNS", 2),
            conn_max_life: env::var("CONN_MAX_LIFE_SECS").ok().and_then(|v| v.parse().ok()).map(Duration::from_secs),
            auto_tuning: env_bool("AUTO_TUNING", false),
            pool_monitoring_enabled: env_bool("POOL_MONITORING_ENABLED", false),
            pool_monitoring_interval: Duration::from_secs(env_parse("POOL_MONITORING_INTERVAL_SECS", 30)),
            pool_saturation_threshold: env_parse("POOL_SATURATION_THRESHOLD", 0.9),
            batch_size: env_parse("BATCH_SIZE", 1000),
            worker_pool_size: env_parse("WORKER_POOL_SIZE", 4),
            initial_import_enable: env_bool("INITIAL_IMPORT_ENABLE", false),
            initial_import_days: env::var("INITIAL_IMPORT_DAYS").ok().and_then(|v| v.parse().ok()),
            log_auto_discover: env_bool("LOG_AUTO_DISCOVER", true),
            coordinator_sync_interval: Duration::from_secs(env_parse("COORDINATOR_SYNC_INTERVAL_SECS", 30)),
            live_collector_interval: Duration::from_secs(env_parse("LIVE_COLLECTOR_INTERVAL_SECS", 1)),
            geoip_enabled: env_bool("GEOIP_ENABLED", false),
        })
    }

    /// Effective `initial_import_days`, respecting the enable flag.
    #[must_use]
    pub fn effective_initial_import_days(&self) -> Option<i64> {
        if self.initial_import_enable {
            self.initial_import_days
        } else {
            None
        }
    }

    /// Create a default configuration for testing.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            database_url: "sqlite::memory:".into(),
            retention_days: 0,
            cleanup_time: "02:00".into(),
            cleanup_interval: Duration::from_secs(3600),
            vacuum_enabled: false,
            max_open_conns: 5,
            max_idle_conns: 1,
            conn_max_life: None,
            auto_tuning: false,
            pool_monitoring_enabled: false,
            pool_monitoring_interval: Duration::from_secs(30),
            pool_saturation_threshold: 0.9,
            batch_size: 1000,
            worker_pool_size: 4,
            initial_import_enable: false,
            initial_import_days: None,
            log_auto_discover: false,
            coordinator_sync_interval: Duration::from_secs(30),
            live_collector_interval: Duration::from_secs(1),
            geoip_enabled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_for_test_is_internally_consistent() {
        let config = Config::default_for_test();
        assert_eq!(config.effective_initial_import_days(), None);
    }
}
