//! Storage layer: embedded SQLite pool, schema migrations, and the
//! sub-modules implementing the log-source registry, deduplicating writer,
//! index reconciler, retention service, and reputation cache.

pub mod index;
pub mod pool;
pub mod registry;
pub mod reputation;
pub mod retention;
pub mod writer;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::FatalStorageError;

/// Pool connection-lifecycle knobs beyond plain max size: idle floor and
/// per-connection maximum lifetime, both optional per spec §6
/// (`max_idle_conns` / `conn_max_life`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolLifecycle {
    pub min_connections: u32,
    pub max_lifetime: Option<Duration>,
}

/// Create the SQLite connection pool backing the store.
///
/// `database_url` is a `sqlite:` URL (e.g. `sqlite:///var/lib/logwatch/db.sqlite3`
/// or `sqlite::memory:` for tests). The file is created if missing.
pub async fn create_pool(database_url: &str, max_connections: u32, lifecycle: PoolLifecycle) -> Result<SqlitePool, FatalStorageError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| FatalStorageError::Open {
            path: database_url.to_string(),
            source: e,
        })?
        .create_if_missing(true)
        .foreign_keys(true);

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(lifecycle.min_connections);
    if let Some(max_lifetime) = lifecycle.max_lifetime {
        pool_options = pool_options.max_lifetime(max_lifetime);
    }

    let pool = pool_options.connect_with(options).await.map_err(|e| FatalStorageError::Open {
        path: database_url.to_string(),
        source: e,
    })?;

    info!(url = %database_url, max_connections, min_connections = lifecycle.min_connections, "connected to embedded store");
    Ok(pool)
}

/// Run schema migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), FatalStorageError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("database migrations completed");
    Ok(())
}

/// `true` iff `http_requests` is empty. Resolved once per process lifetime
/// by [`writer::DeduplicatingWriter::new`]; exposed here for the
/// coordinator to decide whether index creation should be deferred
/// (spec §4.8/§4.9: empty database defers index build until first load
/// ends, an existing database reconciles indexes immediately).
pub async fn is_empty(pool: &SqlitePool) -> Result<bool, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM http_requests")
        .fetch_one(pool)
        .await?;
    Ok(count == 0)
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = create_pool("sqlite::memory:", 5, PoolLifecycle::default()).await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
