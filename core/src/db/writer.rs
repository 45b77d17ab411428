//! Deduplicating writer: batched, conflict-ignoring inserts keyed on
//! `request_hash`.
//!
//! `request_hash` uniqueness is the sole correctness anchor — dedup
//! conflicts are never treated as errors, only transient storage failures
//! are surfaced to the caller (the source processor), which does not
//! advance its reader position until the write succeeds.

use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::SqlitePool;
use thiserror::Error;

use crate::model::RequestEvent;

/// Batch-level storage failure. The caller (the source processor) must not
/// advance its reader position when this is returned — the same batch is
/// re-read and re-attempted on the next tick, which is safe because
/// dedup-by-hash makes re-insertion idempotent.
#[derive(Debug, Error)]
#[error("batch write failed: {0}")]
pub struct WriteError(#[from] pub sqlx::Error);

/// Outcome of one `create`/`create_batch` call, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Rows per multi-row INSERT. Chosen so that `rows * COLUMN_COUNT` stays
/// well under the storage's bound-parameter limit, independent of the
/// underlying engine's actual limit.
const CHUNK_SIZE: usize = 50;
const COLUMN_COUNT: usize = 49;

const COLUMNS: &str = "source_name, timestamp, request_hash, partition_key, \
    client_ip, client_port, client_user, client_hostname, \
    method, protocol, host, path, query_string, request_length, request_scheme, \
    status_code, response_size, response_time_ms, response_content_type, \
    duration_ns, start_utc, upstream_response_time_ms, retry_attempts, requests_total, \
    user_agent, referer, \
    browser, browser_version, os, os_version, device_type, \
    backend_name, backend_url, router_name, upstream_status, upstream_content_type, \
    tls_version, tls_cipher, tls_server_name, \
    request_id, trace_id, \
    geo_country, geo_city, geo_lat, geo_lon, asn, asn_org, \
    proxy_metadata, created_at";

pub struct DeduplicatingWriter {
    pool: SqlitePool,
    /// Resolved exactly once, at construction — a one-shot latch, not
    /// re-checked on every call.
    is_first_load: bool,
    inserted_total: AtomicU64,
    duplicate_total: AtomicU64,
}

impl DeduplicatingWriter {
    /// Probe the store once to decide whether this process is doing a
    /// first load (empty `http_requests`) or writing into an existing
    /// database. The result is latched for the writer's lifetime.
    pub async fn new(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        let is_first_load = super::is_empty(&pool).await?;
        Ok(Self {
            pool,
            is_first_load,
            inserted_total: AtomicU64::new(0),
            duplicate_total: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub const fn is_first_load(&self) -> bool {
        self.is_first_load
    }

    #[must_use]
    pub fn inserted_total(&self) -> u64 {
        self.inserted_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn duplicate_total(&self) -> u64 {
        self.duplicate_total.load(Ordering::Relaxed)
    }

    pub async fn create(&self, event: RequestEvent) -> Result<BatchOutcome, WriteError> {
        self.create_batch(vec![event]).await
    }

    pub async fn create_batch(&self, events: Vec<RequestEvent>) -> Result<BatchOutcome, WriteError> {
        let mut outcome = BatchOutcome::default();
        for chunk in events.chunks(CHUNK_SIZE) {
            let deduped = dedup_in_memory(chunk);
            let attempted = deduped.len();
            let affected = self.insert_chunk(&deduped).await?;
            outcome.inserted += affected;
            outcome.duplicates += attempted - affected;
        }
        self.inserted_total.fetch_add(outcome.inserted as u64, Ordering::Relaxed);
        self.duplicate_total.fetch_add(outcome.duplicates as u64, Ordering::Relaxed);
        Ok(outcome)
    }

    async fn insert_chunk(&self, rows: &[&RequestEvent]) -> Result<usize, sqlx::Error> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = build_insert_sql(rows.len());

        let affected = if self.is_first_load {
            bind_rows(sqlx::query(&sql), rows).execute(&self.pool).await?.rows_affected()
        } else {
            let mut tx = self.pool.begin().await?;
            let affected = bind_rows(sqlx::query(&sql), rows).execute(&mut *tx).await?.rows_affected();
            tx.commit().await?;
            affected
        };
        Ok(affected as usize)
    }
}

/// Deduplicate a chunk in memory by `request_hash`, keeping the first
/// occurrence of each non-empty hash. Rows with an empty hash bypass dedup
/// entirely — the caller's responsibility per spec.
fn dedup_in_memory(chunk: &[RequestEvent]) -> Vec<&RequestEvent> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(chunk.len());
    for event in chunk {
        if event.request_hash.is_empty() {
            out.push(event);
        } else if seen.insert(event.request_hash.as_str()) {
            out.push(event);
        }
    }
    out
}

fn build_insert_sql(row_count: usize) -> String {
    let one_row = format!("({})", vec!["?"; COLUMN_COUNT].join(","));
    let values = vec![one_row; row_count].join(",");
    format!(
        "INSERT INTO http_requests ({COLUMNS}) VALUES {values} \
         ON CONFLICT(request_hash) WHERE request_hash != '' DO NOTHING"
    )
}

fn bind_rows<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    rows: &'q [&'q RequestEvent],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for e in rows {
        query = query
            .bind(&e.source_name)
            .bind(e.timestamp)
            .bind(&e.request_hash)
            .bind(&e.partition_key)
            .bind(&e.client_ip)
            .bind(e.client_port)
            .bind(&e.client_user)
            .bind(&e.client_hostname)
            .bind(&e.method)
            .bind(&e.protocol)
            .bind(&e.host)
            .bind(&e.path)
            .bind(&e.query_string)
            .bind(e.request_length)
            .bind(&e.request_scheme)
            .bind(e.status_code)
            .bind(e.response_size)
            .bind(e.response_time_ms)
            .bind(&e.response_content_type)
            .bind(e.duration_ns)
            .bind(&e.start_utc)
            .bind(e.upstream_response_time_ms)
            .bind(e.retry_attempts)
            .bind(e.requests_total)
            .bind(&e.user_agent)
            .bind(&e.referer)
            .bind(&e.browser)
            .bind(&e.browser_version)
            .bind(&e.os)
            .bind(&e.os_version)
            .bind(&e.device_type)
            .bind(&e.backend_name)
            .bind(&e.backend_url)
            .bind(&e.router_name)
            .bind(e.upstream_status)
            .bind(&e.upstream_content_type)
            .bind(&e.tls_version)
            .bind(&e.tls_cipher)
            .bind(&e.tls_server_name)
            .bind(&e.request_id)
            .bind(&e.trace_id)
            .bind(&e.geo_country)
            .bind(&e.geo_city)
            .bind(e.geo_lat)
            .bind(e.geo_lon)
            .bind(e.asn)
            .bind(&e.asn_org)
            .bind(e.proxy_metadata.as_ref().map(ToString::to_string))
            .bind(e.created_at);
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::test_support::sample_event;

    #[tokio::test]
    async fn first_write_is_first_load() {
        let pool = test_pool().await;
        let writer = DeduplicatingWriter::new(pool).await.unwrap();
        assert!(writer.is_first_load());
    }

    #[tokio::test]
    async fn existing_data_is_not_first_load() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO log_sources (name, path, parser_type, last_position, last_inode, created_at, updated_at) VALUES ('s','/p','traefik',0,0,datetime('now'),datetime('now'))")
            .execute(&pool)
            .await
            .unwrap();
        let writer = DeduplicatingWriter::new(pool.clone()).await.unwrap();
        writer.create(sample_event("1.2.3.4", "h")).await.unwrap();

        let writer2 = DeduplicatingWriter::new(pool).await.unwrap();
        assert!(!writer2.is_first_load());
    }

    #[tokio::test]
    async fn s3_duplicate_lines_dedup_to_one_row() {
        let pool = test_pool().await;
        let writer = DeduplicatingWriter::new(pool.clone()).await.unwrap();
        let events: Vec<_> = (0..10).map(|_| sample_event("1.2.3.4", "h")).collect();
        let outcome = writer.create_batch(events).await.unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.duplicates, 9);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM http_requests").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn reprocessing_from_offset_zero_is_idempotent() {
        let pool = test_pool().await;
        let writer = DeduplicatingWriter::new(pool.clone()).await.unwrap();
        let events: Vec<_> = (0..5).map(|i| sample_event(&format!("1.2.3.{i}"), "h")).collect();
        writer.create_batch(events.clone()).await.unwrap();
        writer.create_batch(events).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM http_requests").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn empty_hash_bypasses_dedup() {
        let pool = test_pool().await;
        let writer = DeduplicatingWriter::new(pool.clone()).await.unwrap();
        let mut a = sample_event("1.2.3.4", "h");
        a.request_hash = String::new();
        let mut b = sample_event("1.2.3.4", "h");
        b.request_hash = String::new();
        let outcome = writer.create_batch(vec![a, b]).await.unwrap();
        assert_eq!(outcome.inserted, 2);
    }
}
