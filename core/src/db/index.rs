//! Index reconciler.
//!
//! Declarative list of indexes the query/stats repository relies on.
//! Reconciliation is idempotent: every `CREATE INDEX` uses `IF NOT EXISTS`,
//! so running it against an already-reconciled database is a no-op aside
//! from the trailing `ANALYZE`.
//!
//! On a freshly created (empty) database the coordinator defers calling
//! [`reconcile`] until the first-load import finishes, so the large initial
//! insert batch isn't slowed down by index maintenance. On an existing
//! database reconciliation runs immediately at startup.

use sqlx::SqlitePool;
use tracing::info;

struct IndexDef {
    name: &'static str,
    ddl: &'static str,
}

/// Indexes no longer produced by this schema version. Reconciliation drops
/// these if present, ahead of creating the current set.
const LEGACY_INDEXES: &[&str] = &[];

const REQUIRED_INDEXES: &[IndexDef] = &[
    // Maintenance / retention scans.
    IndexDef {
        name: "idx_requests_timestamp",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON http_requests(timestamp)",
    },
    // Time-range + dimension composites, covering the common stats filters.
    IndexDef {
        name: "idx_requests_time_status",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_time_status ON http_requests(timestamp DESC, status_code)",
    },
    IndexDef {
        name: "idx_requests_time_host",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_time_host ON http_requests(timestamp DESC, host)",
    },
    IndexDef {
        name: "idx_requests_time_backend_status",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_time_backend_status \
              ON http_requests(timestamp DESC, backend_name, status_code)",
    },
    // Top-K aggregation covering indexes.
    IndexDef {
        name: "idx_requests_path",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_path ON http_requests(path, timestamp DESC)",
    },
    IndexDef {
        name: "idx_requests_geo_country",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_geo_country ON http_requests(geo_country) \
              WHERE geo_country != ''",
    },
    IndexDef {
        name: "idx_requests_referer",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_referer ON http_requests(referer) \
              WHERE referer != ''",
    },
    IndexDef {
        name: "idx_requests_client_ip",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_client_ip ON http_requests(client_ip, timestamp DESC)",
    },
    IndexDef {
        name: "idx_requests_asn",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_asn ON http_requests(asn) WHERE asn != 0",
    },
    // Service-identification variants: backend_name, backend_url, host are
    // each queried independently depending on the deployment's `auto` filter.
    IndexDef {
        name: "idx_requests_backend_name",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_backend_name ON http_requests(backend_name) \
              WHERE backend_name != ''",
    },
    IndexDef {
        name: "idx_requests_backend_url",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_backend_url ON http_requests(backend_url) \
              WHERE backend_url != ''",
    },
    IndexDef {
        name: "idx_requests_host_service",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_host_service ON http_requests(host) \
              WHERE host != ''",
    },
    // Partial indexes for common predicate-narrowed scans.
    IndexDef {
        name: "idx_requests_errors",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_errors ON http_requests(timestamp DESC) \
              WHERE status_code >= 400",
    },
    IndexDef {
        name: "idx_requests_slow",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_slow ON http_requests(response_time_ms DESC) \
              WHERE response_time_ms > 1000",
    },
    IndexDef {
        name: "idx_requests_percentile",
        ddl: "CREATE INDEX IF NOT EXISTS idx_requests_percentile ON http_requests(timestamp, response_time_ms) \
              WHERE response_time_ms > 0",
    },
];

/// Drop legacy indexes, create the current required set, then `ANALYZE` so
/// the query planner has fresh statistics.
pub async fn reconcile(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for name in LEGACY_INDEXES {
        let ddl = format!("DROP INDEX IF EXISTS {name}");
        sqlx::query(&ddl).execute(pool).await?;
    }
    for def in REQUIRED_INDEXES {
        sqlx::query(def.ddl).execute(pool).await?;
    }
    sqlx::query("ANALYZE").execute(pool).await?;
    info!(count = REQUIRED_INDEXES.len(), "index reconciliation complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let pool = test_pool().await;
        reconcile(&pool).await.unwrap();
        reconcile(&pool).await.unwrap();

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_requests_timestamp'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn all_required_indexes_are_created() {
        let pool = test_pool().await;
        reconcile(&pool).await.unwrap();
        for def in REQUIRED_INDEXES {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?")
                .bind(def.name)
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count, 1, "missing index {}", def.name);
        }
    }
}
