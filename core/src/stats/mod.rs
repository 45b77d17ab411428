//! Query/stats repository: the read side of the store. Every public
//! method here runs under a 30-second deadline and returns
//! [`crate::error::DeadlineExceeded`] rather than hanging a dashboard
//! request; all filtering (service scoping, exclude-IP) reuses
//! [`crate::filters`] so these numbers agree with the live collector's.

mod sql;

use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::Sqlite;
use sqlx::{FromRow, QueryBuilder, SqlitePool};
use thiserror::Error;

use crate::error::DeadlineExceeded;
use crate::filters::ServiceFilter;
use crate::model::RequestEvent;
use sql::Scope;

const QUERY_DEADLINE: Duration = Duration::from_secs(30);
const DEFAULT_LIMIT: i64 = 10;
const HEATMAP_MAX_DAYS: i64 = 365;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error(transparent)]
    Deadline(#[from] DeadlineExceeded),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

async fn with_deadline<T, F>(fut: F) -> Result<T, StatsError>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let start = std::time::Instant::now();
    match tokio::time::timeout(QUERY_DEADLINE, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StatsError::Deadline(DeadlineExceeded {
            elapsed_ms: start.elapsed().as_millis() as u64,
            budget_ms: QUERY_DEADLINE.as_millis() as u64,
        })),
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Summary {
    pub total_requests: i64,
    pub valid_requests: i64,
    pub failed_requests: i64,
    pub unique_visitors: i64,
    pub unique_paths: i64,
    pub unique_404_paths: i64,
    pub bandwidth_bytes: i64,
    pub avg_response_time_ms: f64,
    pub rate_404: f64,
    pub rate_5xx: f64,
    pub success_rate: f64,
    pub requests_per_hour: f64,
    pub top_country: Option<String>,
    pub top_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TimelineBucket {
    pub bucket_label: String,
    pub requests: i64,
    pub unique_visitors: i64,
    pub bandwidth_bytes: i64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StatusTimelineBucket {
    pub bucket_label: String,
    pub status_2xx: i64,
    pub status_3xx: i64,
    pub status_4xx: i64,
    pub status_5xx: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct HeatmapCell {
    pub day_of_week: i64,
    pub hour: i64,
    pub count: i64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Bucket {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ResponseTimeStats {
    pub min_ms: i64,
    pub max_ms: i64,
    pub avg_ms: f64,
    pub p50_ms: i64,
    pub p95_ms: i64,
    pub p99_ms: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ServiceCatalogueEntry {
    pub name: String,
    pub kind: String,
    pub count: i64,
}

pub struct StatsRepository {
    pool: SqlitePool,
}

impl StatsRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn summary(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>) -> Result<Summary, StatsError> {
        self.summary_scoped(&Scope::new(hours, filters, exclude_ip)).await
    }

    async fn summary_scoped(&self, scope: &Scope<'_>) -> Result<Summary, StatsError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT
                COUNT(*) AS total_requests,
                COALESCE(SUM(CASE WHEN status_code BETWEEN 200 AND 399 THEN 1 ELSE 0 END), 0) AS valid_requests,
                COALESCE(SUM(CASE WHEN status_code >= 400 THEN 1 ELSE 0 END), 0) AS failed_requests,
                COUNT(DISTINCT client_ip) AS unique_visitors,
                COUNT(DISTINCT path) AS unique_paths,
                COUNT(DISTINCT CASE WHEN status_code = 404 THEN path END) AS unique_404_paths,
                COALESCE(SUM(response_size), 0) AS bandwidth_bytes,
                COALESCE(AVG(response_time_ms), 0.0) AS avg_response_time_ms,
                CAST(COALESCE(SUM(CASE WHEN status_code = 404 THEN 1 ELSE 0 END), 0) AS REAL) / MAX(COUNT(*), 1) AS rate_404,
                CAST(COALESCE(SUM(CASE WHEN status_code >= 500 THEN 1 ELSE 0 END), 0) AS REAL) / MAX(COUNT(*), 1) AS rate_5xx,
                CAST(COALESCE(SUM(CASE WHEN status_code BETWEEN 200 AND 399 THEN 1 ELSE 0 END), 0) AS REAL) / MAX(COUNT(*), 1) AS success_rate,
                CAST(COUNT(*) AS REAL) / MAX(",
        );
        qb.push_bind(scope.hours);
        qb.push(
            ", 1) AS requests_per_hour,
                (SELECT geo_country FROM http_requests",
        );
        sql::push_where(&mut qb, scope);
        qb.push(
            " AND geo_country != '' GROUP BY geo_country ORDER BY COUNT(*) DESC LIMIT 1) AS top_country,
                (SELECT path FROM http_requests",
        );
        sql::push_where(&mut qb, scope);
        qb.push(" GROUP BY path ORDER BY COUNT(*) DESC LIMIT 1) AS top_path
            FROM http_requests",
        );
        sql::push_where(&mut qb, scope);

        with_deadline(qb.build_query_as::<Summary>().fetch_one(&self.pool)).await
    }

    pub async fn timeline(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>) -> Result<Vec<TimelineBucket>, StatsError> {
        self.timeline_scoped(&Scope::new(hours, filters, exclude_ip)).await
    }

    async fn timeline_scoped(&self, scope: &Scope<'_>) -> Result<Vec<TimelineBucket>, StatsError> {
        let bucket = sql::bucket_expr(scope.hours);
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {bucket} AS bucket_label,
                COUNT(*) AS requests,
                COUNT(DISTINCT client_ip) AS unique_visitors,
                COALESCE(SUM(response_size), 0) AS bandwidth_bytes,
                COALESCE(AVG(response_time_ms), 0.0) AS avg_response_time_ms
            FROM http_requests"
        ));
        sql::push_where(&mut qb, scope);
        qb.push(" GROUP BY bucket_label ORDER BY bucket_label ASC");

        with_deadline(qb.build_query_as::<TimelineBucket>().fetch_all(&self.pool)).await
    }

    pub async fn status_timeline(
        &self,
        hours: i64,
        filters: &[ServiceFilter],
        exclude_ip: Option<&str>,
    ) -> Result<Vec<StatusTimelineBucket>, StatsError> {
        self.status_timeline_scoped(&Scope::new(hours, filters, exclude_ip)).await
    }

    async fn status_timeline_scoped(&self, scope: &Scope<'_>) -> Result<Vec<StatusTimelineBucket>, StatsError> {
        let bucket = sql::bucket_expr(scope.hours);
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {bucket} AS bucket_label,
                COALESCE(SUM(CASE WHEN status_code BETWEEN 200 AND 299 THEN 1 ELSE 0 END), 0) AS status_2xx,
                COALESCE(SUM(CASE WHEN status_code BETWEEN 300 AND 399 THEN 1 ELSE 0 END), 0) AS status_3xx,
                COALESCE(SUM(CASE WHEN status_code BETWEEN 400 AND 499 THEN 1 ELSE 0 END), 0) AS status_4xx,
                COALESCE(SUM(CASE WHEN status_code >= 500 THEN 1 ELSE 0 END), 0) AS status_5xx
            FROM http_requests"
        ));
        sql::push_where(&mut qb, scope);
        qb.push(" GROUP BY bucket_label ORDER BY bucket_label ASC");

        with_deadline(qb.build_query_as::<StatusTimelineBucket>().fetch_all(&self.pool)).await
    }

    pub async fn heatmap(&self, days: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>) -> Result<Vec<HeatmapCell>, StatsError> {
        let days = days.min(HEATMAP_MAX_DAYS).max(1);
        let scope = Scope::new(days * 24, filters, exclude_ip);
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT
                CAST(strftime('%w', timestamp) AS INTEGER) AS day_of_week,
                CAST(strftime('%H', timestamp) AS INTEGER) AS hour,
                COUNT(*) AS count,
                COALESCE(AVG(response_time_ms), 0.0) AS avg_response_time_ms
            FROM http_requests",
        );
        sql::push_where(&mut qb, &scope);
        qb.push(" GROUP BY day_of_week, hour");

        with_deadline(qb.build_query_as::<HeatmapCell>().fetch_all(&self.pool)).await
    }

    async fn top_k_by_column(
        &self,
        column: &'static str,
        scope: &Scope<'_>,
        limit: i64,
    ) -> Result<Vec<Bucket>, StatsError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {column} AS key, COUNT(*) AS count FROM http_requests"));
        sql::push_where(&mut qb, scope);
        qb.push(format!(" AND {column} != '' GROUP BY {column} ORDER BY count DESC LIMIT "));
        qb.push_bind(limit);

        with_deadline(qb.build_query_as::<Bucket>().fetch_all(&self.pool)).await
    }

    pub async fn top_paths(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("path", &Scope::new(hours, filters, exclude_ip), limit).await
    }

    pub async fn top_countries(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("geo_country", &Scope::new(hours, filters, exclude_ip), limit).await
    }

    pub async fn top_ips(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("client_ip", &Scope::new(hours, filters, exclude_ip), limit).await
    }

    pub async fn top_user_agents(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("user_agent", &Scope::new(hours, filters, exclude_ip), limit).await
    }

    pub async fn top_browsers(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("browser", &Scope::new(hours, filters, exclude_ip), limit).await
    }

    pub async fn top_operating_systems(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("os", &Scope::new(hours, filters, exclude_ip), limit).await
    }

    pub async fn top_device_types(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("device_type", &Scope::new(hours, filters, exclude_ip), limit).await
    }

    pub async fn top_asns(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        let scope = Scope::new(hours, filters, exclude_ip);
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT asn_org AS key, COUNT(*) AS count FROM http_requests");
        sql::push_where(&mut qb, &scope);
        qb.push(" AND asn_org != '' GROUP BY asn_org ORDER BY count DESC LIMIT ");
        qb.push_bind(limit);

        with_deadline(qb.build_query_as::<Bucket>().fetch_all(&self.pool)).await
    }

    pub async fn top_backends(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("backend_name", &Scope::new(hours, filters, exclude_ip), limit).await
    }

    pub async fn top_referrers(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("referer", &Scope::new(hours, filters, exclude_ip), limit).await
    }

    /// Top referrer domains: the scheme, path, port, and a leading `www.`
    /// are stripped from `referer` in-query, case-insensitively, before
    /// grouping.
    pub async fn top_referrer_domains(
        &self,
        hours: i64,
        filters: &[ServiceFilter],
        exclude_ip: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Bucket>, StatsError> {
        let scope = Scope::new(hours, filters, exclude_ip);
        let mut qb = QueryBuilder::<Sqlite>::new("WITH base AS (SELECT referer FROM http_requests");
        sql::push_where(&mut qb, &scope);
        qb.push(
            " AND referer != ''),
            no_scheme AS (
                SELECT LOWER(CASE WHEN INSTR(referer, '://') > 0 THEN SUBSTR(referer, INSTR(referer, '://') + 3) ELSE referer END) AS val FROM base
            ),
            no_path AS (
                SELECT CASE WHEN INSTR(val, '/') > 0 THEN SUBSTR(val, 1, INSTR(val, '/') - 1) ELSE val END AS val FROM no_scheme
            ),
            no_port AS (
                SELECT CASE WHEN INSTR(val, ':') > 0 THEN SUBSTR(val, 1, INSTR(val, ':') - 1) ELSE val END AS val FROM no_path
            ),
            domains AS (
                SELECT CASE WHEN SUBSTR(val, 1, 4) = 'www.' THEN SUBSTR(val, 5) ELSE val END AS domain FROM no_port
            )
            SELECT domain AS key, COUNT(*) AS count FROM domains WHERE domain != '' GROUP BY domain ORDER BY count DESC LIMIT ",
        );
        qb.push_bind(limit);

        with_deadline(qb.build_query_as::<Bucket>().fetch_all(&self.pool)).await
    }

    pub async fn status_distribution(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>) -> Result<Vec<Bucket>, StatsError> {
        let scope = Scope::new(hours, filters, exclude_ip);
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT CAST(status_code AS TEXT) AS key, COUNT(*) AS count FROM http_requests");
        sql::push_where(&mut qb, &scope);
        qb.push(" GROUP BY status_code ORDER BY count DESC");

        with_deadline(qb.build_query_as::<Bucket>().fetch_all(&self.pool)).await
    }

    pub async fn method_distribution(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("method", &Scope::new(hours, filters, exclude_ip), i64::MAX).await
    }

    pub async fn protocol_distribution(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("protocol", &Scope::new(hours, filters, exclude_ip), i64::MAX).await
    }

    pub async fn tls_version_distribution(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("tls_version", &Scope::new(hours, filters, exclude_ip), i64::MAX).await
    }

    pub async fn device_type_distribution(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("device_type", &Scope::new(hours, filters, exclude_ip), i64::MAX).await
    }

    pub async fn response_time_stats(&self, hours: i64, filters: &[ServiceFilter], exclude_ip: Option<&str>) -> Result<ResponseTimeStats, StatsError> {
        self.response_time_stats_scoped(&Scope::new(hours, filters, exclude_ip)).await
    }

    async fn response_time_stats_scoped(&self, scope: &Scope<'_>) -> Result<ResponseTimeStats, StatsError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "WITH windowed AS (
                SELECT response_time_ms, NTILE(100) OVER (ORDER BY response_time_ms) AS bucket
                FROM http_requests",
        );
        sql::push_where(&mut qb, scope);
        qb.push(
            "
            ),
            percentiles AS (
                SELECT bucket, MAX(response_time_ms) AS value FROM windowed GROUP BY bucket
            )
            SELECT
                COALESCE((SELECT MIN(response_time_ms) FROM windowed), 0) AS min_ms,
                COALESCE((SELECT MAX(response_time_ms) FROM windowed), 0) AS max_ms,
                COALESCE((SELECT AVG(response_time_ms) FROM windowed), 0.0) AS avg_ms,
                COALESCE((SELECT value FROM percentiles WHERE bucket = 50), 0) AS p50_ms,
                COALESCE((SELECT value FROM percentiles WHERE bucket = 95), 0) AS p95_ms,
                COALESCE((SELECT value FROM percentiles WHERE bucket = 99), 0) AS p99_ms",
        );

        with_deadline(qb.build_query_as::<ResponseTimeStats>().fetch_one(&self.pool)).await
    }

    pub async fn service_catalogue(&self) -> Result<Vec<ServiceCatalogueEntry>, StatsError> {
        let query = "
            SELECT backend_name AS name, 'backend_name' AS kind, COUNT(*) AS count
            FROM http_requests WHERE backend_name != '' GROUP BY backend_name
            UNION ALL
            SELECT backend_url AS name, 'backend_url' AS kind, COUNT(*) AS count
            FROM http_requests WHERE backend_name = '' AND backend_url != '' GROUP BY backend_url
            UNION ALL
            SELECT host AS name, 'host' AS kind, COUNT(*) AS count
            FROM http_requests WHERE backend_name = '' AND backend_url = '' AND host != '' GROUP BY host
            ORDER BY count DESC";

        with_deadline(sqlx::query_as::<_, ServiceCatalogueEntry>(query).fetch_all(&self.pool)).await
    }

    // --- IP-focused siblings ---------------------------------------------

    pub async fn ip_summary(&self, ip: &str, hours: i64) -> Result<Summary, StatsError> {
        self.summary_scoped(&Scope::for_ip(hours, ip)).await
    }

    pub async fn ip_timeline(&self, ip: &str, hours: i64) -> Result<Vec<TimelineBucket>, StatsError> {
        self.timeline_scoped(&Scope::for_ip(hours, ip)).await
    }

    pub async fn ip_heatmap(&self, ip: &str, days: i64) -> Result<Vec<HeatmapCell>, StatsError> {
        let days = days.min(HEATMAP_MAX_DAYS).max(1);
        let scope = Scope::for_ip(days * 24, ip);
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT
                CAST(strftime('%w', timestamp) AS INTEGER) AS day_of_week,
                CAST(strftime('%H', timestamp) AS INTEGER) AS hour,
                COUNT(*) AS count,
                COALESCE(AVG(response_time_ms), 0.0) AS avg_response_time_ms
            FROM http_requests",
        );
        sql::push_where(&mut qb, &scope);
        qb.push(" GROUP BY day_of_week, hour");

        with_deadline(qb.build_query_as::<HeatmapCell>().fetch_all(&self.pool)).await
    }

    pub async fn ip_top_paths(&self, ip: &str, hours: i64, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("path", &Scope::for_ip(hours, ip), limit).await
    }

    pub async fn ip_top_backends(&self, ip: &str, hours: i64, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("backend_name", &Scope::for_ip(hours, ip), limit).await
    }

    pub async fn ip_status_distribution(&self, ip: &str, hours: i64) -> Result<Vec<Bucket>, StatsError> {
        let scope = Scope::for_ip(hours, ip);
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT CAST(status_code AS TEXT) AS key, COUNT(*) AS count FROM http_requests");
        sql::push_where(&mut qb, &scope);
        qb.push(" GROUP BY status_code ORDER BY count DESC");

        with_deadline(qb.build_query_as::<Bucket>().fetch_all(&self.pool)).await
    }

    pub async fn ip_top_browsers(&self, ip: &str, hours: i64, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("browser", &Scope::for_ip(hours, ip), limit).await
    }

    pub async fn ip_top_operating_systems(&self, ip: &str, hours: i64, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("os", &Scope::for_ip(hours, ip), limit).await
    }

    pub async fn ip_top_device_types(&self, ip: &str, hours: i64, limit: i64) -> Result<Vec<Bucket>, StatsError> {
        self.top_k_by_column("device_type", &Scope::for_ip(hours, ip), limit).await
    }

    pub async fn ip_response_time_stats(&self, ip: &str, hours: i64) -> Result<ResponseTimeStats, StatsError> {
        self.response_time_stats_scoped(&Scope::for_ip(hours, ip)).await
    }

    pub async fn ip_recent_requests(&self, ip: &str, limit: i64, offset: i64) -> Result<Vec<RequestEvent>, StatsError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM http_requests WHERE client_ip = ");
        qb.push_bind(ip.to_string());
        qb.push(" ORDER BY timestamp DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        with_deadline(qb.build_query_as::<RequestEvent>().fetch_all(&self.pool)).await
    }

    /// Free-text search over `path`/`user_agent`/`referer` for one client
    /// IP, most recent first.
    pub async fn ip_search(&self, ip: &str, term: &str, limit: i64) -> Result<Vec<RequestEvent>, StatsError> {
        let pattern = format!("%{}%", term.replace('%', "\\%").replace('_', "\\_"));
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM http_requests WHERE client_ip = ");
        qb.push_bind(ip.to_string());
        qb.push(" AND (path LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR user_agent LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR referer LIKE ");
        qb.push_bind(pattern);
        qb.push(" ESCAPE '\\') ORDER BY timestamp DESC LIMIT ");
        qb.push_bind(limit);

        with_deadline(qb.build_query_as::<RequestEvent>().fetch_all(&self.pool)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::db::writer::DeduplicatingWriter;
    use crate::filters::ServiceFilterKind;
    use crate::test_support::sample_event;

    async fn seeded_repo() -> StatsRepository {
        let pool = test_pool().await;
        let writer = DeduplicatingWriter::new(pool.clone()).await.unwrap();

        let mut events = Vec::new();
        for i in 0..5 {
            let ip = if i % 2 == 0 { "1.1.1.1" } else { "2.2.2.2" };
            let mut event = sample_event(ip, "example.com");
            event.request_hash = format!("hash-{i}");
            event.status_code = if i == 4 { 500 } else { 200 };
            event.path = format!("/page/{}", i % 2);
            event.backend_name = "api".to_string();
            events.push(event);
        }
        writer.create_batch(events).await.unwrap();

        StatsRepository::new(pool)
    }

    #[tokio::test]
    async fn summary_reports_counts_and_rates() {
        let repo = seeded_repo().await;
        let summary = repo.summary(24, &[], None).await.unwrap();
        assert_eq!(summary.total_requests, 5);
        assert_eq!(summary.failed_requests, 1);
        assert_eq!(summary.unique_visitors, 2);
        assert!(summary.success_rate > 0.5);
    }

    #[tokio::test]
    async fn top_paths_orders_by_count_descending() {
        let repo = seeded_repo().await;
        let top = repo.top_paths(24, &[], None, 10).await.unwrap();
        assert!(!top.is_empty());
        assert!(top[0].count >= top.last().unwrap().count);
    }

    #[tokio::test]
    async fn service_filter_scopes_summary() {
        let repo = seeded_repo().await;
        let filters = vec![ServiceFilter { kind: ServiceFilterKind::BackendName, value: "nonexistent".into() }];
        let summary = repo.summary(24, &filters, None).await.unwrap();
        assert_eq!(summary.total_requests, 0);

        let filters = vec![ServiceFilter { kind: ServiceFilterKind::BackendName, value: "api".into() }];
        let summary = repo.summary(24, &filters, None).await.unwrap();
        assert_eq!(summary.total_requests, 5);
    }

    #[tokio::test]
    async fn exclude_ip_removes_matching_rows() {
        let repo = seeded_repo().await;
        let summary = repo.summary(24, &[], Some("1.1.1.1")).await.unwrap();
        assert_eq!(summary.total_requests, 2);
    }

    #[tokio::test]
    async fn ip_scoped_queries_restrict_to_one_client() {
        let repo = seeded_repo().await;
        let summary = repo.ip_summary("1.1.1.1", 24).await.unwrap();
        assert_eq!(summary.total_requests, 3);
    }

    #[tokio::test]
    async fn response_time_stats_computes_percentiles() {
        let repo = seeded_repo().await;
        let stats = repo.response_time_stats(24, &[], None).await.unwrap();
        assert!(stats.max_ms >= stats.min_ms);
        assert!(stats.p99_ms >= stats.p50_ms);
    }

    #[tokio::test]
    async fn service_catalogue_lists_backend_names() {
        let repo = seeded_repo().await;
        let catalogue = repo.service_catalogue().await.unwrap();
        assert!(catalogue.iter().any(|entry| entry.name == "api" && entry.kind == "backend_name"));
    }
}
