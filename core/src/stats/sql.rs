//! Shared WHERE-clause construction: time window, OR-combined service
//! filters, exclude-IP, and an optional single-IP scope (used by the
//! IP-focused sibling methods). Kept separate from the query methods
//! themselves so every method builds its predicate the same way.

use sqlx::sqlite::Sqlite;
use sqlx::QueryBuilder;

use crate::filters::{ServiceFilter, ServiceFilterKind};

pub struct Scope<'a> {
    pub hours: i64,
    pub filters: &'a [ServiceFilter],
    pub exclude_ip: Option<&'a str>,
    pub require_ip: Option<&'a str>,
}

impl<'a> Scope<'a> {
    #[must_use]
    pub fn new(hours: i64, filters: &'a [ServiceFilter], exclude_ip: Option<&'a str>) -> Self {
        Self { hours, filters, exclude_ip, require_ip: None }
    }

    #[must_use]
    pub fn for_ip(hours: i64, ip: &'a str) -> Self {
        Self { hours, filters: &[], exclude_ip: None, require_ip: Some(ip) }
    }
}

fn push_service_match(qb: &mut QueryBuilder<'_, Sqlite>, filters: &[ServiceFilter]) {
    qb.push("(");
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        match filter.kind {
            ServiceFilterKind::BackendName => {
                qb.push("backend_name = ");
                qb.push_bind(filter.value.clone());
            }
            ServiceFilterKind::BackendUrl => {
                qb.push("backend_url = ");
                qb.push_bind(filter.value.clone());
            }
            ServiceFilterKind::Host => {
                qb.push("host = ");
                qb.push_bind(filter.value.clone());
            }
            ServiceFilterKind::Auto => {
                qb.push("(backend_name = ");
                qb.push_bind(filter.value.clone());
                qb.push(" OR (backend_name = '' AND backend_url = ");
                qb.push_bind(filter.value.clone());
                qb.push(") OR (backend_name = '' AND backend_url = '' AND host = ");
                qb.push_bind(filter.value.clone());
                qb.push("))");
            }
        }
    }
    qb.push(")");
}

/// Push ` WHERE timestamp > datetime('now', '-N hours') [AND ...]` onto
/// `qb`, applying the scope's filters, exclude-IP, and IP-scope rules.
pub fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, scope: &Scope<'_>) {
    qb.push(" WHERE timestamp > datetime('now', printf('-%d hours', ");
    qb.push_bind(scope.hours);
    qb.push("))");

    if let Some(ip) = scope.require_ip {
        qb.push(" AND client_ip = ");
        qb.push_bind(ip.to_string());
        return;
    }

    if !scope.filters.is_empty() {
        qb.push(" AND ");
        push_service_match(qb, scope.filters);
    }

    if let Some(ip) = scope.exclude_ip {
        if scope.filters.is_empty() {
            qb.push(" AND client_ip != ");
            qb.push_bind(ip.to_string());
        } else {
            qb.push(" AND NOT (client_ip = ");
            qb.push_bind(ip.to_string());
            qb.push(" AND ");
            push_service_match(qb, scope.filters);
            qb.push(")");
        }
    }
}

/// SQL expression bucketing `timestamp` for the timeline/status-timeline
/// methods: hourly (≤24h), 6-hour blocks (≤168h), daily (≤720h), else
/// weekly.
#[must_use]
pub fn bucket_expr(hours: i64) -> &'static str {
    if hours <= 24 {
        "strftime('%Y-%m-%dT%H:00:00Z', timestamp)"
    } else if hours <= 168 {
        "strftime('%Y-%m-%dT', timestamp) || printf('%02d:00:00Z', (CAST(strftime('%H', timestamp) AS INTEGER) / 6) * 6)"
    } else if hours <= 720 {
        "strftime('%Y-%m-%d', timestamp)"
    } else {
        "strftime('%Y-%W', timestamp)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucketing_thresholds() {
        assert!(bucket_expr(24).contains("%H:00"));
        assert!(bucket_expr(168).contains("/ 6"));
        assert!(bucket_expr(720).contains("%Y-%m-%d'"));
        assert!(bucket_expr(721).contains("%W"));
    }

    #[tokio::test]
    async fn auto_filter_matches_host_fallback() {
        let filters = vec![ServiceFilter { kind: ServiceFilterKind::Auto, value: "example.com".into() }];
        let scope = Scope::new(24, &filters, None);
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT 1 FROM http_requests");
        push_where(&mut qb, &scope);
        let sql = qb.sql();
        assert!(sql.contains("backend_name = ?"));
        assert!(sql.contains("host = ?"));
    }
}
