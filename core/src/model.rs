//! Canonical data model.
//!
//! [`RequestEvent`] is the schema every parser converges on regardless of
//! source proxy. [`LogSource`] tracks per-source tailing position.
//! [`IpReputation`] is the durable GeoIP/ASN cache row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Device classification produced by the User-Agent classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

impl DeviceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Bot => "bot",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered log source: one per tailed file.
///
/// Position state (`last_position`, `last_inode`, `last_line_content`) is
/// owned exclusively by the reader/processor for this source; the
/// coordinator never mutates it directly.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LogSource {
    pub name: String,
    pub path: String,
    pub parser_type: String,
    pub last_position: i64,
    pub last_inode: i64,
    pub last_line_content: Option<String>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LogSource {
    /// A freshly discovered/registered source, never yet read.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>, parser_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            path: path.into(),
            parser_type: parser_type.into(),
            last_position: 0,
            last_inode: 0,
            last_line_content: None,
            last_read_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The canonical, persisted representation of one proxied HTTP request.
///
/// Produced directly by a [`crate::parsers::Parser`] — no intermediate
/// reflection-based mapping. Field groups mirror the specification's
/// semantic grouping (identity/client/request/response/timing/headers/
/// UA/proxy/tls/tracing/geo/extensibility/audit).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RequestEvent {
    // identity
    pub id: i64,
    pub source_name: String,
    pub timestamp: DateTime<Utc>,
    pub request_hash: String,
    pub partition_key: String,

    // client
    pub client_ip: String,
    pub client_port: i32,
    pub client_user: String,
    pub client_hostname: String,

    // request
    pub method: String,
    pub protocol: String,
    pub host: String,
    pub path: String,
    pub query_string: String,
    pub request_length: i64,
    pub request_scheme: String,

    // response
    pub status_code: i32,
    pub response_size: i64,
    pub response_time_ms: i64,
    pub response_content_type: String,

    // timing
    pub duration_ns: i64,
    pub start_utc: String,
    pub upstream_response_time_ms: i64,
    pub retry_attempts: i32,
    pub requests_total: i64,

    // headers
    pub user_agent: String,
    pub referer: String,

    // UA-parsed
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
    pub device_type: String,

    // proxy
    pub backend_name: String,
    pub backend_url: String,
    pub router_name: String,
    pub upstream_status: i32,
    pub upstream_content_type: String,

    // tls
    pub tls_version: String,
    pub tls_cipher: String,
    pub tls_server_name: String,

    // tracing
    pub request_id: String,
    pub trace_id: String,

    // geo
    pub geo_country: String,
    pub geo_city: String,
    pub geo_lat: f64,
    pub geo_lon: f64,
    pub asn: i64,
    pub asn_org: String,

    // extensibility
    pub proxy_metadata: Option<serde_json::Value>,

    // audit
    pub created_at: DateTime<Utc>,
}

impl RequestEvent {
    /// `YYYY-MM` UTC year-month bucket, derived from `timestamp`.
    #[must_use]
    pub fn partition_key_for(timestamp: DateTime<Utc>) -> String {
        timestamp.format("%Y-%m").to_string()
    }

    /// Clamp a parser-recovered status code to the storable range
    /// `[0, 600)`; anything unrecoverable becomes `0` rather than failing
    /// the record (spec invariant: never fail a record over a bad status).
    #[must_use]
    pub fn coerce_status_code(code: i64) -> i32 {
        if (100..600).contains(&code) {
            code as i32
        } else {
            0
        }
    }
}

impl crate::filters::ServiceIdentified for RequestEvent {
    fn backend_name(&self) -> &str {
        &self.backend_name
    }
    fn backend_url(&self) -> &str {
        &self.backend_url
    }
    fn host(&self) -> &str {
        &self.host
    }
    fn client_ip(&self) -> &str {
        &self.client_ip
    }
}

/// Durable GeoIP/ASN reputation cache, written asynchronously by the
/// enricher. Lookup failures never block ingestion.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IpReputation {
    pub ip_address: String,
    pub country: String,
    pub country_name: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
    pub asn: i64,
    pub asn_org: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub lookup_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_key_is_year_month() {
        let ts = DateTime::parse_from_rfc3339("2025-06-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(RequestEvent::partition_key_for(ts), "2025-06");
    }

    #[test]
    fn status_code_coercion() {
        assert_eq!(RequestEvent::coerce_status_code(200), 200);
        assert_eq!(RequestEvent::coerce_status_code(0), 0);
        assert_eq!(RequestEvent::coerce_status_code(99), 0);
        assert_eq!(RequestEvent::coerce_status_code(600), 0);
        assert_eq!(RequestEvent::coerce_status_code(-1), 0);
    }
}
