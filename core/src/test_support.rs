//! Shared test fixtures. Only compiled under `#[cfg(test)]`.

use chrono::Utc;

use crate::hash::{request_hash, HashInput};
use crate::model::RequestEvent;

/// A minimal, internally-consistent [`RequestEvent`] for unit tests that
/// only care about a handful of fields.
#[must_use]
pub fn sample_event(client_ip: &str, host: &str) -> RequestEvent {
    let timestamp = Utc::now();
    let start_utc = timestamp.to_rfc3339();
    let request_hash_value = request_hash(&HashInput {
        source_name: "test",
        start_utc_or_timestamp: &start_utc,
        method: "GET",
        host,
        path: "/",
        query_string: "",
        client_ip,
        client_port: 0,
        status_code: 200,
        duration_ns: 1_000_000,
    });

    RequestEvent {
        id: 0,
        source_name: "test".into(),
        timestamp,
        request_hash: request_hash_value,
        partition_key: RequestEvent::partition_key_for(timestamp),
        client_ip: client_ip.to_string(),
        client_port: 0,
        client_user: String::new(),
        client_hostname: String::new(),
        method: "GET".into(),
        protocol: "HTTP/1.1".into(),
        host: host.to_string(),
        path: "/".into(),
        query_string: String::new(),
        request_length: 0,
        request_scheme: "http".into(),
        status_code: 200,
        response_size: 512,
        response_time_ms: 1,
        response_content_type: "text/html".into(),
        duration_ns: 1_000_000,
        start_utc,
        upstream_response_time_ms: 0,
        retry_attempts: 0,
        requests_total: 0,
        user_agent: "Mozilla/5.0".into(),
        referer: String::new(),
        browser: "Chrome".into(),
        browser_version: "120.0".into(),
        os: "Linux".into(),
        os_version: "unknown".into(),
        device_type: "desktop".into(),
        backend_name: "web".into(),
        backend_url: String::new(),
        router_name: String::new(),
        upstream_status: 200,
        upstream_content_type: String::new(),
        tls_version: String::new(),
        tls_cipher: String::new(),
        tls_server_name: String::new(),
        request_id: String::new(),
        trace_id: String::new(),
        geo_country: String::new(),
        geo_city: String::new(),
        geo_lat: 0.0,
        geo_lon: 0.0,
        asn: 0,
        asn_org: String::new(),
        proxy_metadata: None,
        created_at: timestamp,
    }
}
