//! Caddy JSON access-log parser.
//!
//! Caddy's `http.log.access` logger emits one JSON object per request, with
//! request detail nested under a `request` key. TLS version and cipher
//! suite arrive as the raw numeric codes from the `crypto/tls` package and
//! are decoded here into human-readable names.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{ParseError, Parser};
use crate::hash::{request_hash, HashInput};
use crate::model::RequestEvent;

pub struct CaddyParser;

fn tls_version_name(code: i64) -> String {
    match code {
        769 => "1.0".to_string(),
        770 => "1.1".to_string(),
        771 => "1.2".to_string(),
        772 => "1.3".to_string(),
        _ => format!("UNKNOWN_{code}"),
    }
}

fn tls_cipher_name(code: i64) -> String {
    match code {
        0x1301 => "TLS_AES_128_GCM_SHA256",
        0x1302 => "TLS_AES_256_GCM_SHA384",
        0x1303 => "TLS_CHACHA20_POLY1305_SHA256",
        0xc02f => "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        0xc02b => "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        0xc030 => "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        0xc02c => "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        0xcca8 => "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        0xcca9 => "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
        _ => return format!("UNKNOWN_0x{code:04X}"),
    }
    .to_string()
}

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn i64_field(v: &Value, key: &str) -> i64 {
    v.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn header_first<'a>(headers: &'a Value, key: &str) -> Option<&'a str> {
    headers.get(key)?.as_array()?.first()?.as_str()
}

fn split_path_query(uri: &str) -> (String, String) {
    match uri.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (uri.to_string(), String::new()),
    }
}

impl Parser for CaddyParser {
    fn name(&self) -> &'static str {
        "caddy"
    }

    fn can_parse(&self, line: &str) -> bool {
        let Ok(v) = serde_json::from_str::<Value>(line.trim()) else {
            return false;
        };
        let logger_ok = v
            .get("logger")
            .and_then(Value::as_str)
            .is_some_and(|l| l.starts_with("http.log.access"));
        logger_ok && v.get("request").is_some_and(Value::is_object)
    }

    fn parse(&self, line: &str, source_name: &str) -> Result<RequestEvent, ParseError> {
        let v: Value = serde_json::from_str(line.trim()).map_err(|e| ParseError::Malformed {
            parser: "caddy",
            reason: e.to_string(),
        })?;

        let request = v.get("request").ok_or(ParseError::MissingField {
            parser: "caddy",
            field: "request",
        })?;

        let ts = v.get("ts").and_then(Value::as_f64).ok_or(ParseError::MissingField {
            parser: "caddy",
            field: "ts",
        })?;
        let secs = ts.trunc() as i64;
        let nanos = ((ts.fract()) * 1_000_000_000.0).round() as u32;
        let timestamp = DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now);

        let client_ip = str_field(request, "client_ip")
            .or_else(|| str_field(request, "remote_ip"))
            .or_else(|| {
                request
                    .get("headers")
                    .and_then(|h| header_first(h, "X-Forwarded-For"))
                    .map(|v| v.split(',').next().unwrap_or(v).trim())
            })
            .unwrap_or_default()
            .to_string();

        let method = str_field(request, "method").unwrap_or("GET").to_string();
        let host = str_field(request, "host").unwrap_or_default().to_string();
        let (path, query_string) = str_field(request, "uri").map(split_path_query).unwrap_or_default();
        let protocol = str_field(request, "proto").unwrap_or_default().to_string();

        let tls = request.get("tls").filter(Value::is_object);
        let request_scheme = if tls.is_some() { "https" } else { "http" }.to_string();
        let tls_version = tls
            .map(|t| tls_version_name(i64_field(t, "version")))
            .unwrap_or_default();
        let tls_cipher = tls
            .map(|t| tls_cipher_name(i64_field(t, "cipher_suite")))
            .unwrap_or_default();
        let tls_server_name = tls
            .and_then(|t| str_field(t, "server_name"))
            .unwrap_or_default()
            .to_string();

        let user_agent = request
            .get("headers")
            .and_then(|h| header_first(h, "User-Agent"))
            .unwrap_or_default()
            .to_string();
        let referer = request
            .get("headers")
            .and_then(|h| header_first(h, "Referer"))
            .unwrap_or_default()
            .to_string();

        let status_code = RequestEvent::coerce_status_code(i64_field(&v, "status"));
        let duration_secs = v.get("duration").and_then(Value::as_f64).unwrap_or(0.0);
        let duration_ns = (duration_secs * 1_000_000_000.0) as i64;
        let response_time_ms = duration_ns / 1_000_000;

        let start_utc = timestamp.to_rfc3339();
        let request_hash_value = request_hash(&HashInput {
            source_name,
            start_utc_or_timestamp: &start_utc,
            method: &method,
            host: &host,
            path: &path,
            query_string: &query_string,
            client_ip: &client_ip,
            client_port: 0,
            status_code,
            duration_ns,
        });

        Ok(RequestEvent {
            id: 0,
            source_name: source_name.to_string(),
            timestamp,
            request_hash: request_hash_value,
            partition_key: RequestEvent::partition_key_for(timestamp),

            client_ip,
            client_port: 0,
            client_user: String::new(),
            client_hostname: String::new(),

            method,
            protocol,
            host,
            path,
            query_string,
            request_length: i64_field(&v, "bytes_read"),
            request_scheme,

            status_code,
            response_size: i64_field(&v, "size"),
            response_time_ms,
            response_content_type: v
                .get("resp_headers")
                .and_then(|h| header_first(h, "Content-Type"))
                .unwrap_or_default()
                .to_string(),

            duration_ns,
            start_utc,
            upstream_response_time_ms: 0,
            retry_attempts: 0,
            requests_total: 0,

            user_agent,
            referer,

            browser: String::new(),
            browser_version: String::new(),
            os: String::new(),
            os_version: String::new(),
            device_type: String::new(),

            backend_name: String::new(),
            backend_url: str_field(&v, "upstream").unwrap_or_default().to_string(),
            router_name: String::new(),
            upstream_status: 0,
            upstream_content_type: String::new(),

            tls_version,
            tls_cipher,
            tls_server_name,

            request_id: str_field(&v, "request_id").unwrap_or_default().to_string(),
            trace_id: String::new(),

            geo_country: String::new(),
            geo_city: String::new(),
            geo_lat: 0.0,
            geo_lon: 0.0,
            asn: 0,
            asn_org: String::new(),

            proxy_metadata: None,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> String {
        r#"{"level":"info","ts":1767690562.5659065,"logger":"http.log.access.log0","request":{"remote_ip":"1.2.3.4","client_ip":"1.2.3.4","proto":"HTTP/2.0","method":"GET","host":"example.com","uri":"/api?x=1","headers":{"User-Agent":["Mozilla/5.0"]},"tls":{"version":772,"cipher_suite":4865,"server_name":"example.com"}},"duration":0.000123,"size":512,"status":200}"#.to_string()
    }

    #[test]
    fn s2_tls_1_3() {
        let parser = CaddyParser;
        let line = line();
        assert!(parser.can_parse(&line));
        let event = parser.parse(&line, "caddy-main").unwrap();
        assert_eq!(event.tls_version, "1.3");
        assert_eq!(event.tls_cipher, "TLS_AES_128_GCM_SHA256");
        assert_eq!(event.request_scheme, "https");
        assert_eq!(event.path, "/api");
        assert_eq!(event.query_string, "x=1");
    }

    #[test]
    fn non_access_logger_rejected() {
        let line = r#"{"logger":"http.log.error","request":{}}"#;
        assert!(!CaddyParser.can_parse(line));
    }

    #[test]
    fn client_ip_priority_order() {
        let line = r#"{"ts":1.0,"logger":"http.log.access","request":{"remote_ip":"9.9.9.9","headers":{"X-Forwarded-For":["1.1.1.1, 2.2.2.2"]}}}"#;
        let event = CaddyParser.parse(line, "s").unwrap();
        // client_ip / remote_ip both absent-in-priority except remote_ip present -> used
        assert_eq!(event.client_ip, "9.9.9.9");

        let line2 = r#"{"ts":1.0,"logger":"http.log.access","request":{"headers":{"X-Forwarded-For":["1.1.1.1, 2.2.2.2"]}}}"#;
        let event2 = CaddyParser.parse(line2, "s").unwrap();
        assert_eq!(event2.client_ip, "1.1.1.1");
    }

    #[test]
    fn no_tls_means_http_scheme() {
        let line = r#"{"ts":1.0,"logger":"http.log.access","request":{"uri":"/"}}"#;
        let event = CaddyParser.parse(line, "s").unwrap();
        assert_eq!(event.request_scheme, "http");
        assert_eq!(event.tls_version, "");
    }
}
