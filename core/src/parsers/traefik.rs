//! Traefik JSON access-log parser.
//!
//! Traefik emits one JSON object per request. This parser recognises the
//! field names Traefik's default `json` log format uses and maps them
//! directly onto [`RequestEvent`], with no intermediate representation.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{ParseError, Parser};
use crate::hash::{request_hash, HashInput};
use crate::model::RequestEvent;

pub struct TraefikParser;

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn i64_field(v: &Value, key: &str) -> i64 {
    match v.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn split_ip_port(addr: &str) -> (String, i32) {
    match addr.rsplit_once(':') {
        Some((ip, port)) => (ip.to_string(), port.parse().unwrap_or(0)),
        None => (addr.to_string(), 0),
    }
}

fn split_path_query(path: &str) -> (String, String) {
    match path.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (path.to_string(), String::new()),
    }
}

impl Parser for TraefikParser {
    fn name(&self) -> &'static str {
        "traefik"
    }

    fn can_parse(&self, line: &str) -> bool {
        let Ok(v) = serde_json::from_str::<Value>(line.trim()) else {
            return false;
        };
        v.is_object() && v.get("time").is_some() && v.get("request_X-Real-Ip").is_some()
    }

    fn parse(&self, line: &str, source_name: &str) -> Result<RequestEvent, ParseError> {
        let v: Value = serde_json::from_str(line.trim()).map_err(|e| ParseError::Malformed {
            parser: "traefik",
            reason: e.to_string(),
        })?;

        let time_str = str_field(&v, "time").ok_or(ParseError::MissingField {
            parser: "traefik",
            field: "time",
        })?;
        let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(time_str)
            .map_err(|e| ParseError::Malformed {
                parser: "traefik",
                reason: format!("bad time {time_str}: {e}"),
            })?
            .with_timezone(&Utc);

        let (client_ip, client_port) = str_field(&v, "request_X-Real-Ip")
            .map(split_ip_port)
            .unwrap_or_default();

        let method = str_field(&v, "RequestMethod").unwrap_or("GET").to_string();
        let (path, mut query_string) = str_field(&v, "RequestPath")
            .map(split_path_query)
            .unwrap_or_default();

        let mut referer = str_field(&v, "request_Referer").unwrap_or_default().to_string();
        if referer.is_empty() {
            if let Some(redirect) = query_string
                .split('&')
                .find_map(|kv| kv.strip_prefix("redirect="))
            {
                referer = redirect.to_string();
            }
        }
        if query_string.is_empty() {
            query_string = String::new();
        }

        let status_code = RequestEvent::coerce_status_code(i64_field(&v, "DownstreamStatus"));
        let duration_ns = i64_field(&v, "Duration");
        let response_time_ms = duration_ns / 1_000_000;

        let host = str_field(&v, "RequestHost").unwrap_or_default().to_string();
        let start_utc = str_field(&v, "StartUTC")
            .map(str::to_string)
            .unwrap_or_else(|| timestamp.to_rfc3339());

        let request_hash_value = request_hash(&HashInput {
            source_name,
            start_utc_or_timestamp: &start_utc,
            method: &method,
            host: &host,
            path: &path,
            query_string: &query_string,
            client_ip: &client_ip,
            client_port,
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
            client_port,
            client_user: str_field(&v, "ClientUsername").unwrap_or_default().to_string(),
            client_hostname: str_field(&v, "ClientHost").unwrap_or_default().to_string(),

            method,
            protocol: str_field(&v, "RequestProtocol").unwrap_or_default().to_string(),
            host,
            path,
            query_string,
            request_length: i64_field(&v, "RequestContentSize"),
            request_scheme: str_field(&v, "RequestScheme").unwrap_or_default().to_string(),

            status_code,
            response_size: i64_field(&v, "DownstreamContentSize"),
            response_time_ms,
            response_content_type: str_field(&v, "OriginContentType").unwrap_or_default().to_string(),

            duration_ns,
            start_utc,
            upstream_response_time_ms: i64_field(&v, "OriginDuration") / 1_000_000,
            retry_attempts: i64_field(&v, "RetryAttempts") as i32,
            requests_total: i64_field(&v, "RequestCount"),

            user_agent: str_field(&v, "request_User-Agent").unwrap_or_default().to_string(),
            referer,

            browser: String::new(),
            browser_version: String::new(),
            os: String::new(),
            os_version: String::new(),
            device_type: String::new(),

            backend_name: str_field(&v, "ServiceName").unwrap_or_default().to_string(),
            backend_url: str_field(&v, "ServiceURL").unwrap_or_default().to_string(),
            router_name: str_field(&v, "RouterName").unwrap_or_default().to_string(),
            upstream_status: i64_field(&v, "OriginStatus") as i32,
            upstream_content_type: str_field(&v, "OriginContentType").unwrap_or_default().to_string(),

            tls_version: str_field(&v, "TLSVersion").unwrap_or_default().to_string(),
            tls_cipher: str_field(&v, "TLSCipher").unwrap_or_default().to_string(),
            tls_server_name: str_field(&v, "TLSClientSubject").unwrap_or_default().to_string(),

            request_id: str_field(&v, "downstream_X-Request-Id").unwrap_or_default().to_string(),
            trace_id: str_field(&v, "TraceId").unwrap_or_default().to_string(),

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
