//! Live-metrics collector: a 60-second in-memory ring of recent requests,
//! periodically summarised into the snapshot streamed to dashboards.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::DeadlineExceeded;
use crate::filters::{self, ServiceFilter, ServiceIdentified};
use crate::ingest::processor::LiveSink;
use crate::model::RequestEvent;

const RING_WINDOW: Duration = Duration::seconds(60);
const RATE_WINDOW: Duration = Duration::seconds(5);
const MIN_IP_RATE: f64 = 0.1;
const MAX_LATEST_REQUESTS: usize = 20;
const MAX_TOP_IPS: usize = 10;
const GET_METRICS_DEADLINE: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Clone)]
struct Sample {
    id: i64,
    timestamp: DateTime<Utc>,
    client_ip: String,
    geo_country: String,
    status_code: i32,
    response_time_ms: i64,
    method: String,
    host: String,
    backend_name: String,
    backend_url: String,
    path: String,
}

impl ServiceIdentified for Sample {
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

impl From<&RequestEvent> for Sample {
    fn from(e: &RequestEvent) -> Self {
        Self {
            id: e.id,
            timestamp: e.timestamp,
            client_ip: e.client_ip.clone(),
            geo_country: e.geo_country.clone(),
            status_code: e.status_code,
            response_time_ms: e.response_time_ms,
            method: e.method.clone(),
            host: e.host.clone(),
            backend_name: e.backend_name.clone(),
            backend_url: e.backend_url.clone(),
            path: e.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TopIp {
    pub ip: String,
    pub country: String,
    pub request_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestRequest {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub host: String,
    pub backend_name: String,
    pub path: String,
    pub status_code: i32,
    pub response_time_ms: i64,
    pub geo_country: String,
    pub client_ip: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceRate {
    pub service_name: String,
    pub request_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub request_rate: f64,
    pub error_rate: f64,
    pub avg_response_time: f64,
    pub active_connections: i64,
    pub status_2xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub timestamp: DateTime<Utc>,
    pub top_ips: Vec<TopIp>,
    pub latest_requests: Vec<LatestRequest>,
    pub per_service: Vec<ServiceRate>,
}

pub struct LiveCollector {
    ring: RwLock<Vec<Sample>>,
    cached: RwLock<Option<(LiveSnapshot, String)>>,
    active_connections: AtomicI64,
}

impl Default for LiveCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ring: RwLock::new(Vec::new()),
            cached: RwLock::new(None),
            active_connections: AtomicI64::new(0),
        }
    }

    /// Append or binary-search-insert a sample, keeping the ring in
    /// timestamp order. O(1) in the common append-only case.
    pub fn ingest(&self, event: &RequestEvent) {
        let sample = Sample::from(event);
        let mut ring = self.ring.write();
        let idx = ring.partition_point(|s| s.timestamp <= sample.timestamp);
        ring.insert(idx, sample);
    }

    pub fn set_active_connections(&self, n: i64) {
        self.active_connections.store(n, Ordering::Relaxed);
    }

    /// Prune to the last 60s, rebuild the snapshot, and cache its JSON
    /// serialisation. Run by [`Self::start`] on a ticker.
    pub fn collect(&self) {
        let now = Utc::now();
        let active = self.active_connections.load(Ordering::Relaxed);
        let mut ring = self.ring.write();
        let cutoff = now - RING_WINDOW;
        ring.retain(|s| s.timestamp > cutoff);
        let snapshot = build_snapshot(&ring, now, active, &[], None);
        drop(ring);

        let json = serde_json::to_string(&snapshot).unwrap_or_default();
        *self.cached.write() = Some((snapshot, json));
    }

    /// Periodic ticker driving [`Self::collect`], default interval 1s.
    pub async fn start(&self, interval: StdDuration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => self.collect(),
            }
        }
    }

    /// The cached snapshot JSON, the sole contract with the streaming
    /// handler. `None` before the first `collect()` has run.
    #[must_use]
    pub fn get_metrics(&self) -> Option<String> {
        self.cached.read().as_ref().map(|(_, json)| json.clone())
    }

    #[must_use]
    pub fn get_metrics_struct(&self) -> Option<LiveSnapshot> {
        self.cached.read().as_ref().map(|(snapshot, _)| snapshot.clone())
    }

    /// Recompute over the ring with the given filters applied, under a
    /// 5-second deadline. Not cached.
    pub async fn get_metrics_with_filters(
        &self,
        service_filters: &[ServiceFilter],
        exclude_ip: Option<&str>,
    ) -> Result<LiveSnapshot, DeadlineExceeded> {
        let started = std::time::Instant::now();
        let now = Utc::now();
        let active = self.active_connections.load(Ordering::Relaxed);
        let filters = service_filters.to_vec();
        let exclude = exclude_ip.map(ToString::to_string);

        let result = tokio::time::timeout(GET_METRICS_DEADLINE, async {
            let ring = self.ring.read();
            build_snapshot(&ring, now, active, &filters, exclude.as_deref())
        })
        .await;

        result.map_err(|_| DeadlineExceeded {
            elapsed_ms: started.elapsed().as_millis() as u64,
            budget_ms: GET_METRICS_DEADLINE.as_millis() as u64,
        })
    }
}

impl LiveSink for LiveCollector {
    fn ingest(&self, event: &RequestEvent) {
        self.ingest(event);
    }
}

fn build_snapshot(
    ring: &[Sample],
    now: DateTime<Utc>,
    active_connections: i64,
    service_filters: &[ServiceFilter],
    exclude_ip: Option<&str>,
) -> LiveSnapshot {
    let filtered: Vec<&Sample> = ring
        .iter()
        .filter(|s| filters::matches_service(*s, service_filters))
        .filter(|s| filters::passes_exclude_ip(*s, exclude_ip, service_filters))
        .collect();

    let rate_cutoff = now - RATE_WINDOW;
    let window: Vec<&&Sample> = filtered.iter().filter(|s| s.timestamp > rate_cutoff).collect();

    // If nothing arrived within the rate window, rates/top_ips/status counts
    // all force to zero even though the 60s ring may still hold older
    // events — this is what lets live charts fall back to zero once
    // traffic stops instead of lagging behind for a full minute.
    let traffic_is_fresh = filtered.iter().next_back().is_some_and(|s| s.timestamp > rate_cutoff);

    let total = window.len() as f64;
    let errors = window.iter().filter(|s| s.status_code >= 400).count() as f64;
    let avg_response_time = if window.is_empty() {
        0.0
    } else {
        window.iter().map(|s| s.response_time_ms as f64).sum::<f64>() / total
    };

    let request_rate = total / RATE_WINDOW.num_seconds() as f64;
    let error_rate = errors / RATE_WINDOW.num_seconds() as f64;

    let mut ip_counts: std::collections::HashMap<&str, (u64, &str)> = std::collections::HashMap::new();
    for s in &window {
        let entry = ip_counts.entry(s.client_ip.as_str()).or_insert((0, s.geo_country.as_str()));
        entry.0 += 1;
    }
    let mut top_ips: Vec<TopIp> = ip_counts
        .into_iter()
        .map(|(ip, (count, country))| TopIp {
            ip: ip.to_string(),
            country: country.to_string(),
            request_rate: count as f64 / RATE_WINDOW.num_seconds() as f64,
        })
        .filter(|t| t.request_rate >= MIN_IP_RATE)
        .collect();
    top_ips.sort_by(|a, b| {
        b.request_rate
            .partial_cmp(&a.request_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.ip.cmp(&b.ip))
    });
    top_ips.truncate(MAX_TOP_IPS);

    let (status_2xx, status_4xx, status_5xx) = if traffic_is_fresh {
        filtered.iter().fold((0u64, 0u64, 0u64), |(a, b, c), s| match s.status_code {
            200..=299 => (a + 1, b, c),
            400..=499 => (a, b + 1, c),
            500..=599 => (a, b, c + 1),
            _ => (a, b, c),
        })
    } else {
        (0, 0, 0)
    };

    let (request_rate, error_rate, top_ips) = if traffic_is_fresh { (request_rate, error_rate, top_ips) } else { (0.0, 0.0, Vec::new()) };

    let mut latest_requests: Vec<LatestRequest> = filtered
        .iter()
        .rev()
        .take(MAX_LATEST_REQUESTS)
        .map(|s| LatestRequest {
            id: s.id,
            timestamp: s.timestamp,
            method: s.method.clone(),
            host: s.host.clone(),
            backend_name: s.backend_name.clone(),
            path: s.path.clone(),
            status_code: s.status_code,
            response_time_ms: s.response_time_ms,
            geo_country: s.geo_country.clone(),
            client_ip: s.client_ip.clone(),
        })
        .collect();
    latest_requests.truncate(MAX_LATEST_REQUESTS);

    let mut per_service_counts: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for s in &window {
        let name = extract_service_name(&s.backend_name);
        if name.is_empty() {
            continue;
        }
        *per_service_counts.entry(name).or_insert(0) += 1;
    }
    let mut per_service: Vec<ServiceRate> = per_service_counts
        .into_iter()
        .map(|(service_name, count)| ServiceRate {
            service_name,
            request_rate: count as f64 / RATE_WINDOW.num_seconds() as f64,
        })
        .collect();
    per_service.sort_by(|a, b| a.service_name.cmp(&b.service_name));

    LiveSnapshot {
        request_rate,
        error_rate,
        avg_response_time,
        active_connections,
        status_2xx,
        status_4xx,
        status_5xx,
        timestamp: now,
        top_ips,
        latest_requests,
        per_service,
    }
}

/// `backend_name` → service name: strip an `@…` router suffix and a
/// trailing `-service`, split on `-`, and discard the first token (the
/// stack/environment prefix Traefik/Caddy prepend).
fn extract_service_name(backend_name: &str) -> String {
    let base = backend_name.split('@').next().unwrap_or(backend_name);
    let base = base.strip_suffix("-service").unwrap_or(base);
    let parts: Vec<&str> = base.split('-').collect();
    if parts.len() > 1 {
        parts[1..].join("-")
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(secs_ago: i64, status: i32, ip: &str) -> RequestEvent {
        let mut e = crate::test_support::sample_event(ip, "example.com");
        e.timestamp = Utc::now() - Duration::seconds(secs_ago);
        e.status_code = status;
        e
    }

    #[test]
    fn ring_stays_in_timestamp_order_with_out_of_order_inserts() {
        let collector = LiveCollector::new();
        collector.ingest(&sample_at(1, 200, "1.1.1.1"));
        collector.ingest(&sample_at(3, 200, "2.2.2.2"));
        collector.ingest(&sample_at(2, 200, "3.3.3.3"));

        let ring = collector.ring.read();
        for pair in ring.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn collect_prunes_older_than_60s() {
        let collector = LiveCollector::new();
        collector.ingest(&sample_at(120, 200, "1.1.1.1"));
        collector.ingest(&sample_at(1, 200, "2.2.2.2"));
        collector.collect();

        assert_eq!(collector.ring.read().len(), 1);
    }

    #[test]
    fn stale_traffic_yields_zero_rates() {
        let collector = LiveCollector::new();
        collector.ingest(&sample_at(10, 200, "1.1.1.1"));
        collector.collect();

        let snapshot = collector.get_metrics_struct().unwrap();
        assert_eq!(snapshot.request_rate, 0.0);
        assert!(snapshot.top_ips.is_empty());
        assert_eq!(snapshot.status_2xx, 0);
    }

    #[test]
    fn fresh_traffic_yields_nonzero_request_rate() {
        let collector = LiveCollector::new();
        for _ in 0..3 {
            collector.ingest(&sample_at(1, 200, "1.1.1.1"));
        }
        collector.collect();

        let snapshot = collector.get_metrics_struct().unwrap();
        assert!(snapshot.request_rate > 0.0);
        assert_eq!(snapshot.status_2xx, 3);
    }

    #[test]
    fn service_name_strips_router_and_service_suffix_and_first_token() {
        assert_eq!(extract_service_name("prod-api-service@docker"), "api");
        assert_eq!(extract_service_name("prod-web"), "web");
        assert_eq!(extract_service_name("solo"), "solo");
        assert_eq!(extract_service_name(""), "");
    }

    #[tokio::test]
    async fn filters_scope_metrics_to_matching_service() {
        let collector = LiveCollector::new();
        let mut matching = sample_at(1, 200, "1.1.1.1");
        matching.backend_name = "api".into();
        let mut other = sample_at(1, 200, "2.2.2.2");
        other.backend_name = "web".into();
        collector.ingest(&matching);
        collector.ingest(&other);

        let filters = vec![ServiceFilter { kind: crate::filters::ServiceFilterKind::BackendName, value: "api".into() }];
        let snapshot = collector.get_metrics_with_filters(&filters, None).await.unwrap();
        assert_eq!(snapshot.latest_requests.len(), 1);
        assert_eq!(snapshot.latest_requests[0].client_ip, "1.1.1.1");
    }
}
