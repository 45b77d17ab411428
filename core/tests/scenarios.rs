//! End-to-end scenario tests spanning multiple components, matching the
//! concrete scenarios used to validate this pipeline: live-metrics decay
//! to zero once traffic stops, response-time percentiles over a large
//! sample, and adaptive timeline bucketing at each threshold.

use chrono::{Duration, Utc};
use logwatch_core::db::writer::DeduplicatingWriter;
use logwatch_core::db::{create_pool, run_migrations, PoolLifecycle};
use logwatch_core::filters::ServiceFilter;
use logwatch_core::live::LiveCollector;
use logwatch_core::stats::StatsRepository;
use logwatch_core::test_support::sample_event;

async fn memory_pool() -> sqlx::SqlitePool {
    let pool = create_pool("sqlite::memory:", 5, PoolLifecycle::default()).await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// S4 — after traffic stops, the next `collect()` reports zero rates and
/// an empty top-IP list, even though the ring still holds the (now stale)
/// events from the last 60s.
#[tokio::test]
async fn s4_rate_returns_to_zero_after_traffic_stops() {
    let collector = LiveCollector::new();
    for _ in 0..100 {
        let mut event = sample_event("9.9.9.9", "example.com");
        event.timestamp = Utc::now() - Duration::seconds(10);
        collector.ingest(&event);
    }

    collector.collect();
    let snapshot = collector.get_metrics_struct().unwrap();
    assert_eq!(snapshot.request_rate, 0.0);
    assert_eq!(snapshot.status_2xx, 0);
    assert!(snapshot.top_ips.is_empty());
}

/// S5 — 10,000 events with `response_time_ms` uniform in `[1,1000]`
/// produce percentiles in the expected bands.
#[tokio::test]
async fn s5_percentiles_over_uniform_distribution() {
    let pool = memory_pool().await;
    let writer = DeduplicatingWriter::new(pool.clone()).await.unwrap();

    let mut events = Vec::with_capacity(10_000);
    for i in 0..10_000 {
        let mut event = sample_event("10.0.0.1", "example.com");
        event.request_hash = format!("s5-{i}");
        event.response_time_ms = (i % 1000) + 1;
        events.push(event);
    }
    writer.create_batch(events).await.unwrap();

    let repo = StatsRepository::new(pool);
    let stats = repo.response_time_stats(24, &[], None).await.unwrap();
    assert!((490..=510).contains(&stats.p50_ms), "p50 = {}", stats.p50_ms);
    assert!((940..=960).contains(&stats.p95_ms), "p95 = {}", stats.p95_ms);
    assert!((985..=1000).contains(&stats.p99_ms), "p99 = {}", stats.p99_ms);
}

/// S6 — timeline bucketing switches thresholds at 24h/168h/720h.
#[tokio::test]
async fn s6_adaptive_bucketing_switches_at_thresholds() {
    let pool = memory_pool().await;
    let writer = DeduplicatingWriter::new(pool.clone()).await.unwrap();

    let now = Utc::now();
    let mut events = Vec::new();
    for hours_ago in 0..720 {
        let mut event = sample_event("10.0.0.2", "example.com");
        event.request_hash = format!("s6-{hours_ago}");
        event.timestamp = now - Duration::hours(hours_ago);
        events.push(event);
    }
    writer.create_batch(events).await.unwrap();

    let repo = StatsRepository::new(pool);

    let hourly = repo.timeline(24, &[], None).await.unwrap();
    assert!(hourly.len() <= 24, "expected <=24 hourly buckets, got {}", hourly.len());

    let six_hour = repo.timeline(168, &[], None).await.unwrap();
    assert!(six_hour.len() <= 28, "expected <=28 six-hour buckets, got {}", six_hour.len());

    let daily = repo.timeline(720, &[], None).await.unwrap();
    assert!(daily.len() <= 30, "expected <=30 daily buckets, got {}", daily.len());
}

/// S3 (writer-level idempotence, exercised again here across a full
/// processor-shaped round trip with a real service filter) — ingesting
/// the same batch twice never doubles the stored row count.
#[tokio::test]
async fn reingestion_is_idempotent_under_service_filters() {
    let pool = memory_pool().await;
    let writer = DeduplicatingWriter::new(pool.clone()).await.unwrap();

    let mut event = sample_event("1.2.3.4", "example.com");
    event.backend_name = "checkout".into();
    event.request_hash = "stable-hash".into();

    writer.create_batch(vec![event.clone()]).await.unwrap();
    writer.create_batch(vec![event]).await.unwrap();

    let repo = StatsRepository::new(pool);
    let filters = vec![ServiceFilter {
        kind: logwatch_core::filters::ServiceFilterKind::BackendName,
        value: "checkout".into(),
    }];
    let summary = repo.summary(24, &filters, None).await.unwrap();
    assert_eq!(summary.total_requests, 1);
}
