//! Durable `ip_reputation` cache: asynchronous write-behind target for the
//! GeoIP enricher, and the source of the warm-up query.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::model::IpReputation;

/// Record (or refresh) a GeoIP lookup result for one IP. Concurrent
/// duplicate inserts are tolerated — conflicts are ignored on first insert,
/// and a second writer simply bumps `lookup_count`/`last_seen` instead.
pub async fn record_lookup(
    pool: &SqlitePool,
    ip_address: &str,
    country: &str,
    city: &str,
    lat: f64,
    lon: f64,
    asn: i64,
    asn_org: &str,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO ip_reputation (ip_address, country, country_name, city, lat, lon, asn, \
         asn_org, first_seen, last_seen, lookup_count) \
         VALUES (?, ?, '', ?, ?, ?, ?, ?, ?, ?, 1) \
         ON CONFLICT(ip_address) DO UPDATE SET \
         last_seen = excluded.last_seen, lookup_count = lookup_count + 1",
    )
    .bind(ip_address)
    .bind(country)
    .bind(city)
    .bind(lat)
    .bind(lon)
    .bind(asn)
    .bind(asn_org)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// IPs with more than `min_requests` requests in the last `days` days, used
/// to warm the GeoIP enricher's in-memory cache on startup.
pub async fn frequent_ips(
    pool: &SqlitePool,
    min_requests: i64,
    days: i64,
    limit: usize,
) -> Result<Vec<IpReputation>, sqlx::Error> {
    sqlx::query_as::<_, IpReputation>(
        "SELECT r.* FROM ip_reputation r \
         JOIN (\
            SELECT client_ip, COUNT(*) AS n FROM http_requests \
            WHERE timestamp > datetime('now', printf('-%d days', ?)) \
            GROUP BY client_ip HAVING n > ? \
         ) freq ON freq.client_ip = r.ip_address \
         ORDER BY freq.n DESC \
         LIMIT ?",
    )
    .bind(days)
    .bind(min_requests)
    .bind(limit as i64)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn record_lookup_then_duplicate_bumps_count() {
        let pool = test_pool().await;
        record_lookup(&pool, "1.2.3.4", "US", "Springfield", 1.0, 2.0, 64500, "Example ISP")
            .await
            .unwrap();
        record_lookup(&pool, "1.2.3.4", "US", "Springfield", 1.0, 2.0, 64500, "Example ISP")
            .await
            .unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT lookup_count FROM ip_reputation WHERE ip_address = ?")
            .bind("1.2.3.4")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
