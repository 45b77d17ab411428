//! GeoIP/ASN enrichment.
//!
//! The vendor MaxMind-style database file format is out of scope for this
//! crate (an external collaborator); [`GeoLookup`] is the seam a concrete
//! reader plugs into. What lives here is the policy: an in-memory
//! LRU-like cache in front of the lookup, a durable async write-behind to
//! the reputation table, and the 7-day/5,000-IP warm-up.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::reputation;
use crate::model::RequestEvent;

/// City-level geolocation result from a vendor database lookup.
#[derive(Debug, Clone, Default)]
pub struct CityLookup {
    pub country: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
}

/// Country-level fallback, used when no City database is configured.
#[derive(Debug, Clone, Default)]
pub struct CountryLookup {
    pub country: String,
}

/// ASN lookup result.
#[derive(Debug, Clone, Default)]
pub struct AsnLookup {
    pub asn: i64,
    pub asn_org: String,
}

/// Seam over the vendor GeoIP/ASN database reader. A real implementation
/// wraps a memory-mapped MaxMind-format database; tests and the no-GeoIP
/// configuration use [`NullGeoLookup`].
pub trait GeoLookup: Send + Sync {
    fn has_city_db(&self) -> bool;
    fn lookup_city(&self, ip: IpAddr) -> Option<CityLookup>;
    fn lookup_country(&self, ip: IpAddr) -> Option<CountryLookup>;
    fn lookup_asn(&self, ip: IpAddr) -> Option<AsnLookup>;
}

/// No-op lookup used when GeoIP is disabled or no database is configured.
pub struct NullGeoLookup;

impl GeoLookup for NullGeoLookup {
    fn has_city_db(&self) -> bool {
        false
    }
    fn lookup_city(&self, _ip: IpAddr) -> Option<CityLookup> {
        None
    }
    fn lookup_country(&self, _ip: IpAddr) -> Option<CountryLookup> {
        None
    }
    fn lookup_asn(&self, _ip: IpAddr) -> Option<AsnLookup> {
        None
    }
}

#[derive(Debug, Clone, Default)]
struct GeoRecord {
    country: String,
    city: String,
    lat: f64,
    lon: f64,
    asn: i64,
    asn_org: String,
}

/// Bounded in-memory cache over a vendor GeoIP/ASN lookup, with durable
/// async write-behind into `ip_reputation`.
pub struct GeoIpEnricher {
    enabled: bool,
    lookup: Arc<dyn GeoLookup>,
    cache: DashMap<String, GeoRecord>,
    pool: Option<SqlitePool>,
    max_warm_entries: usize,
}

impl GeoIpEnricher {
    #[must_use]
    pub fn new(enabled: bool, lookup: Arc<dyn GeoLookup>, pool: SqlitePool) -> Self {
        Self {
            enabled,
            lookup,
            cache: DashMap::new(),
            pool: Some(pool),
            max_warm_entries: 5_000,
        }
    }

    /// An enricher with GeoIP disabled; `enrich()` and `warm_up()` are then
    /// both no-ops, so no storage handle is needed.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            lookup: Arc::new(NullGeoLookup),
            cache: DashMap::new(),
            pool: None,
            max_warm_entries: 5_000,
        }
    }

    /// Populate the cache with frequently-seen IPs (>5 requests in the last
    /// 7 days), up to `max_warm_entries`. Skipped if the cache is already
    /// past that size (e.g. a restart shortly after a previous warm-up).
    pub async fn warm_up(&self) {
        if !self.enabled || self.cache.len() >= self.max_warm_entries {
            return;
        }
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        match reputation::frequent_ips(pool, 5, 7, self.max_warm_entries).await {
            Ok(rows) => {
                for row in rows {
                    self.cache.insert(
                        row.ip_address.clone(),
                        GeoRecord {
                            country: row.country,
                            city: row.city,
                            lat: row.lat,
                            lon: row.lon,
                            asn: row.asn,
                            asn_org: row.asn_org,
                        },
                    );
                }
            }
            Err(e) => debug!(error = %e, "geoip warm-up query failed"),
        }
    }

    /// Enrich `event.geo_*`/`asn`/`asn_org` in place. Any failure — no
    /// GeoIP configured, unparseable IP, lookup miss — leaves those fields
    /// at their zero value; the event is still persisted.
    pub async fn enrich(&self, event: &mut RequestEvent) {
        if !self.enabled || event.client_ip.is_empty() {
            return;
        }

        if let Some(cached) = self.cache.get(&event.client_ip) {
            apply(event, &cached);
            return;
        }

        let Ok(ip) = event.client_ip.parse::<IpAddr>() else {
            debug!(ip = %event.client_ip, "unparseable client IP, skipping geoip");
            return;
        };

        let mut record = GeoRecord::default();
        if self.lookup.has_city_db() {
            if let Some(city) = self.lookup.lookup_city(ip) {
                record.country = city.country;
                record.city = city.city;
                record.lat = city.lat;
                record.lon = city.lon;
            }
        } else if let Some(country) = self.lookup.lookup_country(ip) {
            record.country = country.country;
        }
        if let Some(asn) = self.lookup.lookup_asn(ip) {
            record.asn = asn.asn;
            record.asn_org = asn.asn_org;
        }

        self.cache.insert(event.client_ip.clone(), record.clone());
        apply(event, &record);

        let Some(pool) = self.pool.clone() else {
            return;
        };
        let ip_address = event.client_ip.clone();
        tokio::spawn(async move {
            if let Err(e) = reputation::record_lookup(
                &pool,
                &ip_address,
                &record.country,
                &record.city,
                record.lat,
                record.lon,
                record.asn,
                &record.asn_org,
            )
            .await
            {
                debug!(error = %e, ip = %ip_address, "failed to persist ip reputation");
            }
        });
    }
}

fn apply(event: &mut RequestEvent, record: &GeoRecord) {
    event.geo_country.clone_from(&record.country);
    event.geo_city.clone_from(&record.city);
    event.geo_lat = record.lat;
    event.geo_lon = record.lon;
    event.asn = record.asn;
    event.asn_org.clone_from(&record.asn_org);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeLookup;
    impl GeoLookup for FakeLookup {
        fn has_city_db(&self) -> bool {
            true
        }
        fn lookup_city(&self, _ip: IpAddr) -> Option<CityLookup> {
            Some(CityLookup {
                country: "US".into(),
                city: "Springfield".into(),
                lat: 39.0,
                lon: -89.0,
            })
        }
        fn lookup_country(&self, _ip: IpAddr) -> Option<CountryLookup> {
            None
        }
        fn lookup_asn(&self, _ip: IpAddr) -> Option<AsnLookup> {
            Some(AsnLookup {
                asn: 64500,
                asn_org: "Example ISP".into(),
            })
        }
    }

    fn sample_event() -> RequestEvent {
        crate::test_support::sample_event("1.2.3.4", "h")
    }

    #[tokio::test]
    async fn disabled_enricher_leaves_event_unchanged() {
        let enricher = GeoIpEnricher::disabled();
        let mut event = sample_event();
        enricher.enrich(&mut event).await;
        assert_eq!(event.geo_country, "");
        assert_eq!(event.asn, 0);
    }

    #[tokio::test]
    async fn empty_ip_is_skipped() {
        let enricher = GeoIpEnricher::disabled();
        let mut event = sample_event();
        event.client_ip = String::new();
        enricher.enrich(&mut event).await;
        assert_eq!(event.geo_country, "");
    }
}
