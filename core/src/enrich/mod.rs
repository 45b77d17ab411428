//! Enrichment stage: GeoIP/ASN lookup and User-Agent classification.

pub mod geoip;
pub mod ua;

use crate::model::RequestEvent;

/// Apply the UA classifier's result onto an event's `browser`/`os`/
/// `device_type` fields. GeoIP enrichment is async ([`geoip::GeoIpEnricher::enrich`])
/// and called separately by the processor pipeline.
pub fn apply_ua_classification(event: &mut RequestEvent) {
    let classification = ua::classify(&event.user_agent);
    event.browser = classification.browser;
    event.browser_version = classification.browser_version;
    event.os = classification.os;
    event.os_version = classification.os_version;
    event.device_type = classification.device_type.as_str().to_string();
}
