//! Service-identification and exclude-IP filter semantics shared by the
//! live-metrics collector and the stats/query repository, so the two
//! agree on what "this request belongs to service X" means.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFilterKind {
    BackendName,
    BackendUrl,
    Host,
    /// Resolves in priority order `backend_name → backend_url → host`.
    Auto,
}

#[derive(Debug, Clone)]
pub struct ServiceFilter {
    pub kind: ServiceFilterKind,
    pub value: String,
}

/// Minimal view over a request's service-identifying fields, implemented
/// by both the persisted [`crate::model::RequestEvent`] and the
/// in-memory live sample.
pub trait ServiceIdentified {
    fn backend_name(&self) -> &str;
    fn backend_url(&self) -> &str;
    fn host(&self) -> &str;
    fn client_ip(&self) -> &str;
}

fn matches_one(event: &impl ServiceIdentified, filter: &ServiceFilter) -> bool {
    match filter.kind {
        ServiceFilterKind::BackendName => event.backend_name() == filter.value,
        ServiceFilterKind::BackendUrl => event.backend_url() == filter.value,
        ServiceFilterKind::Host => event.host() == filter.value,
        ServiceFilterKind::Auto => {
            event.backend_name() == filter.value
                || (event.backend_name().is_empty() && event.backend_url() == filter.value)
                || (event.backend_name().is_empty() && event.backend_url().is_empty() && event.host() == filter.value)
        }
    }
}

/// Multiple service filters are OR-combined; an empty filter set matches
/// everything.
#[must_use]
pub fn matches_service(event: &impl ServiceIdentified, filters: &[ServiceFilter]) -> bool {
    filters.is_empty() || filters.iter().any(|f| matches_one(event, f))
}

/// Exclude-IP semantics: without services, `client_ip != X`; with
/// services, `NOT (client_ip = X AND service-match)`.
#[must_use]
pub fn passes_exclude_ip(event: &impl ServiceIdentified, exclude_ip: Option<&str>, filters: &[ServiceFilter]) -> bool {
    let Some(ip) = exclude_ip else { return true };
    if filters.is_empty() {
        event.client_ip() != ip
    } else {
        !(event.client_ip() == ip && matches_service(event, filters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        backend_name: &'static str,
        backend_url: &'static str,
        host: &'static str,
        client_ip: &'static str,
    }

    impl ServiceIdentified for Fake {
        fn backend_name(&self) -> &str {
            self.backend_name
        }
        fn backend_url(&self) -> &str {
            self.backend_url
        }
        fn host(&self) -> &str {
            self.host
        }
        fn client_ip(&self) -> &str {
            self.client_ip
        }
    }

    #[test]
    fn auto_resolves_in_priority_order() {
        let by_backend = Fake { backend_name: "api", backend_url: "", host: "", client_ip: "" };
        let filter = ServiceFilter { kind: ServiceFilterKind::Auto, value: "api".into() };
        assert!(matches_service(&by_backend, &[filter]));

        let by_host = Fake { backend_name: "", backend_url: "", host: "example.com", client_ip: "" };
        let filter = ServiceFilter { kind: ServiceFilterKind::Auto, value: "example.com".into() };
        assert!(matches_service(&by_host, &[filter]));
    }

    #[test]
    fn auto_does_not_fall_through_when_backend_name_present_but_different() {
        let event = Fake { backend_name: "other", backend_url: "", host: "example.com", client_ip: "" };
        let filter = ServiceFilter { kind: ServiceFilterKind::Auto, value: "example.com".into() };
        assert!(!matches_service(&event, &[filter]));
    }

    #[test]
    fn empty_filters_match_everything() {
        let event = Fake { backend_name: "x", backend_url: "", host: "", client_ip: "" };
        assert!(matches_service(&event, &[]));
    }

    #[test]
    fn exclude_ip_without_services() {
        let event = Fake { backend_name: "", backend_url: "", host: "", client_ip: "1.2.3.4" };
        assert!(!passes_exclude_ip(&event, Some("1.2.3.4"), &[]));
        assert!(passes_exclude_ip(&event, Some("5.6.7.8"), &[]));
    }

    #[test]
    fn exclude_ip_scoped_to_service() {
        let event = Fake { backend_name: "api", backend_url: "", host: "", client_ip: "1.2.3.4" };
        let filter = ServiceFilter { kind: ServiceFilterKind::BackendName, value: "api".into() };
        assert!(!passes_exclude_ip(&event, Some("1.2.3.4"), &[filter]));

        let other = Fake { backend_name: "web", backend_url: "", host: "", client_ip: "1.2.3.4" };
        let filter = ServiceFilter { kind: ServiceFilterKind::BackendName, value: "api".into() };
        assert!(passes_exclude_ip(&other, Some("1.2.3.4"), &[filter]));
    }
}
