//! User-Agent classifier.
//!
//! Pure function, ordered regex probes: bot signatures take precedence over
//! everything else, then browser patterns (Edge before Chrome, Safari
//! before Firefox so a Safari-shaped UA isn't misread), then OS patterns.
//! Device type is `mobile` if any mobile pattern matches, `bot` if a bot
//! pattern matched (short-circuiting browser/OS detection), else `desktop`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::DeviceType;

/// Result of classifying one User-Agent string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
    pub device_type: DeviceType,
}

impl Classification {
    fn unknown() -> Self {
        Self {
            browser: "Unknown".into(),
            browser_version: "Unknown".into(),
            os: "Unknown".into(),
            os_version: "unknown".into(),
            device_type: DeviceType::Unknown,
        }
    }
}

static GENERIC_BOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bot|crawler|spider|scraper|curl|wget|python|go-http").unwrap());
static GOOGLEBOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)googlebot").unwrap());
static BINGBOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)bingbot").unwrap());

static EDGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Edg(?:e|A|iOS)?/([\d.]+)").unwrap());
static CHROME: Lazy<Regex> = Lazy::new(|| Regex::new(r"Chrome/([\d.]+)").unwrap());
static SAFARI: Lazy<Regex> = Lazy::new(|| Regex::new(r"Version/([\d.]+).*Safari").unwrap());
static FIREFOX: Lazy<Regex> = Lazy::new(|| Regex::new(r"Firefox/([\d.]+)").unwrap());

static WINDOWS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Windows NT ([\d.]+)").unwrap());
static MAC_OS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Mac OS X ([\d_.]+)").unwrap());
static ANDROID: Lazy<Regex> = Lazy::new(|| Regex::new(r"Android ([\d.]+)").unwrap());
static IOS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:iPhone|iPad)(?:.*)OS ([\d_]+)").unwrap());
static LINUX: Lazy<Regex> = Lazy::new(|| Regex::new(r"Linux").unwrap());

static MOBILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Mobile|Android|iPhone|Windows Phone").unwrap());
static TABLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)iPad|Tablet").unwrap());

fn capture1(re: &Regex, ua: &str) -> Option<String> {
    re.captures(ua).and_then(|c| c.get(1)).map(|m| m.as_str().replace('_', "."))
}

/// Classify a User-Agent header value. Empty input maps to
/// `(Unknown, Unknown, unknown)` with `device_type = unknown`.
#[must_use]
pub fn classify(ua: &str) -> Classification {
    if ua.is_empty() {
        return Classification::unknown();
    }

    if GOOGLEBOT.is_match(ua) {
        return Classification {
            browser: "Googlebot".into(),
            browser_version: "Unknown".into(),
            os: "Bot".into(),
            os_version: "unknown".into(),
            device_type: DeviceType::Bot,
        };
    }
    if BINGBOT.is_match(ua) {
        return Classification {
            browser: "Bingbot".into(),
            browser_version: "Unknown".into(),
            os: "Bot".into(),
            os_version: "unknown".into(),
            device_type: DeviceType::Bot,
        };
    }
    if GENERIC_BOT.is_match(ua) {
        return Classification {
            browser: "Bot".into(),
            browser_version: "Unknown".into(),
            os: "Bot".into(),
            os_version: "unknown".into(),
            device_type: DeviceType::Bot,
        };
    }

    let (browser, browser_version) = if let Some(v) = capture1(&EDGE, ua) {
        ("Edge".to_string(), v)
    } else if let Some(v) = capture1(&CHROME, ua) {
        ("Chrome".to_string(), v)
    } else if let Some(v) = capture1(&SAFARI, ua) {
        ("Safari".to_string(), v)
    } else if let Some(v) = capture1(&FIREFOX, ua) {
        ("Firefox".to_string(), v)
    } else {
        ("Unknown".to_string(), "Unknown".to_string())
    };

    let (os, os_version) = if let Some(v) = capture1(&WINDOWS, ua) {
        ("Windows".to_string(), v)
    } else if let Some(v) = capture1(&MAC_OS, ua) {
        ("macOS".to_string(), v)
    } else if let Some(v) = capture1(&ANDROID, ua) {
        ("Android".to_string(), v)
    } else if let Some(v) = capture1(&IOS, ua) {
        ("iOS".to_string(), v)
    } else if LINUX.is_match(ua) {
        ("Linux".to_string(), "unknown".to_string())
    } else {
        ("Unknown".to_string(), "unknown".to_string())
    };

    let device_type = if TABLET.is_match(ua) {
        DeviceType::Tablet
    } else if MOBILE.is_match(ua) {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    };

    Classification {
        browser,
        browser_version,
        os,
        os_version,
        device_type,
    }
}
