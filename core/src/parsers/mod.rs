//! Parser set: pure functions mapping one raw log line to a canonical
//! [`RequestEvent`](crate::model::RequestEvent), per proxy family.

mod caddy;
mod traefik;

use std::collections::HashMap;
use std::sync::Arc;

pub use caddy::CaddyParser;
use thiserror::Error;
pub use traefik::TraefikParser;

use crate::model::RequestEvent;

/// A single-line parse failure. Never fatal: the owning source logs it at
/// `warn` with a truncated preview and moves on to the next line.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed {parser}: {reason}")]
    Malformed { parser: &'static str, reason: String },

    #[error("missing required field {field} for {parser}")]
    MissingField { parser: &'static str, field: &'static str },
}

/// One proxy-family parser. Implementations must be deterministic, perform
/// no I/O, and never block.
pub trait Parser: Send + Sync {
    /// Stable identifier, also the `parser_type` stored on [`crate::model::LogSource`].
    fn name(&self) -> &'static str;

    /// Cheap prefix/shape check deciding whether [`Self::parse`] should be
    /// attempted at all. Lines failing this are silently skipped — they are
    /// not even logged, since `can_parse` is expected to reject a large
    /// fraction of foreign log formats during discovery probing.
    fn can_parse(&self, line: &str) -> bool;

    /// Parse one line into a canonical event. `source_name` is stamped onto
    /// the result; `now` lets parsers fall back to wall-clock time when a
    /// line carries no timestamp of its own (none of the two built-in
    /// parsers need this, but it keeps the trait extensible).
    fn parse(&self, line: &str, source_name: &str) -> Result<RequestEvent, ParseError>;
}

/// `parser_type → Parser` registry. Unknown types are a startup
/// [`crate::error::ConfigError`], raised by the caller that looks the
/// source's configured type up here.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: HashMap<&'static str, Arc<dyn Parser>>,
}

impl ParserRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(TraefikParser));
        registry.register(Arc::new(CaddyParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn Parser>) {
        self.parsers.insert(parser.name(), parser);
    }

    #[must_use]
    pub fn get(&self, parser_type: &str) -> Option<&dyn Parser> {
        self.parsers.get(parser_type).map(AsRef::as_ref)
    }

    /// An owned handle to the parser, for callers (the source processor)
    /// that must hold it across an `await` boundary inside a spawned task.
    #[must_use]
    pub fn get_arc(&self, parser_type: &str) -> Option<Arc<dyn Parser>> {
        self.parsers.get(parser_type).cloned()
    }

    #[must_use]
    pub fn all(&self) -> impl Iterator<Item = &dyn Parser> {
        self.parsers.values().map(AsRef::as_ref)
    }
}

/// Truncate a raw line for inclusion in a warn-level log message, so a
/// multi-kilobyte request never floods the log.
#[must_use]
pub fn truncated_preview(line: &str) -> String {
    const MAX: usize = 200;
    if line.len() <= MAX {
        return line.to_string();
    }
    let mut end = MAX;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &line[..end])
}
