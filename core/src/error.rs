//! Cross-cutting error types.
//!
//! Component-scoped errors (`ParseError`, `ReadError`, `WriteError`, ...)
//! live beside the component that raises them, following the same
//! per-module convention as the rest of this crate. This module holds only
//! the errors that cut across components: a query/collect deadline being
//! exceeded, and a fatal startup configuration problem.

use thiserror::Error;

/// A query or `collect()` pass exceeded its time budget (30s for analytics
/// queries, 5s for live-metrics recomputation). Surfaced verbatim to the
/// caller; never silently truncated to a partial result.
#[derive(Debug, Error)]
#[error("deadline exceeded after {elapsed_ms}ms (budget {budget_ms}ms)")]
pub struct DeadlineExceeded {
    pub elapsed_ms: u64,
    pub budget_ms: u64,
}

/// Invalid configuration discovered at startup: unknown parser type for a
/// registered source, or a required field missing. Fatal before the
/// coordinator reports ready.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown parser type: {0}")]
    UnknownParserType(String),

    #[error("missing required configuration: {0}")]
    MissingField(String),

    #[error("invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// Storage could not be opened at all (permission denied, corrupt file).
/// Aborts startup; distinct from a per-batch [`crate::db::writer::WriteError`].
#[derive(Debug, Error)]
pub enum FatalStorageError {
    #[error("cannot open storage at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
