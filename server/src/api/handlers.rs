//! Route handlers: health check, live snapshot, and stats summary.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use logwatch_core::filters::{ServiceFilter, ServiceFilterKind};
use logwatch_core::stats::StatsError;

use super::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Stats(#[from] StatsError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Stats(StatsError::Deadline(_)) => (StatusCode::GATEWAY_TIMEOUT, "DEADLINE_EXCEEDED"),
            Self::Stats(StatsError::Database(err)) => {
                tracing::error!(error = %err, "stats query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        (status, Json(json!({ "error": code, "message": self.to_string() }))).into_response()
    }
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(err) => {
            tracing::error!(error = %err, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unavailable" })))
        }
    }
}

pub async fn live_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    match state.live.get_metrics() {
        Some(json) => (StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "application/json")], json),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            json!({ "error": "no snapshot collected yet" }).to_string(),
        ),
    }
}

/// Query params accepted by `/api/stats/summary`.
///
/// `service` may repeat; each value is parsed as `kind:value` (`kind` one
/// of `backend_name`, `backend_url`, `host`) or, with no `kind:` prefix,
/// treated as [`ServiceFilterKind::Auto`].
#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    #[serde(default = "default_hours")]
    pub hours: i64,
    #[serde(default)]
    pub service: Vec<String>,
    pub exclude_ip: Option<String>,
}

const fn default_hours() -> i64 {
    24
}

fn parse_service_filter(raw: &str) -> ServiceFilter {
    match raw.split_once(':') {
        Some(("backend_name", value)) => ServiceFilter { kind: ServiceFilterKind::BackendName, value: value.to_string() },
        Some(("backend_url", value)) => ServiceFilter { kind: ServiceFilterKind::BackendUrl, value: value.to_string() },
        Some(("host", value)) => ServiceFilter { kind: ServiceFilterKind::Host, value: value.to_string() },
        _ => ServiceFilter { kind: ServiceFilterKind::Auto, value: raw.to_string() },
    }
}

pub async fn stats_summary(
    State(state): State<AppState>,
    Query(params): Query<SummaryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filters: Vec<ServiceFilter> = params.service.iter().map(|s| parse_service_filter(s)).collect();
    let summary = state.stats.summary(params.hours, &filters, params.exclude_ip.as_deref()).await?;
    Ok(Json(summary))
}
