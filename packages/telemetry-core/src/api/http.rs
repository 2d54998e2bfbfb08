//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the bridge components.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header::CONTENT_TYPE, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::api::response::{api_error, api_success};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::broker::Readiness;
use crate::error::{BridgeError, BridgeResult, ErrorCode};
use crate::protocol_constants::{DEFAULT_QUERY_WINDOW_HOURS, SERVICE_ID};
use crate::state::StoreConfig;
use crate::store::{build_series, resolve_field, SeriesStats, TimeRange};

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /api/publish`. Both fields are checked by the gateway.
#[derive(Deserialize)]
struct PublishRequest {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    message: Option<Value>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    identifier: Option<String>,
    start: Option<String>,
    end: Option<String>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct SeriesQuery {
    field: Option<String>,
    identifier: Option<String>,
    hours: Option<i64>,
    limit: Option<usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/publish", post(handle_publish))
        .route("/api/telemetry", get(query_history))
        .route("/api/telemetry/series", get(query_series))
        .route("/ws", get(ws_handler))
        .layer(cors_layer())
        .with_state(state)
}

/// Browser dashboards are served from other origins.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
}

// ─────────────────────────────────────────────────────────────────────────────
// Probes
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe: always 200 while the process is serving.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "connection": state.connection.state(),
        "subscribers": state.broadcaster.subscriber_count(),
        "wsConnections": state.ws_manager.connection_count(),
        "storedRecords": state.store.len().await,
        "pipeline": state.pipeline.stats(),
    }))
}

/// Readiness probe: 200 only once the broker session has been established
/// and is currently live.
async fn readiness_check(State(state): State<AppState>) -> Response {
    let connection = state.connection.state();
    let (ready, reason) = match state.connection.readiness().current() {
        Readiness::Ready if state.connection.is_connected() => (true, None),
        Readiness::Ready => (false, Some(format!("broker session {}", connection))),
        Readiness::Pending => (false, Some("waiting for first broker connection".to_string())),
        Readiness::Failed(reason) => (false, Some(reason)),
    };

    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "ready": ready,
        "connection": connection,
        "reason": reason,
    });

    if ready {
        api_success(body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Publish
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_publish(
    State(state): State<AppState>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> BridgeResult<impl IntoResponse> {
    let Json(request) = body.map_err(|e| BridgeError::InvalidRequest(e.body_text()))?;

    let (topic, payload) = state
        .gateway
        .submit(request.topic, request.message)
        .await
        .into_result()?;

    Ok(api_success(json!({
        "message": "Message published",
        "topic": topic,
        "payload": payload,
    })))
}

// ─────────────────────────────────────────────────────────────────────────────
// History
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/telemetry
///
/// Records in a time window, oldest first. Without an identifier the window
/// spans every device.
async fn query_history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return BridgeError::InvalidRequest(e.body_text()).into_response(),
    };
    let range = match resolve_window(query.start.as_deref(), query.end.as_deref(), Utc::now()) {
        Ok(range) => range,
        Err(e) => return e.into_response(),
    };
    let limit = effective_limit(query.limit, &state.config.store);

    let result = match query.identifier.as_deref().filter(|id| !id.is_empty()) {
        Some(identifier) => state.store.query(identifier, range, limit).await,
        None => state.store.scan(range, limit).await,
    };

    match result {
        Ok(records) => api_success(json!({
            "identifier": query.identifier,
            "start": range.start,
            "end": range.end,
            "count": records.len(),
            "records": records,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.code(), e).into_response(),
    }
}

/// GET /api/telemetry/series
///
/// Chart points for one field over the last `hours`.
async fn query_series(
    State(state): State<AppState>,
    query: Result<Query<SeriesQuery>, QueryRejection>,
) -> BridgeResult<impl IntoResponse> {
    let Query(query) = query.map_err(|e| BridgeError::InvalidRequest(e.body_text()))?;

    let field = query
        .field
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| BridgeError::InvalidRequest("field is required".into()))?;
    let hours = query.hours.unwrap_or(DEFAULT_QUERY_WINDOW_HOURS);
    if hours <= 0 {
        return Err(BridgeError::InvalidRequest("hours must be positive".into()));
    }
    let range = TimeRange::last_hours(Utc::now(), hours);
    let limit = effective_limit(query.limit, &state.config.store);

    let records = match query.identifier.as_deref().filter(|id| !id.is_empty()) {
        Some(identifier) => state.store.query(identifier, range, limit).await?,
        None => state.store.scan(range, limit).await?,
    };
    let points = build_series(&records, &field);
    let stats = SeriesStats::of(&points);
    let resolved = resolve_field(&field).to_string();

    Ok(api_success(json!({
        "field": field,
        "resolvedField": resolved,
        "hours": hours,
        "points": points,
        "stats": stats,
    })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Query Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves optional RFC 3339 bounds: `end` defaults to `now`, `start` to
/// the default look-back window before `end`.
fn resolve_window(start: Option<&str>, end: Option<&str>, now: DateTime<Utc>) -> BridgeResult<TimeRange> {
    let end = match end {
        Some(s) => parse_bound("end", s)?,
        None => now,
    };
    match start {
        Some(s) => Ok(TimeRange::new(parse_bound("start", s)?, end)?),
        None => Ok(TimeRange::last_hours(end, DEFAULT_QUERY_WINDOW_HOURS)),
    }
}

fn parse_bound(name: &str, value: &str) -> BridgeResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BridgeError::InvalidRequest(format!("{} is not an RFC 3339 time: {}", name, e)))
}

fn effective_limit(requested: Option<usize>, config: &StoreConfig) -> usize {
    requested
        .unwrap_or(config.default_query_limit)
        .clamp(1, config.max_query_limit.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    mod window {
        use super::*;

        #[test]
        fn defaults_to_last_six_hours() {
            let range = resolve_window(None, None, now()).unwrap();
            assert_eq!(range.end, now());
            assert_eq!(range.start, now() - Duration::hours(6));
        }

        #[test]
        fn explicit_bounds_are_parsed() {
            let range = resolve_window(
                Some("2024-06-01T10:00:00Z"),
                Some("2024-06-01T11:00:00+00:00"),
                now(),
            )
            .unwrap();
            assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
            assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap());
        }

        #[test]
        fn start_alone_runs_until_now() {
            let range = resolve_window(Some("2024-06-01T00:00:00Z"), None, now()).unwrap();
            assert_eq!(range.end, now());
        }

        #[test]
        fn inverted_bounds_are_invalid_request() {
            let err = resolve_window(
                Some("2024-06-01T11:00:00Z"),
                Some("2024-06-01T10:00:00Z"),
                now(),
            )
            .unwrap_err();
            assert_eq!(err.code(), "invalid_request");
        }

        #[test]
        fn malformed_bound_is_invalid_request() {
            let err = resolve_window(Some("yesterday"), None, now()).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    mod limits {
        use super::*;

        #[test]
        fn missing_limit_uses_default() {
            assert_eq!(effective_limit(None, &StoreConfig::default()), 300);
        }

        #[test]
        fn limit_is_clamped_to_configured_range() {
            let config = StoreConfig::default();
            assert_eq!(effective_limit(Some(50), &config), 50);
            assert_eq!(effective_limit(Some(0), &config), 1);
            assert_eq!(effective_limit(Some(1_000_000), &config), 5000);
        }
    }
}
