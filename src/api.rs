// 🌐 REST API with Axum
//
// Thin HTTP surface over the reporting core. Handlers lock the shared
// connection only for the synchronous store call.

use crate::db;
use crate::entities::{
    Audit, AuditDetails, FalconDirection, FalconMessage, Field, Response, Solicitation, SparkId,
    StatusType,
};
use crate::error::{AuditError, Result};
use crate::search::{self, SearchCriteria, SearchRequest, DEFAULT_AUTOLOAD_SIZE};
use crate::statistics::{self, AggregateRow, Granularity};
use crate::store::Page;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::NaiveDateTime;
use log::{error, info, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub max_buckets: u64,
}

impl AppState {
    pub fn new(conn: Connection, max_buckets: u64) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            max_buckets,
        }
    }

    /// Run `f` with the shared connection. A panic in an earlier request
    /// only poisons the lock; the connection itself stays usable.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.db.lock().unwrap_or_else(|poisoned| {
            warn!("recovering connection lock poisoned by a failed request");
            PoisonError::into_inner(poisoned)
        });
        f(&conn)
    }
}

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>>;

impl AuditError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuditError::InvalidTimestamp(_) | AuditError::InvalidRange(_) => StatusCode::BAD_REQUEST,
            AuditError::NotFound(_) => StatusCode::NOT_FOUND,
            AuditError::UnsupportedFilterCombination(_) | AuditError::QueryExecution(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AuditError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("request failed: {}", self);
        } else {
            warn!("request rejected: {}", self);
        }

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct KeyParams {
    pub date: String,
    pub system: String,
    pub token: String,
}

impl KeyParams {
    fn id(&self) -> Result<SparkId> {
        SparkId::parse(&self.date, &self.system, &self.token)
    }
}

#[derive(Debug, Deserialize)]
pub struct AutoloadParams {
    pub size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsParams {
    pub interval: String,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// POST /api/auditlogs/search - Filtered, paginated audit trail
async fn search_audits(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Page<Audit>> {
    let criteria = SearchCriteria::from(request);
    let page = state.with_conn(|conn| search::search(conn, &criteria))?;
    Ok(ApiResponse::ok(page))
}

/// GET /api/auditlogs?date&system&token - One audit with stage durations
async fn get_audit(
    State(state): State<AppState>,
    Query(params): Query<KeyParams>,
) -> ApiResult<AuditDetails> {
    let id = params.id()?;
    let audit = state.with_conn(|conn| db::get_audit(conn, &id))?;
    Ok(ApiResponse::ok(AuditDetails::from(audit)))
}

/// GET /api/auditlogs/load-last-date?size - Newest day, oldest first
async fn load_last_date(
    State(state): State<AppState>,
    Query(params): Query<AutoloadParams>,
) -> ApiResult<Page<Audit>> {
    let size = params.size.unwrap_or(DEFAULT_AUTOLOAD_SIZE);
    let page = state.with_conn(|conn| search::load_last_day(conn, size))?;
    Ok(ApiResponse::ok(page))
}

/// GET /api/auditlogs/systems
async fn get_systems(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    Ok(ApiResponse::ok(state.with_conn(db::distinct_systems)?))
}

/// GET /api/auditlogs/status
async fn get_statuses(State(state): State<AppState>) -> ApiResult<Vec<i32>> {
    Ok(ApiResponse::ok(state.with_conn(db::distinct_statuses)?))
}

/// GET /api/auditlogs/tps
async fn get_transaction_times(State(state): State<AppState>) -> ApiResult<Vec<NaiveDateTime>> {
    Ok(ApiResponse::ok(state.with_conn(db::transaction_times)?))
}

async fn get_falcon_in(
    State(state): State<AppState>,
    Query(params): Query<KeyParams>,
) -> ApiResult<FalconMessage> {
    let id = params.id()?;
    let message = state.with_conn(|conn| db::get_falcon_message(conn, FalconDirection::In, &id))?;
    Ok(ApiResponse::ok(message))
}

async fn get_falcon_out(
    State(state): State<AppState>,
    Query(params): Query<KeyParams>,
) -> ApiResult<FalconMessage> {
    let id = params.id()?;
    let message =
        state.with_conn(|conn| db::get_falcon_message(conn, FalconDirection::Out, &id))?;
    Ok(ApiResponse::ok(message))
}

async fn get_response(
    State(state): State<AppState>,
    Query(params): Query<KeyParams>,
) -> ApiResult<Response> {
    let id = params.id()?;
    Ok(ApiResponse::ok(state.with_conn(|conn| db::get_response(conn, &id))?))
}

async fn get_solicitation(
    State(state): State<AppState>,
    Query(params): Query<KeyParams>,
) -> ApiResult<Solicitation> {
    let id = params.id()?;
    Ok(ApiResponse::ok(state.with_conn(|conn| db::get_solicitation(conn, &id))?))
}

/// GET /api/fields - Message layout, by position
async fn get_fields(State(state): State<AppState>) -> ApiResult<Vec<Field>> {
    Ok(ApiResponse::ok(state.with_conn(db::list_fields)?))
}

/// GET /api/status-type
async fn get_status_types(State(state): State<AppState>) -> ApiResult<Vec<StatusType>> {
    Ok(ApiResponse::ok(state.with_conn(db::list_status_types)?))
}

fn statistics_rows(state: &AppState, params: &StatisticsParams) -> Result<Vec<AggregateRow>> {
    let granularity = Granularity::parse(&params.interval);

    state.with_conn(|conn| {
        let Some((from, to)) = statistics::resolve_window(conn, params.from, params.to)? else {
            return Ok(Vec::new());
        };

        statistics::check_bucket_limit(from, to, granularity, state.max_buckets)?;
        statistics::aggregate(conn, from, to, granularity)
    })
}

/// GET /api/statistics?interval&from&to - One formatted line per row
async fn get_statistics(
    State(state): State<AppState>,
    Query(params): Query<StatisticsParams>,
) -> ApiResult<Vec<String>> {
    let rows = statistics_rows(&state, &params)?;
    Ok(ApiResponse::ok(rows.iter().map(AggregateRow::to_line).collect()))
}

/// GET /api/statistics/rows?interval&from&to - Structured rows
async fn get_statistics_rows(
    State(state): State<AppState>,
    Query(params): Query<StatisticsParams>,
) -> ApiResult<Vec<AggregateRow>> {
    Ok(ApiResponse::ok(statistics_rows(&state, &params)?))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/auditlogs", get(get_audit))
        .route("/auditlogs/search", post(search_audits))
        .route("/auditlogs/load-last-date", get(load_last_date))
        .route("/auditlogs/systems", get(get_systems))
        .route("/auditlogs/status", get(get_statuses))
        .route("/auditlogs/tps", get(get_transaction_times))
        .route("/falcon-in", get(get_falcon_in))
        .route("/falcon-out", get(get_falcon_out))
        .route("/response", get(get_response))
        .route("/solicitation", get(get_solicitation))
        .route("/fields", get(get_fields))
        .route("/status-type", get(get_status_types))
        .route("/statistics", get(get_statistics))
        .route("/statistics/rows", get(get_statistics_rows))
        .with_state(state);

    info!("API routes mounted under /api");

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_audits, insert_statistics, setup_database};
    use crate::entities::StatisticSample;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::NaiveDate;
    use tower::ServiceExt;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn app(max_buckets: u64) -> Router {
        router(app_state(max_buckets))
    }

    fn app_state(max_buckets: u64) -> AppState {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut clocked = Audit::new(at(9, 0, 0), "SYS1", "T0000001", Some(41), Some("1234567890123456789"));
        clocked.clock1 = Some(at(9, 0, 0));
        clocked.clock10 = Some(at(9, 0, 1));
        insert_audits(
            &conn,
            &[
                clocked,
                Audit::new(at(10, 0, 0), "SYS2", "T0000002", Some(2), Some("1234560000000000000")),
                Audit::new(at(11, 0, 0), "SYS1", "T0000003", Some(2), None),
            ],
        )
        .unwrap();
        insert_statistics(
            &conn,
            &[
                StatisticSample::new(at(11, 55, 0), "SRV1", 1, Some(3)),
                StatisticSample::new(at(12, 0, 0), "SRV1", 2, Some(4)),
            ],
        )
        .unwrap();

        AppState::new(conn, max_buckets)
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_search_with_legacy_field_names() {
        let (status, body) = call(
            app(1_000),
            post_json(
                "/api/auditlogs/search",
                serde_json::json!({
                    "page": 0,
                    "size": 10,
                    "date": "2024-03-01T00:00:00",
                    "sortAsc": true,
                    "system": "SYS1",
                    "status": -1,
                    "pan": "1234567",
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let tokens: Vec<&str> = body["data"]["content"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["token"].as_str().unwrap())
            .collect();
        assert_eq!(tokens, vec!["T0000001", "T0000003"]);
        assert_eq!(body["data"]["total_elements"], 2);
    }

    #[tokio::test]
    async fn test_audit_details_and_missing_key() {
        let (status, body) = call(
            app(1_000),
            get_req("/api/auditlogs?date=2024-03-01T09:00:00.000000&system=SYS1&token=T0000001"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_duration_ms"], 1000);

        let (status, body) = call(
            app(1_000),
            get_req("/api/auditlogs?date=2024-03-01T09:00:00.000000&system=SYS9&token=T0000001"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = call(
            app(1_000),
            get_req("/api/auditlogs?date=yesterday&system=SYS1&token=T0000001"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_load_last_date() {
        let (status, body) = call(app(1_000), get_req("/api/auditlogs/load-last-date?size=2")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["content"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["content"][0]["token"], "T0000001");
        assert_eq!(body["data"]["total_elements"], 3);
    }

    #[tokio::test]
    async fn test_statistics_default_window() {
        // newest sample at 12:00, so the window is 11:50 .. 12:00
        let (status, body) = call(app(1_000), get_req("/api/statistics?interval=minutes")).await;

        assert_eq!(status, StatusCode::OK);
        let lines = body["data"].as_array().unwrap();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "SRV1,2024-03-01 11:50:00,0,1,0");
        assert_eq!(lines[5], "SRV1,2024-03-01 11:55:00,3,1,1");
    }

    #[tokio::test]
    async fn test_statistics_bucket_limit() {
        let (status, body) = call(
            app(100),
            get_req("/api/statistics?interval=seconds&from=2024-03-01T11:00:00&to=2024-03-01T12:00:00"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("limit"));
    }

    #[tokio::test]
    async fn test_window_before_calendar_start_is_rejected() {
        let (status, body) = call(
            app(1_000),
            get_req("/api/statistics?interval=hours&to=-262143-01-01T00:00:00"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_poisoned_lock_keeps_serving() {
        let state = app_state(1_000);

        let holder = state.clone();
        let crashed = std::thread::spawn(move || {
            let _conn = holder.db.lock().unwrap();
            panic!("handler crashed while holding the connection");
        })
        .join();
        assert!(crashed.is_err());
        assert!(state.db.is_poisoned());

        let (status, body) = call(router(state.clone()), get_req("/api/auditlogs/systems")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], serde_json::json!(["SYS1", "SYS2"]));

        let (status, _) = call(router(state), get_req("/api/statistics?interval=minutes")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_listings() {
        let (_, body) = call(app(1_000), get_req("/api/auditlogs/systems")).await;
        assert_eq!(body["data"], serde_json::json!(["SYS1", "SYS2"]));

        let (_, body) = call(app(1_000), get_req("/api/auditlogs/status")).await;
        assert_eq!(body["data"], serde_json::json!([2, 41]));

        let (status, body) = call(app(1_000), get_req("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "OK");
    }
}
