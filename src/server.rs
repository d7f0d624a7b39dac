//! HTTP surface.
//!
//! Identity arrives in headers set by an upstream gateway that has already
//! authenticated the caller. This server trusts them and never authenticates
//! on its own.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/uploads` | Multipart upload (field `file`); ingestion runs in the background |
//! | `GET`  | `/uploads?limit=&before=` | Upload projections, newest first |
//! | `POST` | `/search` | Filtered contact search → `{ rows, total }` |
//! | `GET`  | `/search/history?page=&limit=` | Caller's audit entries |
//! | `GET`  | `/search/last` | Caller's last search on this device |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Headers
//!
//! `x-user-id` (required for search routes), `x-device-fingerprint`,
//! `x-forwarded-for`, `user-agent`, and `x-query-timeout-ms` to override the
//! row-path deadline of a single search.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "too_many_requests", "message": "daily search limit reached (50 of 50 used)" } }
//! ```
//!
//! Error codes: `bad_request` (400), `timeout` (408), `too_many_requests`
//! (429), `internal` (500).

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::StreamReader;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::analytics;
use crate::audit::HistoryPage;
use crate::config::Config;
use crate::db;
use crate::error::SearchError;
use crate::ingest::{AdmissionGate, IngestPipeline};
use crate::migrate;
use crate::models::Upload;
use crate::search::{Caller, LastSearch, SearchEngine, SearchOutcome};
use crate::upload::UploadTracker;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub pipeline: Arc<IngestPipeline>,
}

/// Builds the router. Exposed separately from [`run_server`] so tests can
/// drive it in-process.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/uploads",
            get(handle_list_uploads)
                .post(handle_upload)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/search", post(handle_search))
        .route("/search/history", get(handle_history))
        .route("/search/last", get(handle_last_search))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`.
///
/// Uploads left in `processing` by a previous process are marked failed
/// before the listener opens.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let tracker = UploadTracker::new(pool.clone());
    let recovered = tracker.recover_interrupted().await?;
    if recovered > 0 {
        tracing::warn!(count = recovered, "marked interrupted uploads as failed");
    }

    let stores = analytics::open(&config.analytics).await?;
    let engine = SearchEngine::new(stores.reader.clone(), pool, config.search.clone())?;
    let gate = AdmissionGate::new(config.ingest.max_concurrency);
    tracing::info!(capacity = gate.capacity(), "ingest admission gate ready");
    let pipeline = IngestPipeline::new(tracker, stores.sink.clone(), gate, config.ingest.clone());

    let app = router(AppState {
        engine: Arc::new(engine),
        pipeline: Arc::new(pipeline),
    });

    println!("leadvault listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        let status = match &err {
            SearchError::Validation(_) => StatusCode::BAD_REQUEST,
            SearchError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            SearchError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            SearchError::Backend(_) | SearchError::Store(_) => {
                tracing::error!(error = %err, "search failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Caller identity ============

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn caller_from(headers: &HeaderMap) -> Result<Caller, AppError> {
    let user_id = header_str(headers, "x-user-id");
    if user_id.is_empty() {
        return Err(bad_request("missing x-user-id header"));
    }
    let ip_address = header_str(headers, "x-forwarded-for")
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    Ok(Caller {
        user_id,
        device_fingerprint: header_str(headers, "x-device-fingerprint"),
        ip_address,
        user_agent: header_str(headers, "user-agent"),
    })
}

fn row_timeout_override(headers: &HeaderMap) -> Result<Option<Duration>, AppError> {
    let raw = header_str(headers, "x-query-timeout-ms");
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms))),
        _ => Err(bad_request(format!(
            "x-query-timeout-ms must be a positive integer, got '{}'",
            raw
        ))),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /uploads ============

#[derive(Serialize)]
struct UploadAccepted {
    upload_id: i64,
}

/// Accepts the first multipart field named `file`. Ingestion continues in
/// the background; poll `GET /uploads` for progress.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAccepted>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload.csv").to_string();
        let body = StreamReader::new(field.map_err(io::Error::other));
        tokio::pin!(body);

        let submission = state
            .pipeline
            .submit_upload(body, &filename)
            .await
            .map_err(|e| internal(format!("{:#}", e)))?;

        return Ok((
            StatusCode::ACCEPTED,
            Json(UploadAccepted {
                upload_id: submission.upload_id,
            }),
        ));
    }

    Err(bad_request("multipart field 'file' is required"))
}

// ============ GET /uploads ============

#[derive(Deserialize)]
struct ListUploadsParams {
    limit: Option<i64>,
    before: Option<i64>,
}

#[derive(Serialize)]
struct ListUploadsResponse {
    uploads: Vec<Upload>,
}

async fn handle_list_uploads(
    State(state): State<AppState>,
    Query(params): Query<ListUploadsParams>,
) -> Result<Json<ListUploadsResponse>, AppError> {
    let uploads = state
        .pipeline
        .tracker()
        .list(params.limit.unwrap_or(crate::upload::MAX_LIST_LIMIT), params.before)
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;
    Ok(Json(ListUploadsResponse { uploads }))
}

// ============ POST /search ============

async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<SearchOutcome>, AppError> {
    let caller = caller_from(&headers)?;
    let row_timeout = row_timeout_override(&headers)?;
    let outcome = state
        .engine
        .search_json(&caller, &body, row_timeout)
        .await?;
    Ok(Json(outcome))
}

// ============ GET /search/history ============

#[derive(Deserialize)]
struct HistoryParams {
    page: Option<i64>,
    limit: Option<i64>,
}

async fn handle_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>, AppError> {
    let caller = caller_from(&headers)?;
    let page = state
        .engine
        .history(
            &caller.user_id,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(crate::audit::DEFAULT_HISTORY_LIMIT),
        )
        .await?;
    Ok(Json(page))
}

// ============ GET /search/last ============

async fn handle_last_search(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LastSearch>, AppError> {
    let caller = caller_from(&headers)?;
    let last = state
        .engine
        .last_search(&caller.user_id, &caller.device_fingerprint)
        .await?;
    Ok(Json(last))
}
