//! HTTP API under `/api/v1.0`
//!
//! Every route requires the configured secret verbatim in the
//! `Authorization` header.

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header::AUTHORIZATION, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use scouter_common::{Batch, JobRecord, ScouterError, ServiceConfig, VERSION};
use scouter_dispatcher::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    api_secret: Arc<str>,
    max_process_count: usize,
    started: Instant,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &ServiceConfig) -> Self {
        Self {
            dispatcher,
            api_secret: Arc::from(config.api_secret.as_str()),
            max_process_count: config.max_process_count,
            started: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/tests", post(submit_tests).get(get_tests).delete(delete_tests))
        .route("/status", get(status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_secret))
        .with_state(state);
    Router::new().nest("/api/v1.0", api)
}

/// JSON `{"error": ...}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<ScouterError>() {
            Some(e) if matches!(e, ScouterError::NotFound(_)) => {
                Self::new(StatusCode::NOT_FOUND, e.to_string())
            }
            Some(e) if e.is_batch_error() => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
            _ => {
                error!("request failed: {err:#}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
            }
        }
    }
}

impl From<ScouterError> for ApiError {
    fn from(err: ScouterError) -> Self {
        anyhow::Error::from(err).into()
    }
}

async fn require_secret(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if presented != Some(&*state.api_secret) {
        debug!(path = %request.uri().path(), "rejected unauthorized request");
        return ApiError::new(StatusCode::FORBIDDEN, "Invalid or missing authorization.")
            .into_response();
    }
    next.run(request).await
}

#[derive(Debug, Deserialize)]
struct ReceiptQuery {
    receipt: Option<String>,
}

impl ReceiptQuery {
    fn receipt(&self) -> Result<&str, ApiError> {
        self.receipt
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "Required parameter 'receipt' was not given.",
                )
            })
    }
}

#[derive(Debug, Serialize)]
struct ReceiptBody {
    receipt: String,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    version: &'static str,
    uptime_secs: u64,
    jobs_submitted: u64,
    max_process_count: usize,
}

async fn submit_tests(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ReceiptBody>, ApiError> {
    let batch: Batch = serde_json::from_slice(&body).map_err(|e| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Unable to parse the provided tests: {e}"),
        )
    })?;
    let receipt = state.dispatcher.submit(batch).await?;
    Ok(Json(ReceiptBody {
        receipt: receipt.to_string(),
    }))
}

async fn get_tests(
    State(state): State<AppState>,
    Query(query): Query<ReceiptQuery>,
) -> Result<Json<JobRecord>, ApiError> {
    let record = state.dispatcher.status(query.receipt()?).await?;
    Ok(Json(record))
}

async fn delete_tests(
    State(state): State<AppState>,
    Query(query): Query<ReceiptQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let receipt = query.receipt()?;
    if !state.dispatcher.delete(receipt).await? {
        return Err(ScouterError::NotFound(receipt.to_string()).into());
    }
    Ok(Json(json!({
        "message": format!("Receipt '{receipt}' was deleted.")
    })))
}

async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    Json(StatusBody {
        version: VERSION,
        uptime_secs: state.started.elapsed().as_secs(),
        jobs_submitted: state.dispatcher.jobs_submitted(),
        max_process_count: state.max_process_count,
    })
}
