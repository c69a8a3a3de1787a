//! Read-only HTTP API over the snapshot store and the drift engine.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::drift::{DiffRequest, DriftEngine, DriftError};
use crate::storage::{SnapshotReader, StorageAdmin, StorageError};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub reader: SnapshotReader,
    pub admin: StorageAdmin,
    pub drift: DriftEngine,
}

impl AppState {
    pub fn new(reader: SnapshotReader, admin: StorageAdmin) -> Self {
        Self {
            drift: DriftEngine::new(reader.clone()),
            reader,
            admin,
        }
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

/// Query parameters for the diff endpoint; both lists are comma separated.
#[derive(Debug, Deserialize)]
pub struct DiffQueryParams {
    pub key: Option<String>,
    pub columns: Option<String>,
}

/// Split `a, b,,c` into `["a", "b", "c"]`.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Errors
// =============================================================================

/// Error rendered as `{"error": "..."}` with a mapped status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::TableNotFound(_) => StatusCode::NOT_FOUND,
            StorageError::InvalidIdentifier(_) | StorageError::ReservedColumn(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<DriftError> for ApiError {
    fn from(err: DriftError) -> Self {
        match err {
            DriftError::Storage(e) => e.into(),
            DriftError::EmptyResourceKey { .. } | DriftError::UnknownColumn { .. } => {
                Self::bad_request(err.to_string())
            }
            DriftError::DuplicateResourceKey { .. } => Self {
                status: StatusCode::CONFLICT,
                message: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

// =============================================================================
// Router
// =============================================================================

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/api/tables", get(tables_handler))
        .route("/api/tables/{table}/schema", get(schema_handler))
        .route("/api/tables/{table}/generations", get(generations_handler))
        .route("/api/tables/{table}/diff", get(diff_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
    })
}

/// Readiness probe; pings the writer actor.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.admin.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
            db: Some("ready".to_string()),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    db: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

async fn tables_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    Ok(Json(state.reader.list_tables()?).into_response())
}

async fn schema_handler(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
) -> Result<Response, ApiError> {
    let columns = state.reader.read_schema(&table)?;
    Ok(Json(serde_json::json!({ "table": table, "columns": columns })).into_response())
}

async fn generations_handler(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
) -> Result<Response, ApiError> {
    Ok(Json(state.reader.list_generations(&table)?).into_response())
}

/// Drift report of the two newest generations.
async fn diff_handler(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Query(params): Query<DiffQueryParams>,
) -> Result<Response, ApiError> {
    let key = params.key.as_deref().map(split_list).unwrap_or_default();
    if key.is_empty() {
        return Err(ApiError::bad_request("query parameter 'key' is required"));
    }

    let mut request = DiffRequest::new(table, key);
    if let Some(columns) = params.columns.as_deref() {
        request = request.with_columns(split_list(columns));
    }
    Ok(Json(state.drift.diff_with(&request)?).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("pool, member,,"), vec!["pool", "member"]);
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_drift_error_status() {
        let err: ApiError = DriftError::Storage(StorageError::TableNotFound("x".into())).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ApiError = DriftError::UnknownColumn {
            table: "x".into(),
            column: "y".into(),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = DriftError::DuplicateResourceKey {
            table: "x".into(),
            key: vec![],
            timestamp: chrono::Utc::now(),
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }
}
