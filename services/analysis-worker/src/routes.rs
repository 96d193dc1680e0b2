use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header, Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use sheetscan_models::{DocumentJob, FileStatus};
use sheetscan_storage::{GlobalKeywords, KeywordStore, WorkQueue};
use sheetscan_utils::{ErrorResponse, ServerConfig, SheetscanError};

use crate::metrics::Metrics;
use crate::pipeline::DocumentPipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DocumentPipeline>,
    pub keywords: Arc<KeywordStore>,
    pub metrics: Arc<Metrics>,
}

type ApiResult<T> = Result<(StatusCode, Json<T>), (StatusCode, Json<ErrorResponse>)>;

fn error_response(error: SheetscanError) -> (StatusCode, Json<ErrorResponse>) {
    let status = StatusCode::from_u16(error.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(error = %error, "Request failed");
    }
    (status, Json(ErrorResponse::from(error)))
}

pub fn create_app(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .nest("/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([Method::GET, Method::POST])
                        .allow_headers([header::CONTENT_TYPE]),
                )
                .layer(DefaultBodyLimit::max(server.max_request_size)),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/search-in-document", post(search_in_document))
        .route("/search-in-document/status", get(search_status))
        .route("/keywords", get(get_keywords).post(put_keywords))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let queue = match state.pipeline.queue().len().await {
        Ok(depth) => json!({"status": "healthy", "depth": depth}),
        Err(e) => json!({"status": "unhealthy", "message": e.to_string()}),
    };
    let healthy = queue["status"] == "healthy";

    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "service": "sheetscan-analysis-worker",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": { "queue": queue }
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.encode()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchAccepted {
    pub file_identifier: String,
    pub status: String,
}

/// POST /v1/search-in-document
async fn search_in_document(
    State(state): State<AppState>,
    Json(job): Json<DocumentJob>,
) -> ApiResult<SearchAccepted> {
    let file_identifier = state.pipeline.enqueue(job).await.map_err(error_response)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SearchAccepted {
            file_identifier,
            status: "queued".to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub file_identifier: String,
}

/// GET /v1/search-in-document/status?file_identifier=
async fn search_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<FileStatus> {
    let status = state
        .pipeline
        .status(&query.file_identifier)
        .await
        .map_err(error_response)?;

    let code = match status {
        FileStatus::InvalidIdentifier { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    Ok((code, Json(status)))
}

#[derive(Debug, Deserialize)]
pub struct KeywordsRequest {
    #[serde(default = "default_keywords_id")]
    pub id: String,
    pub keywords: Vec<String>,
}

fn default_keywords_id() -> String {
    "default".to_string()
}

async fn get_keywords(State(state): State<AppState>) -> ApiResult<GlobalKeywords> {
    let keywords = state.keywords.load_global().await.map_err(error_response)?;
    Ok((StatusCode::OK, Json(keywords)))
}

async fn put_keywords(
    State(state): State<AppState>,
    Json(request): Json<KeywordsRequest>,
) -> ApiResult<GlobalKeywords> {
    if request.keywords.iter().all(|k| k.trim().is_empty()) {
        return Err(error_response(SheetscanError::validation(
            "keywords",
            "At least one keyword is required",
        )));
    }
    let stored = state
        .keywords
        .store_global(request.id, request.keywords)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(stored)))
}
