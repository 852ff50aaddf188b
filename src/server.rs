//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/analyze` | Run the pipeline and return the spec as JSON |
//! | `GET`  | `/analyze/stream?repo=&depth=&refresh=` | Run the pipeline as a server-sent event stream |
//! | `POST` | `/analyze/stream` | Same, with a JSON body |
//! | `GET`  | `/spec/{shareId}` | Fetch a shared spec (counts a view) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "success": false, "error": "Repository not found. Make sure it exists and is public.", "errorCode": "REPO_NOT_FOUND" }
//! ```
//!
//! Status codes follow the error kind: `INVALID_URL` 400,
//! `REPO_NOT_FOUND` 404, `RATE_LIMITED` 429, everything else 500.
//!
//! # Streaming
//!
//! Stream responses use `text/event-stream` framing
//! (`event: <name>\ndata: <json>\n\n`). Errors after the stream has started
//! arrive as an `error` event, never as an HTTP status.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front ends
//! on other origins can call the API.

use axum::{
    body::{Body, Bytes},
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use repospec_core::error::{ErrorKind, PipelineError};
use repospec_core::models::{AnalysisDepth, AnalysisOptions, GeneratedSpec, SpecMetadata};
use repospec_core::ProtocolEvent;

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::progress::NoProgress;
use crate::stream::{self, StreamRequest};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Starts the HTTP server with the production pipeline.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    run_server_with_pipeline(&config.server.bind, pipeline).await
}

/// Starts the HTTP server around an already-built [`Pipeline`].
///
/// Used by tests and embedders that supply their own backends.
pub async fn run_server_with_pipeline(bind_addr: &str, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let app = router(pipeline);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "repospec server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// The route table with CORS applied.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/analyze", post(handle_analyze))
        .route(
            "/analyze/stream",
            get(handle_stream_query).post(handle_stream_body),
        )
        .route("/spec/{share_id}", get(handle_get_spec))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { pipeline })
}

// ============ Error response ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<ErrorKind>,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    message: String,
    code: Option<ErrorKind>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = StatusCode::from_u16(err.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        AppError {
            status,
            message: err.public_message(),
            code: Some(err.kind),
        }
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        message: message.into(),
        code: None,
    }
}

// ============ Requests ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    #[serde(default)]
    repo_url: Option<String>,
    #[serde(default)]
    options: AnalysisOptions,
    /// Owner recorded on the stored spec. Authentication is handled in
    /// front of this service.
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct StreamQuery {
    repo: Option<String>,
    depth: Option<AnalysisDepth>,
    #[serde(default)]
    refresh: bool,
}

fn missing_repo() -> PipelineError {
    PipelineError::new(ErrorKind::InvalidUrl, "Repository URL is required")
}

fn non_empty(input: Option<String>) -> Option<String> {
    input.filter(|s| !s.trim().is_empty())
}

// ============ POST /analyze ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    success: bool,
    spec_id: String,
    spec: GeneratedSpec,
    share_url: String,
    cached: bool,
}

async fn handle_analyze(
    State(state): State<AppState>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let Json(req) = body.map_err(|e| {
        AppError::from(PipelineError::new(
            ErrorKind::InvalidUrl,
            format!("invalid request body: {}", e.body_text()),
        ))
    })?;
    let input = non_empty(req.repo_url).ok_or_else(missing_repo)?;

    let outcome = state
        .pipeline
        .analyze(&input, &req.options, req.user_id.as_deref(), &NoProgress)
        .await?;

    let share_url = state.pipeline.share_url(&outcome.stored.share_id);
    Ok(Json(AnalyzeResponse {
        success: true,
        spec_id: outcome.stored.share_id.clone(),
        spec: outcome.stored.to_generated(),
        share_url,
        cached: outcome.cached,
    }))
}

// ============ /analyze/stream ============

/// Wrap an event channel in an SSE response.
fn sse_response(mut events: mpsc::Receiver<ProtocolEvent>) -> Response {
    let body = async_stream::stream! {
        while let Some(event) = events.recv().await {
            yield Ok::<_, Infallible>(Bytes::from(event.to_frame()));
        }
    };
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

fn start_stream(state: &AppState, input: Option<String>, options: AnalysisOptions, owner_id: Option<String>) -> Response {
    let events = match non_empty(input) {
        Some(input) => stream::spawn(
            state.pipeline.clone(),
            StreamRequest {
                input,
                options,
                owner_id,
            },
        ),
        None => stream::rejected(&missing_repo().message),
    };
    sse_response(events)
}

async fn handle_stream_query(
    State(state): State<AppState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(e) => {
            tracing::debug!(error = %e.body_text(), "malformed stream query");
            return sse_response(stream::rejected(&format!(
                "invalid request: {}",
                e.body_text()
            )));
        }
    };
    let options = AnalysisOptions {
        analysis_depth: query.depth.unwrap_or_default(),
        refresh: query.refresh,
        ..Default::default()
    };
    start_stream(&state, query.repo, options, None)
}

async fn handle_stream_body(
    State(state): State<AppState>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(req)) => start_stream(&state, req.repo_url, req.options, req.user_id),
        Err(e) => {
            tracing::debug!(error = %e.body_text(), "malformed stream request");
            sse_response(stream::rejected(&format!(
                "invalid request body: {}",
                e.body_text()
            )))
        }
    }
}

// ============ GET /spec/{shareId} ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SharedSpec {
    id: String,
    share_id: String,
    markdown: String,
    sections: std::collections::BTreeMap<String, String>,
    metadata: SpecMetadata,
    view_count: i64,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct SpecResponse {
    success: bool,
    spec: SharedSpec,
}

async fn handle_get_spec(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
) -> Result<Json<SpecResponse>, AppError> {
    let stored = state
        .pipeline
        .cache
        .get_by_share_id(&share_id)
        .await
        .ok_or_else(|| not_found("Spec not found"))?;

    let pipeline = state.pipeline.clone();
    let id = stored.share_id.clone();
    tokio::spawn(async move {
        pipeline.cache.increment_view(&id).await;
    });

    Ok(Json(SpecResponse {
        success: true,
        spec: SharedSpec {
            id: stored.id,
            share_id: stored.share_id,
            markdown: stored.markdown,
            sections: stored.sections,
            metadata: stored.metadata,
            view_count: stored.view_count,
            created_at: stored.created_at,
        },
    }))
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
