use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use recon_pipeline::{ErrorKind, JobOrchestrator, JobOutput, PipelineError, ReconstructionOptions};
use serde_json::json;
use std::sync::Arc;

pub const STATS_HEADER: &str = "x-reconstruction-stats";

pub fn router(orchestrator: Arc<JobOrchestrator>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/reconstruct", post(reconstruct))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(orchestrator)
}

/// Error body returned to clients: `{"error": "<reason>"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::PipelineStage | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self {
            status: status_for(e.kind()),
            message: e.to_string(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        tracing::error!(error = %e, "reconstruction task aborted");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("reconstruction task aborted: {}", e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn health(State(orchestrator): State<Arc<JobOrchestrator>>) -> impl IntoResponse {
    Json(orchestrator.health())
}

async fn reconstruct(
    State(orchestrator): State<Arc<JobOrchestrator>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut images = Vec::new();
    let mut raw_options = String::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("images") => images.push(field.bytes().await?.to_vec()),
            Some("options") => raw_options = field.text().await?,
            _ => {}
        }
    }
    let options = ReconstructionOptions::from_json(&raw_options)?;

    let output = tokio::task::spawn_blocking(move || orchestrator.submit(&images, &options)).await??;
    Ok(model_response(output))
}

fn model_response(output: JobOutput) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", output.filename);
    let mut response = Response::new(Body::from(output.bytes));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(output.mime));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    match serde_json::to_string(&output.stats)
        .ok()
        .and_then(|s| HeaderValue::from_str(&s).ok())
    {
        Some(value) => {
            headers.insert(STATS_HEADER, value);
        }
        None => tracing::warn!(token = %output.token, "stats not representable as a header"),
    }
    response
}
