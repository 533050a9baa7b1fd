//! HTTP adapter over [`JobService`] (feature `server`).
//!
//! | Method | Path                    | Success                         |
//! |--------|-------------------------|---------------------------------|
//! | POST   | `/upload`               | `202 {"job_id"}`                |
//! | GET    | `/status/{job_id}`      | `200` job snapshot              |
//! | POST   | `/cancel/{job_id}`      | `202` job snapshot              |
//! | GET    | `/download/{filename}`  | `200` document as attachment    |
//! | GET    | `/health`               | `200 {"status":"ok"}`           |
//!
//! Every error body is `{"error": "..."}`.

use crate::error::ScribeError;
use crate::job::{Job, JobId};
use crate::service::{JobService, Upload};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Headroom on top of the upload limit for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub job_id: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub progress: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<crate::error::ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            status: job.status.as_str().to_string(),
            progress: job.progress,
            total: job.total,
            error: job.error_message,
            error_kind: job.error_kind,
            output_filename: job.output_filename,
        }
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn error_response(err: &ScribeError) -> Response {
    let status = match err {
        ScribeError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        ScribeError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        ScribeError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }
    let message = match err {
        ScribeError::InvalidInput { reason } => reason.clone(),
        other => other.to_string(),
    };
    error_body(status, message)
}

/// Parse a job id path segment; malformed ids are simply unknown.
fn parse_job_id(raw: &str) -> Result<JobId, Response> {
    raw.parse::<JobId>()
        .map_err(|_| error_body(StatusCode::NOT_FOUND, "Job not found"))
}

pub fn create_router(service: Arc<JobService>) -> Router {
    let body_limit = service.config().max_upload_bytes + MULTIPART_OVERHEAD;

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(health_handler))
        .route("/upload", post(upload_handler))
        .route("/status/{job_id}", get(status_handler))
        .route("/cancel/{job_id}", post(cancel_handler))
        .route("/download/{filename}", get(download_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(trace_layer)
        .with_state(service)
}

/// Bind `addr` and serve until Ctrl-C. Also runs the retention sweeper.
pub async fn serve(service: Arc<JobService>, addr: SocketAddr) -> std::io::Result<()> {
    let sweep_every =
        std::time::Duration::from_secs((service.config().retention_secs / 24).max(60));
    let sweeper = service.spawn_sweeper(sweep_every);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");
    let result = axum::serve(listener, create_router(service))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await;
    sweeper.abort();
    result
}

pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}

#[tracing::instrument(skip(service, multipart))]
pub async fn upload_handler(
    State(service): State<Arc<JobService>>,
    mut multipart: Multipart,
) -> Response {
    let field = loop {
        match multipart.next_field().await {
            Ok(Some(f)) if f.name() == Some("file") => break f,
            Ok(Some(_)) => continue,
            Ok(None) => {
                tracing::warn!("Upload request with no file");
                return error_body(StatusCode::BAD_REQUEST, "No file uploaded");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read multipart");
                return error_body(e.status(), e.body_text());
            }
        }
    };

    let filename = field.file_name().unwrap_or_default().to_string();
    let data = match field.bytes().await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read file bytes");
            return error_body(e.status(), e.body_text());
        }
    };
    tracing::debug!(filename = %filename, bytes = data.len(), "File data received");

    match service.submit(Upload::new(filename, data.to_vec())).await {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(UploadResponse {
                job_id: id.to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

#[tracing::instrument(skip(service))]
pub async fn status_handler(
    State(service): State<Arc<JobService>>,
    Path(job_id): Path<String>,
) -> Response {
    let id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match service.query(id) {
        Ok(job) => (StatusCode::OK, Json(JobStatusResponse::from(job))).into_response(),
        Err(ScribeError::NotFound { .. }) => error_body(StatusCode::NOT_FOUND, "Job not found"),
        Err(e) => error_response(&e),
    }
}

#[tracing::instrument(skip(service))]
pub async fn cancel_handler(
    State(service): State<Arc<JobService>>,
    Path(job_id): Path<String>,
) -> Response {
    let id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match service.cancel(id) {
        Ok(job) => (StatusCode::ACCEPTED, Json(JobStatusResponse::from(job))).into_response(),
        Err(ScribeError::NotFound { .. }) => error_body(StatusCode::NOT_FOUND, "Job not found"),
        Err(e) => error_response(&e),
    }
}

#[tracing::instrument(skip(service))]
pub async fn download_handler(
    State(service): State<Arc<JobService>>,
    Path(filename): Path<String>,
) -> Response {
    let path = match service.resolve_download(&filename) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Output vanished before download");
            return error_body(StatusCode::NOT_FOUND, format!("NotFound: file {filename}"));
        }
    };

    let content_type = if filename.to_ascii_lowercase().ends_with(".docx") {
        DOCX_MIME
    } else {
        "text/markdown; charset=utf-8"
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}
