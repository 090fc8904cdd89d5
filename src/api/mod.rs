//! REST + WebSocket surface over the job service.

mod ws;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{Error, JobError, StoreError};
use crate::jobs::model::{AssetRole, JobKind};
use crate::jobs::service::{JobService, NewJob};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: JobService,
}

/// Build the Axum router with job REST and WebSocket routes.
pub fn routes(service: JobService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", get(list_jobs).post(submit_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/assets/{key}", get(get_asset))
        .route("/ws/jobs", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(AppState { service })
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "creations"
    }))
}

// ── Jobs ────────────────────────────────────────────────────────────────

async fn list_jobs(State(state): State<AppState>) -> Response {
    match state.service.list().await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(job_id) = Uuid::parse_str(&id) else {
        return json_error(StatusCode::BAD_REQUEST, "Invalid job ID");
    };

    match state.service.get(job_id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    title: String,
    kind: JobKind,
    #[serde(default)]
    attachments: AttachmentsBody,
}

/// Base64-encoded uploads, keyed by role.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentsBody {
    thumbnail: Option<String>,
    product_image: Option<String>,
    logo_image: Option<String>,
    reference_image: Option<String>,
}

impl AttachmentsBody {
    fn decode(self) -> Result<Vec<(AssetRole, Vec<u8>)>, String> {
        [
            (AssetRole::Thumbnail, self.thumbnail),
            (AssetRole::ProductImage, self.product_image),
            (AssetRole::Logo, self.logo_image),
            (AssetRole::ReferenceImage, self.reference_image),
        ]
        .into_iter()
        .filter_map(|(role, data)| data.map(|d| (role, d)))
        .map(|(role, data)| {
            // Accept data URLs as produced by browsers
            let raw = data.split_once(";base64,").map_or(data.as_str(), |(_, b)| b);
            BASE64
                .decode(raw.trim())
                .map(|bytes| (role, bytes))
                .map_err(|e| format!("{} is not valid base64: {e}", role.as_str()))
        })
        .collect()
    }
}

async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitRequest>,
) -> Response {
    let attachments = match body.attachments.decode() {
        Ok(a) => a,
        Err(msg) => return json_error(StatusCode::BAD_REQUEST, &msg),
    };

    let request = NewJob {
        title: body.title,
        kind: body.kind,
        attachments,
    };
    match state.service.submit(request).await {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Assets ──────────────────────────────────────────────────────────────

async fn get_asset(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.service.load_asset(&key).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            Bytes::from(bytes),
        )
            .into_response(),
        Err(e) => error_response(e.into()),
    }
}

// ── Errors ──────────────────────────────────────────────────────────────

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn error_response(err: Error) -> Response {
    let status = match &err {
        Error::Job(JobError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
        Error::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Store(StoreError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
        Error::Store(StoreError::Duplicate { .. } | StoreError::Conflict(_)) => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(error = %err, "Request failed");
    } else {
        warn!(status = status.as_u16(), error = %err, "Request rejected");
    }
    json_error(status, &err.to_string())
}
