//! HTTP surface: JSON routes over the engine handle.
//!
//! Every failure, including malformed bodies and handler panics, is rendered
//! as `{"success": false, "error": "..."}`.

use crate::engine::{EngineError, EngineHandle};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use facegate_core::{FaceBox, GalleryError, GalleryStatus, SampleSummary};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use std::path::Path;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    engine: EngineHandle,
}

#[derive(Debug, Deserialize)]
struct ImageRequest {
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnrollRequest {
    name: Option<String>,
    image: Option<String>,
}

#[derive(Serialize)]
struct DetectResponse {
    success: bool,
    /// `[x, y, width, height]` per face.
    faces: Vec<[u32; 4]>,
}

#[derive(Serialize)]
struct EnrollResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct RecognizedFace {
    /// `[top, right, bottom, left]`.
    location: [u32; 4],
    name: String,
}

#[derive(Serialize)]
struct RecognizeResponse {
    success: bool,
    faces: Vec<RecognizedFace>,
}

#[derive(Serialize)]
struct SamplesResponse {
    success: bool,
    samples: Vec<SampleSummary>,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    version: &'static str,
    #[serde(flatten)]
    gallery: GalleryStatus,
}

/// Error envelope with its HTTP status.
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

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        } else {
            tracing::warn!(error = %err, "request rejected");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(error = %rejection.body_text(), "malformed request body");
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Gallery(
            GalleryError::Validation(_)
            | GalleryError::NoFaceFound
            | GalleryError::MultipleFaces(_),
        ) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn require(field: Option<String>, name: &str) -> Result<String, ApiError> {
    match field {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ApiError::bad_request(format!("missing required field: {name}"))),
    }
}

/// Build the application router.
///
/// Non-API paths are served from `static_dir` when it exists.
pub fn router(engine: EngineHandle, static_dir: &Path, max_body_bytes: usize) -> Router {
    let api = Router::new()
        .route("/detect", post(detect))
        .route("/enroll", post(enroll))
        .route("/recognize", post(recognize))
        .route("/samples", get(list_samples))
        .route("/status", get(status))
        .with_state(AppState { engine });

    let app = if static_dir.is_dir() {
        tracing::info!(dir = %static_dir.display(), "serving static files");
        api.fallback_service(ServeDir::new(static_dir))
    } else {
        api
    };

    app.layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

async fn detect(
    State(state): State<AppState>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<DetectResponse>, ApiError> {
    let Json(req) = payload?;
    // Detection failures of any kind, including a missing image, are server errors.
    let image = require(req.image, "image").map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        ..e
    })?;

    let faces = state.engine.detect(image).await?;
    Ok(Json(DetectResponse {
        success: true,
        faces: faces.iter().map(FaceBox::to_xywh).collect(),
    }))
}

async fn enroll(
    State(state): State<AppState>,
    payload: Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<Json<EnrollResponse>, ApiError> {
    let Json(req) = payload?;
    let name = require(req.name, "name")?;
    let image = require(req.image, "image")?;

    let sample = state.engine.enroll(name, image).await?;
    Ok(Json(EnrollResponse {
        success: true,
        message: format!("Successfully enrolled {}", sample.name),
    }))
}

async fn recognize(
    State(state): State<AppState>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let Json(req) = payload?;
    let image = require(req.image, "image")?;

    let results = state.engine.recognize(image).await?;
    Ok(Json(RecognizeResponse {
        success: true,
        faces: results
            .into_iter()
            .map(|r| RecognizedFace {
                location: r.face.to_trbl(),
                name: r.name,
            })
            .collect(),
    }))
}

async fn list_samples(State(state): State<AppState>) -> Result<Json<SamplesResponse>, ApiError> {
    let samples = state.engine.list_samples().await?;
    Ok(Json(SamplesResponse {
        success: true,
        samples,
    }))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let gallery = state.engine.status().await?;
    Ok(Json(StatusResponse {
        success: true,
        version: env!("CARGO_PKG_VERSION"),
        gallery,
    }))
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");

    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: format!("internal error: {detail}"),
    }
    .into_response()
}
