//! Request handlers and the JSON error body.

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::error::{Error, ErrorKind};
use crate::pipeline::{ModelStatus, Translator};

/// Body of `GET /`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub message: &'static str,
    pub status: &'static str,
    pub models: ModelStatus,
}

/// Body of a successful `POST /translate`.
#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub message: String,
    /// Base64-encoded PNG.
    pub image_data: String,
}

/// Request failures, rendered as `{"detail": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Translate(#[from] Error),

    #[error("missing form field: {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("inference task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            Self::Translate(err) => match err.kind() {
                ErrorKind::NotReady => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
                ErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, err.to_string()),
                ErrorKind::Processing => (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {err}")),
            },
            Self::MissingField(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            Self::Multipart(err) => (err.status(), err.body_text()),
            Self::Worker(_) => (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {self}")),
        };

        if status.is_server_error() {
            tracing::error!("{detail}");
        } else {
            tracing::debug!("Rejected request: {detail}");
        }

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Report that the service is up and which directions have a generator.
pub async fn status(State(translator): State<Arc<Translator>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "Chest X-ray Translation API",
        status: "running",
        models: translator.status(),
    })
}

/// Translate an uploaded image.
///
/// Expects the multipart fields `file` (image bytes) and `translation_type`
/// (`normal_to_pneumonia` or `pneumonia_to_normal`).
///
/// # Errors
///
/// Returns 503 if the direction has no generator, 400 for an unknown
/// direction, 422 if a field is missing and 500 if the image cannot be
/// decoded or translated.
pub async fn translate(
    State(translator): State<Arc<Translator>>,
    mut multipart: Multipart,
) -> Result<Json<TranslateResponse>, ApiError> {
    let mut file = None;
    let mut translation_type = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => file = Some(field.bytes().await?),
            Some("translation_type") => translation_type = Some(field.text().await?),
            _ => {}
        }
    }

    let file = file.ok_or(ApiError::MissingField("file"))?;
    let translation_type = translation_type.ok_or(ApiError::MissingField("translation_type"))?;

    // Forward passes are CPU bound; keep them off the async workers
    let translation = tokio::task::spawn_blocking(move || {
        translator.translate_bytes(&file, &translation_type)
    })
    .await??;

    tracing::info!(
        direction = %translation.direction,
        bytes = translation.png.len(),
        "Translation complete"
    );

    Ok(Json(TranslateResponse {
        message: translation.message(),
        image_data: BASE64_STANDARD.encode(&translation.png),
    }))
}
