//! HTTP API around a [`Translator`].

mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::pipeline::Translator;

pub use handlers::{ApiError, StatusResponse, TranslateResponse};

/// Default cap on request bodies, uploads included.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Where and how to listen.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Build the application router.
///
/// - `GET /` reports liveness and which directions are loaded
/// - `POST /translate` takes a multipart `file` and `translation_type`
pub fn build_router(translator: Arc<Translator>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handlers::status))
        .route("/translate", post(handlers::translate))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(translator)
}

/// Serve the API until the process is stopped.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve(translator: Arc<Translator>, config: &ServerConfig) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(translator, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
