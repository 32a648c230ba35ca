use crate::config::Config;
use crate::error::RelayError;
use crate::ocr::OcrSpaceClient;
use crate::upload::UploadedFile;
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Allowance for multipart boundaries and part headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ocr: Arc<OcrSpaceClient>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let ocr = OcrSpaceClient::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            ocr: Arc::new(ocr),
        })
    }
}

/// OCR response
#[derive(Serialize)]
pub struct OcrResponse {
    pub text: String,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub language: String,
    pub overlay_required: bool,
    pub max_file_size_bytes: usize,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_file_size.saturating_add(MULTIPART_OVERHEAD);
    let public_dir = state.config.public_dir.clone();

    Router::new()
        .route("/ocr", post(handle_ocr))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .fallback_service(ServeDir::new(public_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: Config) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.upload_dir).await?;
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("Uploads staged in {}", config.upload_dir.display());
    tracing::info!("Forwarding OCR requests to {}", config.ocr_endpoint);

    let app = router(AppState::new(config)?);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Handle OCR requests
async fn handle_ocr(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<OcrResponse>, RelayError> {
    let start = Instant::now();

    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!("Request is not a multipart upload: {}", rejection);
        RelayError::MissingFile
    })?;

    let upload = receive_upload(&mut multipart, &state.config)
        .await?
        .ok_or(RelayError::MissingFile)?;

    tracing::info!(
        "Received {} ({}, {} bytes)",
        upload.original_name(),
        upload.content_type(),
        upload.size()
    );

    let outcome = state.ocr.recognize(&upload).await;
    upload.discard();
    let text = outcome?.into_text();

    tracing::info!(
        "OCR completed in {}ms, text length: {}",
        start.elapsed().as_millis(),
        text.len()
    );

    Ok(Json(OcrResponse { text }))
}

/// Read the multipart body, persisting the `file` field.
///
/// Text fields are skipped. A second `file` field, or a file sent under
/// another name, is rejected; an upload already stored is dropped (and so
/// removed) with the error.
async fn receive_upload(
    multipart: &mut Multipart,
    config: &Config,
) -> Result<Option<UploadedFile>, RelayError> {
    let mut upload: Option<UploadedFile> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name != "file" {
            // Text fields are ignored, files under any other name are not
            if field.file_name().is_some_and(|f| !f.is_empty()) {
                return Err(RelayError::UnexpectedField(name));
            }
            continue;
        }
        if upload.is_some() {
            return Err(RelayError::UnexpectedField("file".to_string()));
        }

        let file = UploadedFile::from_field(field, &config.upload_dir, config.max_file_size).await?;
        if file.is_blank() {
            file.discard();
        } else {
            upload = Some(file);
        }
    }

    Ok(upload)
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        language: state.config.language.clone(),
        overlay_required: state.config.overlay_required,
        max_file_size_bytes: state.config.max_file_size,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::path::Path;
    use tower::ServiceExt;

    fn test_state(upload_dir: &Path) -> AppState {
        AppState::new(Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            api_key: "test-key".to_string(),
            // Never contacted by these tests
            ocr_endpoint: "http://127.0.0.1:9/parse/image".to_string(),
            language: "eng+ara".to_string(),
            overlay_required: false,
            max_file_size: 1024,
            upload_dir: upload_dir.to_path_buf(),
            public_dir: upload_dir.join("public"),
            request_timeout: None,
        })
        .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn non_multipart_post_is_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ocr")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({ "error": "No file uploaded" }));
    }

    #[tokio::test]
    async fn blank_file_part_is_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));

        let body = "--XBOUNDARY\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"\"\r\n\
             Content-Type: application/octet-stream\r\n\
             \r\n\
             \r\n\
             --XBOUNDARY--\r\n";

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ocr")
                    .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({ "error": "No file uploaded" }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn health_reports_version() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
