use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures talking to the OCR.space API
#[derive(Error, Debug)]
pub enum ExternalServiceError {
    #[error("OCR service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("OCR service responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("OCR service returned a malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("No file uploaded")]
    MissingFile,

    #[error("Unexpected field: {0}")]
    UnexpectedField(String),

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("File too large (max: {max} bytes)")]
    FileTooLarge { max: usize },

    #[error("Failed to store upload: {0}")]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    External(#[from] ExternalServiceError),
}

/// Coarse classification of a [`RelayError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller sent something unusable; no outbound call was made
    Validation,
    /// The OCR service could not be reached or answered badly
    ExternalService,
    Internal,
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::MissingFile
            | RelayError::UnexpectedField(_)
            | RelayError::Multipart(_)
            | RelayError::FileTooLarge { .. } => ErrorKind::Validation,
            RelayError::External(_) => ErrorKind::ExternalService,
            RelayError::Storage(_) => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingFile | RelayError::UnexpectedField(_) => StatusCode::BAD_REQUEST,
            RelayError::Multipart(e) => e.status(),
            RelayError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Storage(_) | RelayError::External(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!("OCR request failed: {}", self);
        } else {
            tracing::debug!("Rejected OCR request: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}
