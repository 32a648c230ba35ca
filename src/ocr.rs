//! OCR.space client
//!
//! Sends one uploaded file to the OCR.space `parse/image` endpoint and reduces
//! the reply to the text of its first parsed result.

use crate::config::Config;
use crate::error::{ExternalServiceError, RelayError};
use crate::upload::UploadedFile;
use reqwest::multipart::{Form, Part};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

pub const NO_TEXT_DETECTED: &str = "No text detected.";

const USER_AGENT: &str = concat!("ocr-relay-server/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 512;

/// Text extracted from one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrResult {
    Text(String),
    NoText,
}

impl OcrResult {
    pub fn into_text(self) -> String {
        match self {
            OcrResult::Text(text) => text,
            OcrResult::NoText => NO_TEXT_DETECTED.to_string(),
        }
    }
}

/// Reply body of `POST /parse/image`
///
/// Only `ParsedResults[0].ParsedText` decides the answer. The other fields are
/// diagnostics and fall back to `None` when they arrive with an unexpected type.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParseImageResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub parsed_results: Option<Vec<ParsedResult>>,
    #[serde(rename = "OCRExitCode", default, deserialize_with = "lenient")]
    pub ocr_exit_code: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_errored_on_processing: Option<bool>,
    /// A string or a list of strings, depending on the failure
    #[serde(default)]
    pub error_message: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParsedResult {
    #[serde(default, deserialize_with = "lenient")]
    pub parsed_text: Option<String>,
}

/// Deserialize a field, treating a value of the wrong type as absent
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl ParseImageResponse {
    /// Interpret any JSON reply. Anything other than an object carries no
    /// results; a bare string is kept as the error message.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
            Value::String(message) => Self {
                error_message: Some(Value::String(message)),
                ..Default::default()
            },
            _ => Self::default(),
        }
    }

    /// Human-readable form of `ErrorMessage`
    pub fn error_text(&self) -> Option<String> {
        match self.error_message.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Array(items) => {
                let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("; "))
                }
            }
            _ => None,
        }
    }
}

impl From<ParseImageResponse> for OcrResult {
    fn from(response: ParseImageResponse) -> Self {
        let errored = response.is_errored_on_processing.unwrap_or(false);
        if errored || response.parsed_results.is_none() {
            if let Some(message) = response.error_text() {
                tracing::warn!(
                    "OCR.space reported an error (exit code {}): {}",
                    response
                        .ocr_exit_code
                        .as_ref()
                        .map_or_else(|| "none".to_string(), serde_json::Value::to_string),
                    message
                );
            }
        }

        match response.parsed_results.and_then(|r| r.into_iter().next()) {
            Some(first) => OcrResult::Text(first.parsed_text.unwrap_or_default()),
            None => OcrResult::NoText,
        }
    }
}

/// Client for the OCR.space API, shared by all requests
pub struct OcrSpaceClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    language: String,
    overlay_required: bool,
}

impl OcrSpaceClient {
    pub fn new(config: &Config) -> Result<Self, ExternalServiceError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            endpoint: config.ocr_endpoint.clone(),
            api_key: config.api_key.clone(),
            language: config.language.clone(),
            overlay_required: config.overlay_required,
        })
    }

    /// Send the upload to OCR.space and extract its text
    pub async fn recognize(&self, upload: &UploadedFile) -> Result<OcrResult, RelayError> {
        let file = tokio::fs::File::open(upload.path()).await?;
        let part = Part::stream_with_length(file, upload.size())
            .file_name(upload.original_name().to_string())
            .mime_str(upload.content_type())
            .map_err(ExternalServiceError::from)?;

        let form = Form::new()
            .part("file", part)
            .text("language", self.language.clone())
            .text("isOverlayRequired", self.overlay_required.to_string());

        tracing::debug!(
            "Sending {} ({} bytes) to {}",
            upload.original_name(),
            upload.size(),
            self.endpoint
        );

        let response = self
            .http
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(ExternalServiceError::from)?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(ExternalServiceError::from)?;

        if !status.is_success() {
            let mut text = String::from_utf8_lossy(&body).into_owned();
            if text.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|&i| text.is_char_boundary(i))
                    .unwrap_or(0);
                text.truncate(cut);
            }
            return Err(ExternalServiceError::Status {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| ExternalServiceError::MalformedResponse(e.to_string()))?;

        Ok(ParseImageResponse::from_value(value).into())
    }
}
