//! Upload relay for the OCR.space API.
//!
//! `POST /ocr` accepts one multipart `file`, forwards it to OCR.space and
//! answers with the text of the first parsed result.

pub mod config;
pub mod error;
pub mod ocr;
pub mod server;
pub mod upload;

pub use config::{Args, Config};
pub use error::{ErrorKind, ExternalServiceError, RelayError};
pub use ocr::{OcrResult, OcrSpaceClient, NO_TEXT_DETECTED};
pub use server::{router, AppState};
pub use upload::UploadedFile;
