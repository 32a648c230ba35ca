//! Request-scoped storage for uploaded files.
//!
//! An [`UploadedFile`] owns its temporary file for the lifetime of one request.
//! The file is unlinked by [`UploadedFile::discard`] or, failing that, when the
//! value is dropped, so no exit path of the handler can leave it behind.

use crate::error::RelayError;
use axum::extract::multipart::Field;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

const DEFAULT_FILE_NAME: &str = "upload";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One request's uploaded file, persisted to temporary storage
#[derive(Debug)]
pub struct UploadedFile {
    file: NamedTempFile,
    original_name: String,
    content_type: String,
    size: u64,
}

impl UploadedFile {
    /// Create an empty temporary file in `dir` for an upload
    pub fn create(dir: &Path, original_name: &str, content_type: &str) -> std::io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(extension_for(content_type, original_name))
            .tempfile_in(dir)?;

        Ok(Self {
            file,
            original_name: original_name.to_string(),
            content_type: content_type.to_string(),
            size: 0,
        })
    }

    /// Stream a multipart field into a new temporary file in `dir`
    pub async fn from_field(
        mut field: Field<'_>,
        dir: &Path,
        max_size: usize,
    ) -> Result<Self, RelayError> {
        let original_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let mut upload = Self::create(dir, &original_name, &content_type)?;
        let mut out = tokio::fs::File::from_std(upload.file.reopen()?);

        while let Some(chunk) = field.chunk().await? {
            upload.size += chunk.len() as u64;
            if upload.size > max_size as u64 {
                return Err(RelayError::FileTooLarge { max: max_size });
            }
            out.write_all(&chunk).await?;
        }
        out.flush().await?;

        Ok(upload)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Name the client gave the file, or a placeholder when it sent none
    pub fn original_name(&self) -> &str {
        if self.original_name.is_empty() {
            DEFAULT_FILE_NAME
        } else {
            &self.original_name
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// A browser form submitted without choosing a file sends an empty,
    /// unnamed `file` part.
    pub fn is_blank(&self) -> bool {
        self.original_name.is_empty() && self.size == 0
    }

    /// Remove the temporary file. Consumes the upload so it happens once.
    pub fn discard(self) {
        let path = self.file.path().to_path_buf();
        match self.file.close() {
            Ok(()) => tracing::debug!("Removed temporary upload {}", path.display()),
            Err(e) => tracing::warn!(
                "Failed to remove temporary upload {}: {}",
                path.display(),
                e
            ),
        }
    }
}

/// Pick a file extension for the temporary file
fn extension_for(content_type: &str, original_name: &str) -> &'static str {
    match content_type {
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "image/bmp" => ".bmp",
        "image/webp" => ".webp",
        "image/tiff" => ".tiff",
        "application/pdf" => ".pdf",
        _ => extension_from_name(original_name),
    }
}

fn extension_from_name(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => ".png",
        Some("jpg") | Some("jpeg") => ".jpg",
        Some("gif") => ".gif",
        Some("bmp") => ".bmp",
        Some("webp") => ".webp",
        Some("tif") | Some("tiff") => ".tiff",
        Some("pdf") => ".pdf",
        _ => ".tmp",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_prefers_mime_type() {
        assert_eq!(extension_for("image/png", "scan.jpeg"), ".png");
        assert_eq!(extension_for("application/octet-stream", "scan.JPEG"), ".jpg");
        assert_eq!(extension_for("application/octet-stream", "notes"), ".tmp");
        assert_eq!(extension_for("text/plain", "page.tif"), ".tiff");
    }

    #[test]
    fn discard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let upload = UploadedFile::create(dir.path(), "sample.png", "image/png").unwrap();
        let path = upload.path().to_path_buf();

        assert!(path.exists());
        assert!(path.starts_with(dir.path()));
        assert_eq!(path.extension().unwrap(), "png");

        upload.discard();
        assert!(!path.exists());
    }

    #[test]
    fn drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let upload = UploadedFile::create(dir.path(), "sample.png", "image/png").unwrap();
            upload.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn unnamed_empty_upload_is_blank() {
        let dir = tempfile::tempdir().unwrap();
        let upload = UploadedFile::create(dir.path(), "", DEFAULT_CONTENT_TYPE).unwrap();
        assert!(upload.is_blank());
        assert_eq!(upload.original_name(), "upload");

        let named = UploadedFile::create(dir.path(), "blank.png", "image/png").unwrap();
        assert!(!named.is_blank());
    }
}
