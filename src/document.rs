// src/document.rs

use lopdf::Document as PdfDocument;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported document type: {0}")]
    UnsupportedType(String),
}

/// An invoice file ready to hand to the extraction service.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Hex SHA-256 of `bytes`, used to correlate log lines.
    pub sha256: String,
    /// Pages counted locally; only known for PDFs that parse.
    pub page_count: Option<u32>,
}

impl Document {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| DocumentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mime_type = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(mime_from_extension)
            .or_else(|| sniff_mime(&bytes))
            .ok_or_else(|| DocumentError::UnsupportedType(path.display().to_string()))?;

        let doc = Self::from_bytes(bytes, mime_type);
        info!(
            path = %path.display(),
            mime = %doc.mime_type,
            bytes = doc.bytes.len(),
            pages = ?doc.page_count,
            sha256 = %doc.sha256,
            "Loaded invoice document"
        );
        Ok(doc)
    }

    pub fn from_bytes(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        let page_count = if mime_type == "application/pdf" {
            count_pdf_pages(&bytes)
        } else {
            Some(1)
        };
        Self {
            sha256: fingerprint(&bytes),
            bytes,
            mime_type,
            page_count,
        }
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

/// Fall back to magic bytes when the extension says nothing useful.
fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        Some("application/pdf")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else {
        None
    }
}

fn count_pdf_pages(bytes: &[u8]) -> Option<u32> {
    match PdfDocument::load_mem(bytes) {
        Ok(doc) => u32::try_from(doc.get_pages().len()).ok(),
        Err(e) => {
            warn!(error = %e, "Could not parse PDF structure, page count unknown");
            None
        }
    }
}
