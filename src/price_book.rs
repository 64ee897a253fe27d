// src/price_book.rs

use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PriceBookError {
    #[error("failed to read price book {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// What the extraction prompt knows about the optional price book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceBook {
    None,
    Loaded(String),
    /// A file was given but could not be read; extraction goes on without it.
    Unreadable,
}

impl PriceBook {
    /// Load the price book if a path was given. Read failures degrade to
    /// [`PriceBook::Unreadable`] instead of failing.
    pub fn resolve(path: Option<&Path>, max_chars: usize) -> Self {
        let Some(path) = path else {
            return PriceBook::None;
        };
        match load(path, max_chars) {
            Ok(text) => PriceBook::Loaded(text),
            Err(e) => {
                warn!(error = %e, "Price book unavailable, extracting without it");
                PriceBook::Unreadable
            }
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            PriceBook::Loaded(text) => Some(text),
            _ => None,
        }
    }
}

/// Read a price book file, truncated to at most `max_chars` characters.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn load(path: &Path, max_chars: usize) -> Result<String, PriceBookError> {
    let bytes = fs::read(path).map_err(|source| PriceBookError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let truncated = truncate_chars(&text, max_chars);
    info!(
        path = %path.display(),
        chars = truncated.chars().count(),
        truncated = truncated.len() < text.len(),
        "Loaded price book"
    );
    Ok(truncated.to_string())
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("jalapeño chips", 8), "jalapeño");
    }

    #[test]
    fn test_resolve_loaded_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricebook.csv");
        fs::write(&path, "upc,description,retail\n284002686,Doritos,4.99\n").unwrap();

        let book = PriceBook::resolve(Some(&path), 10);
        assert_eq!(book, PriceBook::Loaded("upc,descri".to_string()));
        assert_eq!(book.text(), Some("upc,descri"));
    }

    #[test]
    fn test_resolve_missing_file_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let book = PriceBook::resolve(Some(&dir.path().join("gone.csv")), 100);
        assert_eq!(book, PriceBook::Unreadable);
        assert_eq!(book.text(), None);
        assert_eq!(PriceBook::resolve(None, 100), PriceBook::None);
    }

    #[test]
    fn test_load_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("gone.csv"), 100).is_err());
    }
}
