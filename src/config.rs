use crate::ledger::totals::DEFAULT_TOLERANCE;
use crate::ledger::validate::FlagThresholds;
use serde::Deserialize;
use std::{fs, path::Path};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub extraction: ExtractionSection,
    #[serde(default)]
    pub ledger: LedgerSection,
}

/// Which wire protocol the extraction service speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionBackend {
    /// Google Generative Language `generateContent`.
    #[default]
    Gemini,
    /// Any OpenAI-compatible `/chat/completions` endpoint.
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionSection {
    pub backend: ExtractionBackend,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub timeout_secs: u64,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub price_book_max_chars: usize,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            backend: ExtractionBackend::Gemini,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.1,
            timeout_secs: 120,
            api_key_env: "LLM_API_KEY".to_string(),
            price_book_max_chars: 200_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub tolerance: f64,
    pub low_margin_percent: f64,
    pub high_confidence: f64,
    pub medium_confidence: f64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        let flags = FlagThresholds::default();
        Self {
            tolerance: DEFAULT_TOLERANCE,
            low_margin_percent: flags.low_margin_percent,
            high_confidence: flags.high_confidence,
            medium_confidence: flags.medium_confidence,
        }
    }
}

impl LedgerSection {
    pub fn flag_thresholds(&self) -> FlagThresholds {
        FlagThresholds {
            high_confidence: self.high_confidence,
            medium_confidence: self.medium_confidence,
            low_margin_percent: self.low_margin_percent,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Like [`Config::load`], but a missing file means built-in defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[extraction]
backend = "openai"
base_url = "http://localhost:11434/v1"
model = "qwen2.5vl"

[ledger]
tolerance = 0.10
"#
        )
        .unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.extraction.backend, ExtractionBackend::OpenAi);
        assert_eq!(cfg.extraction.model, "qwen2.5vl");
        assert_eq!(cfg.extraction.price_book_max_chars, 200_000);
        assert_eq!(cfg.extraction.api_key_env, "LLM_API_KEY");
        assert_eq!(cfg.ledger.tolerance, 0.10);
        assert_eq!(cfg.ledger.low_margin_percent, 20.0);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.extraction.backend, ExtractionBackend::Gemini);
        assert_eq!(cfg.ledger.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(cfg.ledger.flag_thresholds(), FlagThresholds::default());
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[extraction\nmodel = 3").unwrap();
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse(_))));
    }
}
