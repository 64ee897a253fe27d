// src/ledger/session.rs

use super::pipeline::{self, Action};
use super::InvoiceData;
use std::fmt::Display;
use tracing::{debug, warn};

/// What the editor currently shows for one invoice.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Session {
    #[default]
    Empty,
    Loaded(InvoiceData),
    /// Extraction failed; the message is shown instead of any table.
    Failed(String),
}

impl Session {
    /// State after an extraction call. Whatever was shown before is replaced
    /// wholesale, so a failure never leaves stale rows on screen.
    pub fn from_extraction<E: Display>(result: Result<InvoiceData, E>) -> Session {
        match result {
            Ok(data) => Session::Loaded(data.normalized()),
            Err(e) => {
                warn!(error = %e, "Extraction failed, dropping current invoice");
                Session::Failed(e.to_string())
            }
        }
    }

    /// Run actions in order against the loaded invoice. Other states ignore them.
    pub fn apply<'a>(&self, actions: impl IntoIterator<Item = &'a Action>) -> Session {
        match self {
            Session::Loaded(data) => Session::Loaded(pipeline::apply_all(data, actions)),
            other => {
                debug!(state = ?other, "No invoice loaded, actions ignored");
                other.clone()
            }
        }
    }

    pub fn invoice(&self) -> Option<&InvoiceData> {
        match self {
            Session::Loaded(data) => Some(data),
            _ => None,
        }
    }
}
