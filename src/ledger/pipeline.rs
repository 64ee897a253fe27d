// src/ledger/pipeline.rs

use super::calc::{self, CellValue, Field};
use super::{InvoiceData, LineItem, renumbered};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One user action against the ledger table. `row` is the 0-based array position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Edit {
        row: usize,
        field: Field,
        value: CellValue,
    },
    Delete {
        row: usize,
    },
    Add,
}

/// Produce the next invoice state. The input value is never modified.
///
/// Stale row positions are ignored and the state is returned unchanged.
pub fn apply(data: &InvoiceData, action: &Action) -> InvoiceData {
    let mut items = data.line_items.clone();

    match action {
        Action::Edit { row, field, value } => {
            let Some(target) = items.get_mut(*row) else {
                debug!(row, len = data.line_items.len(), "Edit on stale row ignored");
                return data.clone();
            };
            *target = calc::recompute(target, *field, value);
            debug!(row, field = ?field, "Applied edit");
        }
        Action::Delete { row } => {
            if *row >= items.len() {
                debug!(row, len = items.len(), "Delete on stale row ignored");
                return data.clone();
            }
            items.remove(*row);
            debug!(row, remaining = items.len(), "Deleted row");
        }
        Action::Add => {
            items.push(LineItem::manual(items.len() + 1));
            debug!(rows = items.len(), "Added manual row");
        }
    }

    InvoiceData {
        invoice_header: data.invoice_header.clone(),
        line_items: renumbered(items),
    }
}

/// Fold a sequence of actions over a starting state.
pub fn apply_all<'a>(data: &InvoiceData, actions: impl IntoIterator<Item = &'a Action>) -> InvoiceData {
    actions
        .into_iter()
        .fold(data.clone(), |state, action| apply(&state, action))
}
