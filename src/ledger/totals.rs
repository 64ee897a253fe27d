// src/ledger/totals.rs

use super::{InvoiceData, LineItem, amount};

/// Default gap allowed between the row sum and the printed invoice total.
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Outcome of comparing the row sum against the header total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    /// No positive printed total to compare against.
    NotEvaluated,
    /// `diff` is `calculated_total − invoice_total`.
    Matched { diff: f64 },
    Mismatched { diff: f64 },
}

impl Reconciliation {
    pub fn is_match(&self) -> bool {
        matches!(self, Reconciliation::Matched { .. })
    }

    pub fn diff(&self) -> Option<f64> {
        match self {
            Reconciliation::NotEvaluated => None,
            Reconciliation::Matched { diff } | Reconciliation::Mismatched { diff } => Some(*diff),
        }
    }
}

/// Footer figures for the ledger table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Totals {
    pub item_count: usize,
    pub calculated_total: f64,
    pub invoice_total: Option<f64>,
    pub total_qty: f64,
    pub total_units: f64,
    pub total_case_cost: f64,
    pub reconciliation: Reconciliation,
}

pub fn summarize(data: &InvoiceData, tolerance: f64) -> Totals {
    let items = &data.line_items;
    let calculated_total = sum(items, |i| i.extended_case_cost);
    let invoice_total = data.invoice_header.invoice_total;
    Totals {
        item_count: items.len(),
        calculated_total,
        invoice_total,
        total_qty: sum(items, |i| i.qty),
        total_units: sum(items, |i| i.units),
        total_case_cost: sum(items, |i| i.case_cost),
        reconciliation: reconcile(calculated_total, invoice_total, tolerance),
    }
}

/// Matched only when the absolute gap is strictly below `tolerance`.
pub fn reconcile(calculated_total: f64, invoice_total: Option<f64>, tolerance: f64) -> Reconciliation {
    let Some(invoice_total) = invoice_total.filter(|t| t.is_finite() && *t > 0.0) else {
        return Reconciliation::NotEvaluated;
    };
    let diff = calculated_total - invoice_total;
    if diff.abs() < tolerance {
        Reconciliation::Matched { diff }
    } else {
        Reconciliation::Mismatched { diff }
    }
}

fn sum(items: &[LineItem], field: impl Fn(&LineItem) -> Option<f64>) -> f64 {
    items.iter().map(|i| amount(field(i))).sum()
}
