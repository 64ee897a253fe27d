// src/ledger/validate.rs

use super::LineItem;

/// Largest gap between stored and expected extended cost that still counts as consistent.
pub const MATH_TOLERANCE: f64 = 0.05;

/// Advisory problems found on one row. Never blocks editing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowIssues {
    /// Stored extended case cost disagrees with `qty × (case_cost − case_discount)`.
    pub math_error: bool,
    /// Item code or description is empty.
    pub missing_critical: bool,
}

impl RowIssues {
    pub fn is_erroneous(&self) -> bool {
        self.math_error || self.missing_critical
    }
}

pub fn validate_row(row: &LineItem) -> RowIssues {
    let stored = super::amount(row.extended_case_cost);
    let expected = row.expected_extended_case_cost();
    RowIssues {
        math_error: (stored - expected).abs() > MATH_TOLERANCE,
        missing_critical: is_blank(row.item_code.as_deref())
            || is_blank(row.item_description.as_deref()),
    }
}

fn is_blank(v: Option<&str>) -> bool {
    v.is_none_or(|s| s.trim().is_empty())
}

/// How sure the extraction service was about a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

/// Thresholds for the per-row display flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlagThresholds {
    pub high_confidence: f64,
    pub medium_confidence: f64,
    pub low_margin_percent: f64,
}

impl Default for FlagThresholds {
    fn default() -> Self {
        Self {
            high_confidence: 0.8,
            medium_confidence: 0.5,
            low_margin_percent: 20.0,
        }
    }
}

/// Everything the table shows next to a row, computed fresh from its state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowFlags {
    pub issues: RowIssues,
    pub confidence: ConfidenceBand,
    /// Calculated margin under the threshold; an unset margin counts as zero.
    pub low_margin: bool,
}

pub fn row_flags(row: &LineItem, thresholds: &FlagThresholds) -> RowFlags {
    let confidence = if row.confidence > thresholds.high_confidence {
        ConfidenceBand::High
    } else if row.confidence > thresholds.medium_confidence {
        ConfidenceBand::Medium
    } else {
        ConfidenceBand::Low
    };
    RowFlags {
        issues: validate_row(row),
        confidence,
        low_margin: row.calculated_margin_percent.unwrap_or(0.0) < thresholds.low_margin_percent,
    }
}
