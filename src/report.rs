// src/report.rs

use crate::config::LedgerSection;
use crate::ledger::InvoiceData;
use crate::ledger::totals;
use crate::ledger::validate::{ConfidenceBand, RowFlags, row_flags};
use std::fmt;

/// Plain-text rendering of the ledger table and its footer.
///
/// Flags are computed on every format from the current rows. Rows with a
/// math error or a missing identifier are marked with `!`.
pub struct Report<'a> {
    data: &'a InvoiceData,
    ledger: &'a LedgerSection,
}

impl<'a> Report<'a> {
    pub fn new(data: &'a InvoiceData, ledger: &'a LedgerSection) -> Self {
        Self { data, ledger }
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let thresholds = self.ledger.flag_thresholds();
        let header = &self.data.invoice_header;

        writeln!(
            f,
            "Vendor: {}  Inv #: {}  Date: {}  Delivery: {}  Pages: {}",
            header.vendor_name.as_deref().unwrap_or("-"),
            header.invoice_number.as_deref().unwrap_or("-"),
            header.invoice_date.as_deref().unwrap_or("-"),
            header.delivery_date.as_deref().unwrap_or("-"),
            header.page_count,
        )?;
        writeln!(
            f,
            " {:>3} {:<4} {:>7} {:<10} {:<14} {:<28} {:>5} {:>9} {:>8} {:>10} {:>8} {:>8}  Flags",
            "#", "Conf", "Qty", "Item", "Scan", "Description", "Units", "CaseCost", "Disc", "ExtCost",
            "Retail", "Margin%"
        )?;

        if self.data.line_items.is_empty() {
            writeln!(f, "     No line items found.")?;
        }

        for item in &self.data.line_items {
            let flags = row_flags(item, &thresholds);
            writeln!(
                f,
                "{}{:>3} {:<4} {:>7} {:<10} {:<14} {:<28} {:>5} {:>9} {:>8} {:>10} {:>8} {:>7.1}%  {}",
                if flags.issues.is_erroneous() { '!' } else { ' ' },
                item.row_index,
                confidence_label(flags.confidence),
                number(item.qty, 2),
                clip(item.item_code.as_deref(), 10),
                clip(item.scan_code.as_deref(), 14),
                clip(item.item_description.as_deref(), 28),
                number(item.units, 0),
                money(item.case_cost),
                money(item.case_discount),
                money(Some(item.extended_case_cost.unwrap_or(0.0))),
                money(item.unit_retail),
                item.calculated_margin_percent.unwrap_or(0.0),
                flag_text(&flags),
            )?;
        }

        let summary = totals::summarize(self.data, self.ledger.tolerance);
        writeln!(f)?;
        write!(
            f,
            "Total Items: {}  Qty: {:.2}  Units: {:.0}  Case Cost: ${:.2}  Calculated Sum: ${:.2}",
            summary.item_count,
            summary.total_qty,
            summary.total_units,
            summary.total_case_cost,
            summary.calculated_total,
        )?;
        if let Some(diff) = summary.reconciliation.diff() {
            write!(f, "  Invoice Total: ${:.2}  ", summary.invoice_total.unwrap_or(0.0))?;
            if summary.reconciliation.is_match() {
                write!(f, "Match")?;
            } else {
                write!(f, "Diff: ${diff:.2}")?;
            }
        }
        writeln!(f)
    }
}

fn confidence_label(band: ConfidenceBand) -> &'static str {
    match band {
        ConfidenceBand::High => "high",
        ConfidenceBand::Medium => "med",
        ConfidenceBand::Low => "LOW",
    }
}

fn flag_text(flags: &RowFlags) -> String {
    let mut parts = Vec::new();
    if flags.issues.math_error {
        parts.push("math");
    }
    if flags.issues.missing_critical {
        parts.push("missing-id");
    }
    if flags.low_margin {
        parts.push("low-margin");
    }
    parts.join(",")
}

fn money(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.2}")).unwrap_or_default()
}

fn number(v: Option<f64>, decimals: usize) -> String {
    v.map(|x| format!("{x:.decimals$}")).unwrap_or_default()
}

fn clip(v: Option<&str>, width: usize) -> String {
    v.unwrap_or("").chars().take(width).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InvoiceHeader, LineItem};

    fn sample(total: Option<f64>) -> InvoiceData {
        InvoiceData {
            invoice_header: InvoiceHeader {
                vendor_name: Some("Frito Lay".into()),
                invoice_number: Some("88123".into()),
                invoice_total: total,
                page_count: 1,
                ..InvoiceHeader::default()
            },
            line_items: vec![
                LineItem {
                    row_index: 1,
                    qty: Some(10.0),
                    item_code: Some("00025190".into()),
                    item_description: Some("Doritos".into()),
                    units: Some(1.0),
                    case_cost: Some(20.0),
                    case_discount: Some(2.0),
                    extended_case_cost: Some(180.0),
                    unit_retail: Some(2.5),
                    calculated_margin_percent: Some(-620.0),
                    confidence: 0.4,
                    ..LineItem::default()
                },
                LineItem {
                    row_index: 2,
                    qty: Some(1.0),
                    item_code: Some(String::new()),
                    item_description: Some("Widget".into()),
                    case_cost: Some(20.0),
                    extended_case_cost: Some(20.0),
                    calculated_margin_percent: Some(45.0),
                    confidence: 0.9,
                    ..LineItem::default()
                },
            ],
        }
    }

    fn render(data: &InvoiceData) -> String {
        Report::new(data, &LedgerSection::default()).to_string()
    }

    #[test]
    fn test_render_mismatch_footer() {
        let text = render(&sample(Some(220.0)));
        assert!(text.contains("Vendor: Frito Lay"));
        assert!(text.contains("Total Items: 2"));
        assert!(text.contains("Calculated Sum: $200.00"));
        assert!(text.contains("Diff: $-20.00"));
        assert!(text.contains("LOW"));
        assert!(text.contains("low-margin"));
        assert!(text.contains("missing-id"));
        assert!(text.lines().any(|l| l.starts_with("!  2")));
        assert!(text.lines().any(|l| l.starts_with("   1")));
    }

    #[test]
    fn test_render_match_and_no_total() {
        let text = render(&sample(Some(200.0)));
        assert!(text.contains("Match"));
        let text = render(&sample(None));
        assert!(!text.contains("Invoice Total"));
    }

    #[test]
    fn test_render_empty() {
        let text = render(&InvoiceData::default());
        assert!(text.contains("No line items found."));
        assert!(text.contains("Calculated Sum: $0.00"));
    }
}
