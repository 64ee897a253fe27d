// src/ledger/mod.rs

pub mod calc;
pub mod pipeline;
pub mod session;
pub mod totals;
pub mod validate;

use serde::{Deserialize, Deserializer, Serialize};
use time::Date;
use time::macros::format_description;
use tracing::warn;

/// Notes text stamped on rows the user adds by hand.
pub const MANUAL_ENTRY_NOTE: &str = "Manual Entry";

/// Invoice-level fields printed on the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceHeader {
    pub vendor_name: Option<String>,
    pub invoice_number: Option<String>,
    /// `YYYY-MM-DD`
    pub invoice_date: Option<String>,
    pub delivery_date: Option<String>,
    pub invoice_total: Option<f64>,
    #[serde(deserialize_with = "count_or_default")]
    pub page_count: u32,
}

impl InvoiceHeader {
    /// How many header fields were extracted (out of the optional ones).
    pub fn coverage(&self) -> (usize, usize) {
        let total = 5;
        let filled = [
            self.vendor_name.is_some(),
            self.invoice_number.is_some(),
            self.invoice_date.is_some(),
            self.delivery_date.is_some(),
            self.invoice_total.is_some(),
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (filled, total)
    }

    pub fn parsed_invoice_date(&self) -> Option<Date> {
        parse_iso_date(self.invoice_date.as_deref()?)
    }

    pub fn parsed_delivery_date(&self) -> Option<Date> {
        parse_iso_date(self.delivery_date.as_deref()?)
    }
}

fn parse_iso_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).ok()
}

/// One row of the purchase ledger.
///
/// Everything except `row_index` and `confidence` is nullable because the
/// extraction service may leave any cell blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItem {
    #[serde(deserialize_with = "count_or_default")]
    pub row_index: usize,
    /// Negative for returns.
    pub qty: Option<f64>,
    pub item_code: Option<String>,
    pub scan_code: Option<String>,
    pub item_description: Option<String>,
    pub department: Option<String>,
    pub price_group: Option<String>,
    pub product_category: Option<String>,
    /// Units per case.
    pub units: Option<f64>,
    pub case_cost: Option<f64>,
    /// Stored as a non-negative magnitude.
    pub case_discount: Option<f64>,
    pub cost_per_unit_after_discount: Option<f64>,
    pub extended_case_cost: Option<f64>,
    pub unit_retail: Option<f64>,
    pub extended_unit_retail: Option<f64>,
    pub size: Option<String>,
    pub default_margin_percent: Option<f64>,
    pub calculated_margin_percent: Option<f64>,
    #[serde(deserialize_with = "number_or_default")]
    pub confidence: f64,
    pub notes: Option<String>,
}

impl LineItem {
    /// A blank row as appended by the "add row" action.
    pub fn manual(row_index: usize) -> Self {
        Self {
            row_index,
            qty: Some(1.0),
            units: Some(1.0),
            case_cost: Some(0.0),
            case_discount: Some(0.0),
            cost_per_unit_after_discount: Some(0.0),
            extended_case_cost: Some(0.0),
            unit_retail: Some(0.0),
            extended_unit_retail: Some(0.0),
            confidence: 1.0,
            notes: Some(MANUAL_ENTRY_NOTE.to_string()),
            ..Self::default()
        }
    }

    /// Units per case as used in arithmetic: zero, unset or negative counts as one.
    pub fn effective_units(&self) -> f64 {
        match self.units {
            Some(u) if u.is_finite() && u > 0.0 => u,
            _ => 1.0,
        }
    }

    /// `qty × (case_cost − case_discount)` from the values currently stored.
    pub fn expected_extended_case_cost(&self) -> f64 {
        amount(self.qty) * (amount(self.case_cost) - amount(self.case_discount))
    }
}

/// Header plus ordered line items; the unit of state the editor holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    #[serde(default)]
    pub invoice_header: InvoiceHeader,
    pub line_items: Vec<LineItem>,
}

impl InvoiceData {
    /// Bring freshly extracted data into storage shape.
    ///
    /// Discounts become magnitudes, rows are numbered by position and
    /// confidence is clamped into [0, 1]. Derived fields are left alone so
    /// inconsistent source math still shows up in validation.
    pub fn normalized(mut self) -> Self {
        for item in &mut self.line_items {
            item.case_discount = item.case_discount.map(f64::abs);
            item.confidence = if item.confidence.is_finite() {
                item.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
        let header = &self.invoice_header;
        if header.invoice_date.is_some() && header.parsed_invoice_date().is_none() {
            warn!(invoice_date = ?header.invoice_date, "Invoice date is not in YYYY-MM-DD form");
        }
        if header.delivery_date.is_some() && header.parsed_delivery_date().is_none() {
            warn!(delivery_date = ?header.delivery_date, "Delivery date is not in YYYY-MM-DD form");
        }
        self.line_items = renumbered(self.line_items);
        self
    }
}

/// Reassign `row_index` so it matches 1-based array position.
pub(crate) fn renumbered(mut items: Vec<LineItem>) -> Vec<LineItem> {
    for (i, item) in items.iter_mut().enumerate() {
        item.row_index = i + 1;
    }
    items
}

/// Counts arrive from the model as `null`, `2` or `2.0`. Anything that is not
/// a non-negative whole number reads as zero.
fn count_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + Default,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw
        .filter(|x| x.is_finite() && *x >= 0.0 && x.fract() == 0.0)
        .and_then(|x| T::try_from(x as u64).ok())
        .unwrap_or_default())
}

fn number_or_default<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}

/// Null and non-finite amounts count as zero.
pub(crate) fn amount(v: Option<f64>) -> f64 {
    match v {
        Some(x) if x.is_finite() => x,
        _ => 0.0,
    }
}
