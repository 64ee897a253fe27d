// src/ledger/calc.rs

use super::{LineItem, amount};
use serde::{Deserialize, Serialize};

/// Every user-editable column of a line item.
///
/// Derived columns, `row_index` and `confidence` are not editable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Qty,
    ItemCode,
    ScanCode,
    ItemDescription,
    Department,
    PriceGroup,
    ProductCategory,
    Units,
    CaseCost,
    CaseDiscount,
    UnitRetail,
    Size,
    DefaultMarginPercent,
    Notes,
}

/// Fields whose edit recomputes the derived money columns.
pub const PRICING_FIELDS: [Field; 5] = [
    Field::Qty,
    Field::CaseCost,
    Field::CaseDiscount,
    Field::Units,
    Field::UnitRetail,
];

impl Field {
    #[cfg(test)]
    pub const ALL: [Field; 14] = [
        Field::Qty,
        Field::ItemCode,
        Field::ScanCode,
        Field::ItemDescription,
        Field::Department,
        Field::PriceGroup,
        Field::ProductCategory,
        Field::Units,
        Field::CaseCost,
        Field::CaseDiscount,
        Field::UnitRetail,
        Field::Size,
        Field::DefaultMarginPercent,
        Field::Notes,
    ];

    pub fn is_pricing(self) -> bool {
        PRICING_FIELDS.contains(&self)
    }

    /// Write `value` into the column this field names.
    fn assign(self, row: &mut LineItem, value: &CellValue) {
        match self {
            Field::Qty => row.qty = value.as_number(),
            Field::Units => row.units = value.as_number(),
            Field::CaseCost => row.case_cost = value.as_number(),
            Field::CaseDiscount => row.case_discount = value.as_number().map(f64::abs),
            Field::UnitRetail => row.unit_retail = value.as_number(),
            Field::DefaultMarginPercent => row.default_margin_percent = value.as_number(),
            Field::ItemCode => row.item_code = value.as_text(),
            Field::ScanCode => row.scan_code = value.as_text(),
            Field::ItemDescription => row.item_description = value.as_text(),
            Field::Department => row.department = value.as_text(),
            Field::PriceGroup => row.price_group = value.as_text(),
            Field::ProductCategory => row.product_category = value.as_text(),
            Field::Size => row.size = value.as_text(),
            Field::Notes => row.notes = value.as_text(),
        }
    }
}

/// A value typed into a cell. JSON numbers, strings and `null` map directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Empty,
}

impl CellValue {
    /// Numeric reading of the cell; unparsable or non-finite input is unset.
    pub fn as_number(&self) -> Option<f64> {
        let n = match self {
            CellValue::Number(n) => *n,
            CellValue::Text(s) => s.trim().parse::<f64>().ok()?,
            CellValue::Empty => return None,
        };
        n.is_finite().then_some(n)
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Empty => None,
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

/// Apply one cell edit to a copy of `row` and recompute what depends on it.
pub fn recompute(row: &LineItem, field: Field, value: &CellValue) -> LineItem {
    let mut next = row.clone();
    field.assign(&mut next, value);
    if field.is_pricing() {
        refresh_derived(&mut next);
    }
    next
}

/// Recompute the derived money columns from the row's stored inputs.
///
/// The margin is only touched when unit retail is positive. A product that
/// overflows is stored as unset.
pub fn refresh_derived(row: &mut LineItem) {
    let qty = amount(row.qty);
    let net_case_cost = amount(row.case_cost) - amount(row.case_discount).abs();
    let units = row.effective_units();
    let unit_cost = net_case_cost / units;
    let retail = amount(row.unit_retail);

    row.cost_per_unit_after_discount = finite(unit_cost);
    row.extended_case_cost = finite(qty * net_case_cost);
    row.extended_unit_retail = finite(qty * units * retail);

    if retail > 0.0 {
        if let Some(margin) = finite((retail - unit_cost) / retail * 100.0) {
            row.calculated_margin_percent = Some(margin);
        }
    }
}

fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}
