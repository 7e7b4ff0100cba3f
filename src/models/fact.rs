use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A usage quantity as reported by the billing export.
///
/// Upstream exports occasionally carry a "not-a-number" marker instead of a
/// real quantity. The marker is kept distinct from zero so aggregation policies
/// can decide how to treat it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageAmount {
    Value(Decimal),
    #[serde(rename = "nan")]
    NaN,
}

impl UsageAmount {
    pub fn is_nan(&self) -> bool {
        matches!(self, UsageAmount::NaN)
    }

    /// The numeric value, or `None` for the NaN marker.
    pub fn value(&self) -> Option<Decimal> {
        match self {
            UsageAmount::Value(v) => Some(*v),
            UsageAmount::NaN => None,
        }
    }
}

impl From<Decimal> for UsageAmount {
    fn from(value: Decimal) -> Self {
        UsageAmount::Value(value)
    }
}

impl FromStr for UsageAmount {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("nan") {
            return Ok(UsageAmount::NaN);
        }
        Decimal::from_str(trimmed).map(UsageAmount::Value)
    }
}

impl fmt::Display for UsageAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageAmount::Value(v) => write!(f, "{}", v),
            UsageAmount::NaN => f.write_str("NaN"),
        }
    }
}

/// One raw billing line item for one day.
///
/// Fact rows are owned by the ingestion pipeline; the rollup engine only reads them.
/// Dimension columns are never null: upstream normalizes missing values to `""`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    /// Tenant (customer schema) the line item belongs to.
    pub tenant: String,
    pub usage_date: NaiveDate,
    /// Category tag such as "storage" or "compute"; rollups filter on this.
    pub line_item_type: String,
    pub account_id: String,
    pub region: String,
    pub service: String,
    pub instance_type: String,
    pub usage_amount: UsageAmount,
    pub unit: String,
    pub unblended_cost: Decimal,
    pub markup_cost: Decimal,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Ingestion batch that produced the row.
    pub source_uuid: Uuid,
}

/// Read-only scan predicate handed to the fact store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactScan {
    pub tenant: String,
    pub line_item_type: String,
    /// Inclusive lower bound on `usage_date`; there is no upper bound.
    pub window_start: NaiveDate,
}
