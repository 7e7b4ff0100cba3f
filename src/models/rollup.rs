use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::FactRow;

/// A grouping dimension a rollup may key on.
///
/// The set is deliberately closed: every dimension maps to one column of the
/// fact table and one nullable column of the rollup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    AccountId,
    Region,
    Service,
    InstanceType,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::AccountId,
        Dimension::Region,
        Dimension::Service,
        Dimension::InstanceType,
    ];

    /// Column name in both the fact and rollup tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::AccountId => "account_id",
            Dimension::Region => "region",
            Dimension::Service => "service",
            Dimension::InstanceType => "instance_type",
        }
    }

    /// Value of this dimension on a fact row.
    pub fn value_of<'a>(&self, fact: &'a FactRow) -> &'a str {
        match self {
            Dimension::AccountId => &fact.account_id,
            Dimension::Region => &fact.region,
            Dimension::Service => &fact.service,
            Dimension::InstanceType => &fact.instance_type,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dimension values of one rollup row. `None` means the rollup does not group by it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
}

impl DimensionValues {
    /// Build from the group key values, paired with the rollup's dimension list.
    pub fn from_key(dimensions: &[Dimension], values: &[String]) -> Self {
        let mut out = Self::default();
        for (dimension, value) in dimensions.iter().zip(values) {
            out.set(*dimension, value.clone());
        }
        out
    }

    pub fn get(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::AccountId => self.account_id.as_deref(),
            Dimension::Region => self.region.as_deref(),
            Dimension::Service => self.service.as_deref(),
            Dimension::InstanceType => self.instance_type.as_deref(),
        }
    }

    pub fn set(&mut self, dimension: Dimension, value: String) {
        match dimension {
            Dimension::AccountId => self.account_id = Some(value),
            Dimension::Region => self.region = Some(value),
            Dimension::Service => self.service = Some(value),
            Dimension::InstanceType => self.instance_type = Some(value),
        }
    }
}

/// Canonical text form of a dimension key, used by the storage uniqueness constraint.
///
/// Encodes the grouped values in declaration order as a JSON array, so
/// `["acct-1","us-east-1"]` for a rollup grouped by account then region.
pub fn dimension_key(dimensions: &[Dimension], values: &DimensionValues) -> String {
    let ordered: Vec<&str> = dimensions
        .iter()
        .map(|d| values.get(*d).unwrap_or_default())
        .collect();
    serde_json::to_string(&ordered).unwrap_or_default()
}

/// Size of the aggregation period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One bucket per usage day; `usage_start == usage_end`.
    #[default]
    Daily,
    /// One bucket per calendar month, from the first to the last day.
    Monthly,
}

impl Granularity {
    /// Start of the period containing `date`.
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => date,
            Granularity::Monthly => date.with_day(1).unwrap_or(date),
        }
    }

    /// Last day of the period starting at `start`.
    pub fn period_end(&self, start: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => start,
            Granularity::Monthly => start
                .checked_add_months(chrono::Months::new(1))
                .and_then(|next| next.pred_opt())
                .unwrap_or(start),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
        }
    }
}

/// One published rollup row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRow {
    /// Dense rank over the build's output ordering. Recomputed on every build;
    /// not stable across generations.
    pub id: i64,
    pub usage_start: NaiveDate,
    pub usage_end: NaiveDate,
    #[serde(flatten)]
    pub dimensions: DimensionValues,
    pub usage_amount: Decimal,
    pub unit: String,
    pub unblended_cost: Decimal,
    pub markup_cost: Decimal,
    pub currency: String,
    pub source_uuid: Uuid,
}

/// Publication record for one (rollup, tenant) dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub rollup: String,
    pub tenant: String,
    /// Incremented on every successful publish, starting at 1.
    pub generation: i64,
    pub window_start: NaiveDate,
    pub row_count: i64,
    pub first_built_at: DateTime<Utc>,
    pub last_built_at: DateTime<Utc>,
}
