//! Rollup definitions.
//!
//! Each `[[rollups]]` table declares one materialized rollup. When no table is
//! present the built-in catalog is used.
//!
//! # Example
//!
//! ```toml
//! [[rollups]]
//! name = "storage_by_account_region"
//! line_item_type = "storage"
//! dimensions = ["account_id", "region"]
//! retention_months = 2
//!
//! [rollups.aggregates]
//! currency = "representative_by_majority"
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    models::{Dimension, Granularity},
    rollup::AggregateAssignment,
};

/// Declarative definition of one rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollupDefinition {
    /// Unique name; also the dataset key in the rollup table.
    pub name: String,

    /// Facts whose `line_item_type` equals this value are aggregated.
    pub line_item_type: String,

    /// Grouping dimensions in declaration order. Determines output order and the
    /// uniqueness key together with the period.
    #[serde(default)]
    pub dimensions: Vec<Dimension>,

    /// Months kept before the current month on every build.
    /// Default: 2
    #[serde(default = "default_retention_months")]
    pub retention_months: u32,

    #[serde(default)]
    pub granularity: Granularity,

    #[serde(default)]
    pub aggregates: AggregateAssignment,
}

impl RollupDefinition {
    pub fn new(
        name: impl Into<String>,
        line_item_type: impl Into<String>,
        dimensions: Vec<Dimension>,
    ) -> Self {
        Self {
            name: name.into(),
            line_item_type: line_item_type.into(),
            dimensions,
            retention_months: default_retention_months(),
            granularity: Granularity::default(),
            aggregates: AggregateAssignment::default(),
        }
    }

    pub fn with_retention_months(mut self, months: u32) -> Self {
        self.retention_months = months;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_aggregates(mut self, aggregates: AggregateAssignment) -> Self {
        self.aggregates = aggregates;
        self
    }
}

fn default_retention_months() -> u32 {
    2
}
