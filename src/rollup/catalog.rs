//! The set of rollups the engine knows how to build.

use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use thiserror::Error;

use crate::{
    config::RollupDefinition,
    models::{Dimension, Granularity},
};

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("rollup name pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Invalid rollup name '{0}': must match ^[a-z][a-z0-9_]*$")]
    InvalidName(String),

    #[error("Duplicate rollup name '{0}'")]
    DuplicateName(String),

    #[error("Rollup '{0}' has an empty line_item_type")]
    EmptyLineItemType(String),

    #[error("Rollup '{rollup}' lists dimension '{dimension}' more than once")]
    DuplicateDimension { rollup: String, dimension: Dimension },
}

/// Validated, ordered rollup definitions.
#[derive(Debug, Clone)]
pub struct RollupCatalog {
    definitions: Vec<RollupDefinition>,
}

impl RollupCatalog {
    pub fn new(definitions: Vec<RollupDefinition>) -> Result<Self, CatalogError> {
        let mut names = HashSet::new();
        for def in &definitions {
            if !NAME_RE.is_match(&def.name) {
                return Err(CatalogError::InvalidName(def.name.clone()));
            }
            if !names.insert(def.name.as_str()) {
                return Err(CatalogError::DuplicateName(def.name.clone()));
            }
            if def.line_item_type.trim().is_empty() {
                return Err(CatalogError::EmptyLineItemType(def.name.clone()));
            }
            let mut seen = HashSet::new();
            for dimension in &def.dimensions {
                if !seen.insert(*dimension) {
                    return Err(CatalogError::DuplicateDimension {
                        rollup: def.name.clone(),
                        dimension: *dimension,
                    });
                }
            }
        }
        Ok(Self { definitions })
    }

    /// The default rollup table used when the config declares none.
    pub fn builtin() -> Self {
        use Dimension::*;

        Self {
            definitions: vec![
                RollupDefinition::new("storage_by_account_region", "storage", vec![AccountId, Region]),
                RollupDefinition::new(
                    "compute_by_account_instance_type",
                    "compute",
                    vec![AccountId, InstanceType],
                ),
                RollupDefinition::new("network_by_account_service", "network", vec![AccountId, Service]),
                RollupDefinition::new("database_by_account_service", "database", vec![AccountId, Service]),
                RollupDefinition::new("storage_monthly_by_account", "storage", vec![AccountId])
                    .with_granularity(Granularity::Monthly)
                    .with_retention_months(12),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<&RollupDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RollupDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
