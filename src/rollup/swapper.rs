//! Publishes a built rollup over the previous generation.

use std::{collections::HashSet, sync::Arc};

use super::{BuildScope, RefreshWindow, RollupError, builder::BuiltRollup};
use crate::{
    config::RollupDefinition,
    db::{Publication, RollupRepo},
    models::{Generation, RollupRow, dimension_key},
};

/// Replaces the in-window slice of one (rollup, tenant) dataset in a single
/// store transaction. Readers keep seeing the previous generation until commit.
#[derive(Clone)]
pub struct ViewSwapper {
    rollups: Arc<dyn RollupRepo>,
}

impl ViewSwapper {
    pub fn new(rollups: Arc<dyn RollupRepo>) -> Self {
        Self { rollups }
    }

    pub async fn publish(
        &self,
        definition: &RollupDefinition,
        tenant: &str,
        window: RefreshWindow,
        built: &BuiltRollup,
    ) -> Result<Generation, RollupError> {
        let scope = BuildScope::new(&definition.name, tenant).with_window(window.start);
        let rows: Vec<RollupRow> = built.rows().collect();
        check_batch(&scope, built, window, &rows)?;

        let publication = Publication {
            rollup: definition.name.clone(),
            tenant: tenant.to_string(),
            dimensions: built.dimensions().to_vec(),
            window_start: window.start,
            rows,
        };

        self.rollups
            .replace_window(publication)
            .await
            .map_err(|e| RollupError::from_db(scope, e))
    }
}

/// Rejects batches the store would refuse or that would touch rows outside the window.
fn check_batch(
    scope: &BuildScope,
    built: &BuiltRollup,
    window: RefreshWindow,
    rows: &[RollupRow],
) -> Result<(), RollupError> {
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        let key = dimension_key(built.dimensions(), &row.dimensions);
        if row.usage_start < window.start {
            return Err(RollupError::Consistency {
                scope: scope.clone(),
                key: Some(format!("{} {}", row.usage_start, key)),
                message: "row starts before the refresh window".to_string(),
            });
        }
        if !seen.insert((row.usage_start, key.clone())) {
            return Err(RollupError::Consistency {
                scope: scope.clone(),
                key: Some(format!("{} {}", row.usage_start, key)),
                message: "duplicate (period, dimension key) in build output".to_string(),
            });
        }
    }
    Ok(())
}
