use async_trait::async_trait;
use chrono::NaiveDate;

use super::DateRange;
use crate::{
    db::error::DbResult,
    models::{Dimension, Generation, RollupRow},
};

/// A complete replacement for the in-window slice of one rollup dataset.
#[derive(Debug, Clone)]
pub struct Publication {
    pub rollup: String,
    pub tenant: String,
    /// Dimensions the rollup groups by, in declaration order.
    pub dimensions: Vec<Dimension>,
    /// Rows with `usage_start >= window_start` are replaced; older rows are kept.
    pub window_start: NaiveDate,
    pub rows: Vec<RollupRow>,
}

#[async_trait]
pub trait RollupRepo: Send + Sync {
    /// Replace the in-window slice of a rollup dataset in one transaction.
    ///
    /// Deletes every row of (rollup, tenant) with `usage_start >= window_start`,
    /// inserts the new rows and bumps the generation record before committing.
    /// A duplicate (period, dimension key) fails with `DbError::Conflict` and
    /// rolls the whole publish back.
    async fn replace_window(&self, publication: Publication) -> DbResult<Generation>;

    /// Published rows whose `usage_start` falls in the range, ordered by period then id.
    async fn list_rows(
        &self,
        rollup: &str,
        tenant: &str,
        range: DateRange,
    ) -> DbResult<Vec<RollupRow>>;

    /// Latest publication record, if the dataset was ever published.
    async fn get_generation(&self, rollup: &str, tenant: &str) -> DbResult<Option<Generation>>;
}
