use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    db::error::DbResult,
    models::{FactRow, FactScan},
};

#[async_trait]
pub trait FactRepo: Send + Sync {
    /// Stream the fact rows matching a scan predicate.
    ///
    /// Rows are filtered by tenant, `line_item_type` and `usage_date >= window_start`.
    /// The stream is lazy; rows are decoded as they arrive and a value that cannot be
    /// decoded yields a `DbError::Validation` item.
    fn scan<'a>(&'a self, scan: &'a FactScan) -> BoxStream<'a, DbResult<FactRow>>;

    /// Distinct tenants that have at least one fact row.
    async fn list_tenants(&self) -> DbResult<Vec<String>>;

    /// Insert fact rows. Used by ingestion tooling and tests; the rollup
    /// engine never writes facts.
    /// Returns the number of rows inserted.
    async fn insert_batch(&self, facts: Vec<FactRow>) -> DbResult<usize>;
}
