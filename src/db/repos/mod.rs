mod facts;
mod rollups;

use chrono::NaiveDate;
pub use facts::*;
pub use rollups::*;

/// Inclusive date range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Range covering every date both backends can store as text or `DATE`.
    pub fn all() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN),
            end: NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX),
        }
    }
}
