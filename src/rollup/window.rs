//! Refresh window selection.
//!
//! Every build is anchored to a month boundary: `as_of` is truncated to the first
//! day of its month, and only then moved back by the retention length.

use std::fmt;

use chrono::{Datelike, Months, NaiveDate};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("retention of {months} months before {as_of} is out of the supported date range")]
    OutOfRange { as_of: NaiveDate, months: u32 },
}

/// Half-open date range `[start, +inf)` of fact rows eligible for a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshWindow {
    pub start: NaiveDate,
}

impl RefreshWindow {
    /// Window covering the current month of `as_of` plus `retention_months` full months before it.
    ///
    /// `retention_months = 0` keeps only the current month.
    pub fn for_retention(as_of: NaiveDate, retention_months: u32) -> Result<Self, WindowError> {
        let out_of_range = || WindowError::OutOfRange {
            as_of,
            months: retention_months,
        };
        let month_start = as_of.with_day(1).ok_or_else(out_of_range)?;
        let start = month_start
            .checked_sub_months(Months::new(retention_months))
            .ok_or_else(out_of_range)?;
        Ok(Self { start })
    }

    /// Whether a fact dated `date` participates in the build.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start
    }
}

impl fmt::Display for RefreshWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, +inf)", self.start)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[rstest]
    #[case::mid_month(date(2024, 3, 15), 2, date(2024, 1, 1))]
    #[case::first_of_month(date(2024, 3, 1), 2, date(2024, 1, 1))]
    #[case::last_of_month(date(2024, 3, 31), 2, date(2024, 1, 1))]
    #[case::current_month_only(date(2024, 3, 31), 0, date(2024, 3, 1))]
    #[case::crosses_year(date(2024, 1, 10), 3, date(2023, 10, 1))]
    #[case::leap_day(date(2024, 2, 29), 12, date(2023, 2, 1))]
    #[case::long_retention(date(2024, 5, 31), 24, date(2022, 5, 1))]
    fn test_for_retention(
        #[case] as_of: NaiveDate,
        #[case] months: u32,
        #[case] expected: NaiveDate,
    ) {
        let window = RefreshWindow::for_retention(as_of, months).unwrap();
        assert_eq!(window.start, expected);
    }

    #[test]
    fn test_boundary_inclusion() {
        let window = RefreshWindow::for_retention(date(2024, 3, 15), 2).unwrap();
        assert!(window.contains(date(2024, 1, 1)));
        assert!(!window.contains(date(2023, 12, 31)));
        assert!(window.contains(date(2024, 3, 15)));
        assert!(window.contains(date(2030, 1, 1)));
    }

    #[test]
    fn test_out_of_range() {
        let err = RefreshWindow::for_retention(NaiveDate::MIN, 1).unwrap_err();
        assert!(matches!(err, WindowError::OutOfRange { months: 1, .. }));
    }

    #[test]
    fn test_display() {
        let window = RefreshWindow::for_retention(date(2024, 3, 15), 2).unwrap();
        assert_eq!(window.to_string(), "[2024-01-01, +inf)");
    }
}
