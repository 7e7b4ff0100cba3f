//! Decoding of stored text values shared by both backends.
//!
//! Facts are read as text on both SQLite and PostgreSQL so the NaN marker and
//! malformed numerics surface the same way regardless of the store.

use std::str::FromStr;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    db::error::{DbError, DbResult},
    models::UsageAmount,
};

/// Parse a decimal stored as text.
///
/// A value that does not parse (including the NaN marker) is reported as a
/// validation error naming the column.
pub fn parse_decimal(column: &str, s: &str) -> DbResult<Decimal> {
    Decimal::from_str(s.trim())
        .map_err(|e| DbError::Validation(format!("{column}: cannot parse {s:?} as numeric: {e}")))
}

/// Parse a usage amount, accepting the NaN marker.
pub fn parse_usage_amount(s: &str) -> DbResult<UsageAmount> {
    UsageAmount::from_str(s).map_err(|e| {
        DbError::Validation(format!("usage_amount: cannot parse {s:?} as numeric: {e}"))
    })
}

/// Parse a stored ingestion source identifier.
pub fn parse_source_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s.trim())
        .map_err(|e| DbError::Validation(format!("source_uuid: invalid identifier {s:?}: {e}")))
}
