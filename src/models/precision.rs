//! Fixed-point precision for monetary and usage figures.
//!
//! Rollup measures are stored as `NUMERIC(24, 9)`: 24 significant digits,
//! 9 of them after the decimal point. Every aggregated value passes through
//! [`to_fixed_precision`] before it is published so repeated builds over the
//! same facts produce identical values.

use rust_decimal::{Decimal, RoundingStrategy};

/// Total number of significant digits.
pub const NUMERIC_PRECISION: u32 = 24;

/// Digits after the decimal point.
pub const NUMERIC_SCALE: u32 = 9;

/// Digits allowed before the decimal point.
const INTEGER_DIGITS: u32 = NUMERIC_PRECISION - NUMERIC_SCALE;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrecisionError {
    #[error("numeric overflow: {0} does not fit in NUMERIC(24, 9)")]
    Overflow(Decimal),

    #[error("numeric overflow while summing")]
    SumOverflow,
}

/// Round to 9 fractional digits and reject values with more than 15 integer digits.
///
/// Midpoints round away from zero, matching the database's numeric cast.
pub fn to_fixed_precision(value: Decimal) -> Result<Decimal, PrecisionError> {
    let mut rounded =
        value.round_dp_with_strategy(NUMERIC_SCALE, RoundingStrategy::MidpointAwayFromZero);
    let limit = Decimal::from_i128_with_scale(10i128.pow(INTEGER_DIGITS), 0);
    if rounded.abs() >= limit {
        return Err(PrecisionError::Overflow(value));
    }
    rounded.rescale(NUMERIC_SCALE);
    Ok(rounded)
}

/// Add with overflow detection.
pub fn checked_sum(acc: Decimal, value: Decimal) -> Result<Decimal, PrecisionError> {
    acc.checked_add(value).ok_or(PrecisionError::SumOverflow)
}
