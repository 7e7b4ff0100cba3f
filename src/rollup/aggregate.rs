//! Aggregate functions applied to each group of facts.
//!
//! Additive measures use a [`NumericPolicy`]. Fields that are expected (but not
//! guaranteed) to be constant within a group use a [`RepresentativePolicy`],
//! which picks one deterministic stand-in value instead of merging.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{FactRow, PrecisionError, UsageAmount, checked_sum, to_fixed_precision};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("{measure} is NaN but the rollup sums it without substitution")]
    NanInput { measure: &'static str },

    #[error("{measure}: {source}")]
    Precision {
        measure: &'static str,
        #[source]
        source: PrecisionError,
    },

    #[error("source_uuid representative {0:?} is not a valid identifier")]
    InvalidSourceUuid(String),
}

/// How an additive measure is summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericPolicy {
    /// Plain sum. A NaN input fails the build.
    Sum,
    /// NaN inputs contribute zero.
    SumNanAsZero,
}

/// How a representative value is chosen for a non-additive field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepresentativePolicy {
    /// Maximum under byte-wise string order, the same as the `C` collation.
    ///
    /// A PostgreSQL store whose database collation is a locale such as
    /// `en_US.UTF-8` orders text differently ("usd" against "USD", accented
    /// letters), so `ORDER BY` on the stored column may disagree with the
    /// value picked here.
    #[default]
    #[serde(rename = "representative_by_max_order", alias = "max_order")]
    MaxOrder,
    /// Minimum under byte-wise string order. Same collation caveat as `MaxOrder`.
    #[serde(rename = "representative_by_min_order", alias = "min_order")]
    MinOrder,
    /// Most frequent value; ties go to the maximum.
    #[serde(rename = "representative_by_majority", alias = "majority")]
    Majority,
}

/// Aggregate function assigned to each measure of a rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateAssignment {
    #[serde(default = "default_usage_policy")]
    pub usage_amount: NumericPolicy,
    #[serde(default = "default_cost_policy")]
    pub unblended_cost: NumericPolicy,
    #[serde(default = "default_cost_policy")]
    pub markup_cost: NumericPolicy,
    #[serde(default)]
    pub unit: RepresentativePolicy,
    #[serde(default)]
    pub currency: RepresentativePolicy,
    #[serde(default)]
    pub source_uuid: RepresentativePolicy,
}

impl Default for AggregateAssignment {
    fn default() -> Self {
        Self {
            usage_amount: default_usage_policy(),
            unblended_cost: default_cost_policy(),
            markup_cost: default_cost_policy(),
            unit: RepresentativePolicy::default(),
            currency: RepresentativePolicy::default(),
            source_uuid: RepresentativePolicy::default(),
        }
    }
}

fn default_usage_policy() -> NumericPolicy {
    NumericPolicy::SumNanAsZero
}

fn default_cost_policy() -> NumericPolicy {
    NumericPolicy::Sum
}

#[derive(Debug, Clone)]
struct NumericAccumulator {
    measure: &'static str,
    policy: NumericPolicy,
    total: Decimal,
}

impl NumericAccumulator {
    fn new(measure: &'static str, policy: NumericPolicy) -> Self {
        Self {
            measure,
            policy,
            total: Decimal::ZERO,
        }
    }

    fn add(&mut self, value: UsageAmount) -> Result<(), AggregateError> {
        let value = match (value, self.policy) {
            (UsageAmount::Value(v), _) => v,
            (UsageAmount::NaN, NumericPolicy::SumNanAsZero) => return Ok(()),
            (UsageAmount::NaN, NumericPolicy::Sum) => {
                return Err(AggregateError::NanInput {
                    measure: self.measure,
                });
            }
        };
        self.total = checked_sum(self.total, value).map_err(|source| AggregateError::Precision {
            measure: self.measure,
            source,
        })?;
        Ok(())
    }

    fn finish(self) -> Result<Decimal, AggregateError> {
        to_fixed_precision(self.total).map_err(|source| AggregateError::Precision {
            measure: self.measure,
            source,
        })
    }
}

#[derive(Debug, Clone)]
struct RepresentativeAccumulator {
    policy: RepresentativePolicy,
    best: Option<String>,
    counts: HashMap<String, u64>,
}

impl RepresentativeAccumulator {
    fn new(policy: RepresentativePolicy) -> Self {
        Self {
            policy,
            best: None,
            counts: HashMap::new(),
        }
    }

    fn add(&mut self, value: &str) {
        match self.policy {
            RepresentativePolicy::MaxOrder => {
                if self.best.as_deref().is_none_or(|best| value > best) {
                    self.best = Some(value.to_string());
                }
            }
            RepresentativePolicy::MinOrder => {
                if self.best.as_deref().is_none_or(|best| value < best) {
                    self.best = Some(value.to_string());
                }
            }
            RepresentativePolicy::Majority => {
                *self.counts.entry(value.to_string()).or_default() += 1;
            }
        }
    }

    fn finish(self) -> String {
        match self.policy {
            RepresentativePolicy::MaxOrder | RepresentativePolicy::MinOrder => {
                self.best.unwrap_or_default()
            }
            RepresentativePolicy::Majority => self
                .counts
                .into_iter()
                .max_by(|(a, a_count), (b, b_count)| a_count.cmp(b_count).then_with(|| a.cmp(b)))
                .map(|(value, _)| value)
                .unwrap_or_default(),
        }
    }
}

/// Aggregated measures of one group, already at fixed precision.
#[derive(Debug, Clone, PartialEq)]
pub struct Measures {
    pub usage_amount: Decimal,
    pub unblended_cost: Decimal,
    pub markup_cost: Decimal,
    pub unit: String,
    pub currency: String,
    pub source_uuid: Uuid,
}

/// Running aggregate for one (period, dimension key) group.
#[derive(Debug, Clone)]
pub struct GroupAggregate {
    usage_amount: NumericAccumulator,
    unblended_cost: NumericAccumulator,
    markup_cost: NumericAccumulator,
    unit: RepresentativeAccumulator,
    currency: RepresentativeAccumulator,
    source_uuid: RepresentativeAccumulator,
}

impl GroupAggregate {
    pub fn new(assignment: &AggregateAssignment) -> Self {
        Self {
            usage_amount: NumericAccumulator::new("usage_amount", assignment.usage_amount),
            unblended_cost: NumericAccumulator::new("unblended_cost", assignment.unblended_cost),
            markup_cost: NumericAccumulator::new("markup_cost", assignment.markup_cost),
            unit: RepresentativeAccumulator::new(assignment.unit),
            currency: RepresentativeAccumulator::new(assignment.currency),
            source_uuid: RepresentativeAccumulator::new(assignment.source_uuid),
        }
    }

    pub fn add(&mut self, fact: &FactRow) -> Result<(), AggregateError> {
        self.usage_amount.add(fact.usage_amount)?;
        self.unblended_cost.add(fact.unblended_cost.into())?;
        self.markup_cost.add(fact.markup_cost.into())?;
        self.unit.add(&fact.unit);
        self.currency.add(&fact.currency);
        // Hyphenated lowercase, the identifier's text form in the store.
        self.source_uuid.add(&fact.source_uuid.hyphenated().to_string());
        Ok(())
    }

    pub fn finish(self) -> Result<Measures, AggregateError> {
        let source_text = self.source_uuid.finish();
        let source_uuid = Uuid::parse_str(&source_text)
            .map_err(|_| AggregateError::InvalidSourceUuid(source_text))?;

        Ok(Measures {
            usage_amount: self.usage_amount.finish()?,
            unblended_cost: self.unblended_cost.finish()?,
            markup_cost: self.markup_cost.finish()?,
            unit: self.unit.finish(),
            currency: self.currency.finish(),
            source_uuid,
        })
    }
}
