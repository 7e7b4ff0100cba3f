//! Groups in-window facts by period and dimension key and aggregates each group.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use futures::{Stream, TryStreamExt};
use thiserror::Error;

use super::{
    RefreshWindow,
    aggregate::{AggregateError, GroupAggregate, Measures},
};
use crate::{
    config::RollupDefinition,
    db::{DbError, DbResult},
    models::{Dimension, DimensionValues, FactRow, Granularity, RollupRow},
};

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error(transparent)]
    Store(#[from] DbError),

    #[error("group {key}: {source}")]
    Aggregate {
        key: String,
        #[source]
        source: AggregateError,
    },
}

/// Period start followed by the grouped dimension values in declaration order.
type GroupKey = (NaiveDate, Vec<String>);

fn describe_key((period, values): &GroupKey) -> String {
    format!(
        "{} {}",
        period,
        serde_json::to_string(values).unwrap_or_default()
    )
}

/// Accumulates facts for one build.
pub struct RollupBuilder<'a> {
    definition: &'a RollupDefinition,
    window: RefreshWindow,
    groups: BTreeMap<GroupKey, GroupAggregate>,
    facts_scanned: u64,
    facts_skipped: u64,
}

impl<'a> RollupBuilder<'a> {
    pub fn new(definition: &'a RollupDefinition, window: RefreshWindow) -> Self {
        Self {
            definition,
            window,
            groups: BTreeMap::new(),
            facts_scanned: 0,
            facts_skipped: 0,
        }
    }

    /// Add one fact. Facts of another category or outside the window are counted
    /// as skipped and never aggregated.
    pub fn push(&mut self, fact: &FactRow) -> Result<(), BuilderError> {
        self.facts_scanned += 1;
        if fact.line_item_type != self.definition.line_item_type
            || !self.window.contains(fact.usage_date)
        {
            self.facts_skipped += 1;
            return Ok(());
        }

        let key: GroupKey = (
            self.definition.granularity.period_start(fact.usage_date),
            self.definition
                .dimensions
                .iter()
                .map(|d| d.value_of(fact).to_string())
                .collect(),
        );

        let aggregates = &self.definition.aggregates;
        let group = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| GroupAggregate::new(aggregates));
        group.add(fact).map_err(|source| BuilderError::Aggregate {
            key: describe_key(&key),
            source,
        })
    }

    /// Drain a fact stream into the builder. The first store or data error aborts.
    pub async fn aggregate<S>(&mut self, mut facts: S) -> Result<(), BuilderError>
    where
        S: Stream<Item = DbResult<FactRow>> + Unpin,
    {
        while let Some(fact) = facts.try_next().await? {
            self.push(&fact)?;
        }
        Ok(())
    }

    /// Close every group at fixed precision.
    pub fn finish(self) -> Result<BuiltRollup, BuilderError> {
        let groups = self
            .groups
            .into_iter()
            .map(|(key, aggregate)| match aggregate.finish() {
                Ok(measures) => Ok(BuiltGroup {
                    period_start: key.0,
                    values: key.1,
                    measures,
                }),
                Err(source) => Err(BuilderError::Aggregate {
                    key: describe_key(&key),
                    source,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BuiltRollup {
            dimensions: self.definition.dimensions.clone(),
            granularity: self.definition.granularity,
            groups,
            facts_scanned: self.facts_scanned,
            facts_skipped: self.facts_skipped,
        })
    }
}

#[derive(Debug, Clone)]
struct BuiltGroup {
    period_start: NaiveDate,
    values: Vec<String>,
    measures: Measures,
}

/// The complete output of one build, in (period, dimension values) order.
#[derive(Debug, Clone)]
pub struct BuiltRollup {
    dimensions: Vec<Dimension>,
    granularity: Granularity,
    groups: Vec<BuiltGroup>,
    pub facts_scanned: u64,
    pub facts_skipped: u64,
}

impl BuiltRollup {
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Output rows with dense ids starting at 1.
    pub fn rows(&self) -> impl Iterator<Item = RollupRow> + '_ {
        self.groups.iter().enumerate().map(|(i, group)| RollupRow {
            id: i as i64 + 1,
            usage_start: group.period_start,
            usage_end: self.granularity.period_end(group.period_start),
            dimensions: DimensionValues::from_key(&self.dimensions, &group.values),
            usage_amount: group.measures.usage_amount,
            unit: group.measures.unit.clone(),
            unblended_cost: group.measures.unblended_cost,
            markup_cost: group.measures.markup_cost,
            currency: group.measures.currency.clone(),
            source_uuid: group.measures.source_uuid,
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use rust_decimal::{Decimal, dec};
    use uuid::Uuid;

    use super::*;
    use crate::{
        models::UsageAmount,
        rollup::{AggregateAssignment, NumericPolicy},
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fact(day: NaiveDate, account: &str, region: &str, usage: UsageAmount, cost: Decimal) -> FactRow {
        FactRow {
            tenant: "acme".into(),
            usage_date: day,
            line_item_type: "storage".into(),
            account_id: account.into(),
            region: region.into(),
            service: "AmazonS3".into(),
            instance_type: String::new(),
            usage_amount: usage,
            unit: "GB-Mo".into(),
            unblended_cost: cost,
            markup_cost: Decimal::ZERO,
            currency: "USD".into(),
            source_uuid: Uuid::new_v4(),
        }
    }

    fn definition() -> RollupDefinition {
        RollupDefinition::new(
            "storage_by_account_region",
            "storage",
            vec![Dimension::AccountId, Dimension::Region],
        )
    }

    fn window() -> RefreshWindow {
        RefreshWindow::for_retention(date(2024, 3, 15), 2).unwrap()
    }

    #[test]
    fn test_groups_and_dense_ids_follow_output_order() {
        let def = definition();
        let mut builder = RollupBuilder::new(&def, window());
        for f in [
            fact(date(2024, 1, 2), "222", "us-east-1", UsageAmount::Value(dec!(1)), dec!(1)),
            fact(date(2024, 1, 1), "222", "us-east-1", UsageAmount::Value(dec!(1)), dec!(1)),
            fact(date(2024, 1, 1), "111", "us-west-2", UsageAmount::Value(dec!(1)), dec!(1)),
            fact(date(2024, 1, 1), "111", "eu-west-1", UsageAmount::Value(dec!(1)), dec!(1)),
            fact(date(2024, 1, 1), "111", "eu-west-1", UsageAmount::Value(dec!(2)), dec!(3)),
        ] {
            builder.push(&f).unwrap();
        }

        let built = builder.finish().unwrap();
        let rows: Vec<RollupRow> = built.rows().collect();
        let keys: Vec<(i64, NaiveDate, Option<&str>, Option<&str>)> = rows
            .iter()
            .map(|r| {
                (
                    r.id,
                    r.usage_start,
                    r.dimensions.account_id.as_deref(),
                    r.dimensions.region.as_deref(),
                )
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                (1, date(2024, 1, 1), Some("111"), Some("eu-west-1")),
                (2, date(2024, 1, 1), Some("111"), Some("us-west-2")),
                (3, date(2024, 1, 1), Some("222"), Some("us-east-1")),
                (4, date(2024, 1, 2), Some("222"), Some("us-east-1")),
            ]
        );
        assert_eq!(rows[0].usage_amount, dec!(3));
        assert_eq!(rows[0].unblended_cost, dec!(4));
        assert_eq!(rows[0].usage_end, rows[0].usage_start);
        assert_eq!(rows[0].dimensions.service, None);
    }

    #[test]
    fn test_skips_out_of_window_and_other_categories() {
        let def = definition();
        let mut builder = RollupBuilder::new(&def, window());
        let mut compute = fact(date(2024, 1, 5), "111", "us-east-1", UsageAmount::Value(dec!(1)), dec!(1));
        compute.line_item_type = "compute".into();

        builder
            .push(&fact(date(2023, 12, 31), "111", "us-east-1", UsageAmount::Value(dec!(1)), dec!(1)))
            .unwrap();
        builder
            .push(&fact(date(2024, 1, 1), "111", "us-east-1", UsageAmount::Value(dec!(1)), dec!(1)))
            .unwrap();
        builder.push(&compute).unwrap();

        let built = builder.finish().unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built.facts_scanned, 3);
        assert_eq!(built.facts_skipped, 2);
    }

    #[test]
    fn test_monthly_granularity() {
        let def = RollupDefinition::new("storage_monthly", "storage", vec![Dimension::AccountId])
            .with_granularity(Granularity::Monthly);
        let mut builder = RollupBuilder::new(&def, window());
        for day in [date(2024, 2, 1), date(2024, 2, 14), date(2024, 2, 29)] {
            builder
                .push(&fact(day, "111", "us-east-1", UsageAmount::Value(dec!(1)), dec!(2)))
                .unwrap();
        }

        let rows: Vec<RollupRow> = builder.finish().unwrap().rows().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].usage_start, date(2024, 2, 1));
        assert_eq!(rows[0].usage_end, date(2024, 2, 29));
        assert_eq!(rows[0].unblended_cost, dec!(6));
    }

    #[test]
    fn test_data_error_names_group() {
        let def = definition().with_aggregates(AggregateAssignment {
            usage_amount: NumericPolicy::Sum,
            ..Default::default()
        });
        let mut builder = RollupBuilder::new(&def, window());
        let err = builder
            .push(&fact(date(2024, 1, 3), "111", "us-east-1", UsageAmount::NaN, dec!(1)))
            .unwrap_err();

        match err {
            BuilderError::Aggregate { key, .. } => {
                assert_eq!(key, r#"2024-01-03 ["111","us-east-1"]"#)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[tokio::test]
    async fn test_aggregate_stream_stops_at_store_error() {
        let def = definition();
        let mut builder = RollupBuilder::new(&def, window());
        let facts = stream::iter(vec![
            Ok(fact(date(2024, 1, 1), "111", "us-east-1", UsageAmount::Value(dec!(1)), dec!(1))),
            Err(DbError::Sqlx(sqlx::Error::PoolTimedOut)),
            Ok(fact(date(2024, 1, 2), "111", "us-east-1", UsageAmount::Value(dec!(1)), dec!(1))),
        ]);

        let err = builder.aggregate(facts).await.unwrap_err();
        assert!(matches!(err, BuilderError::Store(DbError::Sqlx(_))));
        assert_eq!(builder.facts_scanned, 1);
    }

    #[test]
    fn test_empty_build() {
        let def = definition();
        let built = RollupBuilder::new(&def, window()).finish().unwrap();
        assert!(built.is_empty());
        assert_eq!(built.rows().count(), 0);
    }
}
