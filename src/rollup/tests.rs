//! End-to-end builds against SQLite stores.

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::{StreamExt, stream, stream::BoxStream};
use rust_decimal::dec;
use sqlx::SqlitePool;
use tokio::sync::{Notify, Semaphore};

use super::*;
use crate::{
    config::RollupDefinition,
    db::{
        DateRange, DbPool, DbResult, FactRepo,
        tests::harness::{
            create_sqlite_file_pool, create_sqlite_pool, date, fact, run_sqlite_migrations,
        },
    },
    models::{Dimension, FactRow, FactScan, RollupRow, UsageAmount},
};

const ROLLUP: &str = "storage_by_account";
const STRICT_ROLLUP: &str = "storage_by_account_strict";

fn as_of() -> NaiveDate {
    date(2024, 3, 15)
}

fn catalog() -> RollupCatalog {
    RollupCatalog::new(vec![
        RollupDefinition::new(ROLLUP, "storage", vec![Dimension::AccountId]),
        RollupDefinition::new(STRICT_ROLLUP, "storage", vec![Dimension::AccountId])
            .with_aggregates(AggregateAssignment {
                usage_amount: NumericPolicy::Sum,
                ..Default::default()
            }),
    ])
    .expect("valid catalog")
}

async fn setup() -> (SqlitePool, DbPool) {
    let pool = create_sqlite_pool().await;
    run_sqlite_migrations(&pool).await;
    let db = DbPool::from_sqlite(pool.clone());
    (pool, db)
}

async fn seed(db: &DbPool, facts: Vec<FactRow>) {
    db.facts()
        .insert_batch(facts)
        .await
        .expect("Failed to seed facts");
}

async fn published(db: &DbPool, rollup: &str, tenant: &str) -> Vec<RollupRow> {
    db.rollups()
        .list_rows(rollup, tenant, DateRange::all())
        .await
        .expect("Failed to list rows")
}

#[tokio::test]
async fn test_nan_usage_contributes_zero_but_cost_is_summed() {
    let (_pool, db) = setup().await;
    seed(
        &db,
        vec![
            fact("acme", date(2024, 2, 3), "111", UsageAmount::NaN, dec!(5)),
            fact("acme", date(2024, 2, 3), "111", UsageAmount::Value(dec!(10)), dec!(7)),
        ],
    )
    .await;
    let engine = RollupEngine::new(&db, catalog());

    let report = engine.build(ROLLUP, "acme", as_of()).await.unwrap();
    assert_eq!(report.outcome, BuildOutcome::Published);
    assert_eq!(report.generation, Some(1));
    assert_eq!(report.rows_published, 1);

    let rows = published(&db, ROLLUP, "acme").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, 1);
    assert_eq!(rows[0].usage_amount, dec!(10));
    assert_eq!(rows[0].unblended_cost, dec!(12));
    assert_eq!(rows[0].usage_start, date(2024, 2, 3));
    assert_eq!(rows[0].usage_end, date(2024, 2, 3));
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let (_pool, db) = setup().await;
    seed(
        &db,
        vec![
            fact("acme", date(2024, 1, 1), "222", UsageAmount::Value(dec!(1.5)), dec!(0.333333333)),
            fact("acme", date(2024, 1, 1), "111", UsageAmount::Value(dec!(2)), dec!(4)),
            fact("acme", date(2024, 2, 9), "111", UsageAmount::NaN, dec!(1)),
        ],
    )
    .await;
    let engine = RollupEngine::new(&db, catalog());

    let first = engine.build(ROLLUP, "acme", as_of()).await.unwrap();
    let before = published(&db, ROLLUP, "acme").await;
    let second = engine.build(ROLLUP, "acme", as_of()).await.unwrap();
    let after = published(&db, ROLLUP, "acme").await;

    assert_eq!(before, after);
    assert_eq!(second.generation, first.generation.map(|g| g + 1));
    let ids: Vec<i64> = after.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_window_boundary_is_inclusive_of_month_start() {
    let (_pool, db) = setup().await;
    seed(
        &db,
        vec![
            fact("acme", date(2023, 12, 31), "111", UsageAmount::Value(dec!(1)), dec!(100)),
            fact("acme", date(2024, 1, 1), "111", UsageAmount::Value(dec!(1)), dec!(1)),
        ],
    )
    .await;
    let engine = RollupEngine::new(&db, catalog());

    let report = engine.build(ROLLUP, "acme", as_of()).await.unwrap();
    assert_eq!(report.window_start, date(2024, 1, 1));

    let rows = published(&db, ROLLUP, "acme").await;
    let days: Vec<NaiveDate> = rows.iter().map(|r| r.usage_start).collect();
    assert_eq!(days, vec![date(2024, 1, 1)]);
    assert_eq!(rows[0].unblended_cost, dec!(1));
}

#[tokio::test]
async fn test_currency_representative_is_max_order() {
    let (_pool, db) = setup().await;
    let usd = fact("acme", date(2024, 2, 1), "111", UsageAmount::Value(dec!(1)), dec!(1));
    let eur = FactRow {
        currency: "EUR".to_string(),
        ..usd.clone()
    };
    seed(&db, vec![eur, usd]).await;
    let engine = RollupEngine::new(&db, catalog());

    for _ in 0..2 {
        engine.build(ROLLUP, "acme", as_of()).await.unwrap();
        let rows = published(&db, ROLLUP, "acme").await;
        assert_eq!(rows[0].currency, "USD");
    }
}

#[tokio::test]
async fn test_data_error_keeps_prior_generation() {
    let (pool, db) = setup().await;
    seed(
        &db,
        vec![fact("acme", date(2024, 2, 1), "111", UsageAmount::Value(dec!(1)), dec!(3))],
    )
    .await;
    let engine = RollupEngine::new(&db, catalog());
    engine.build(ROLLUP, "acme", as_of()).await.unwrap();
    let before = published(&db, ROLLUP, "acme").await;
    let generation = db.rollups().get_generation(ROLLUP, "acme").await.unwrap();

    seed(
        &db,
        vec![fact("acme", date(2024, 2, 2), "111", UsageAmount::Value(dec!(1)), dec!(1))],
    )
    .await;
    sqlx::query("UPDATE cost_line_items SET unblended_cost = 'NaN' WHERE usage_date = '2024-02-02'")
        .execute(&pool)
        .await
        .expect("Failed to corrupt row");

    let err = engine.build(ROLLUP, "acme", as_of()).await.unwrap_err();
    assert!(matches!(err, RollupError::Data { .. }), "{err}");
    assert!(!err.is_retryable());
    assert_eq!(
        err.scope().and_then(|s| s.window_start),
        Some(date(2024, 1, 1))
    );

    assert_eq!(published(&db, ROLLUP, "acme").await, before);
    assert_eq!(
        db.rollups().get_generation(ROLLUP, "acme").await.unwrap(),
        generation
    );
}

#[tokio::test]
async fn test_nan_under_plain_sum_fails_with_group_key() {
    let (_pool, db) = setup().await;
    seed(
        &db,
        vec![fact("acme", date(2024, 2, 4), "111", UsageAmount::NaN, dec!(1))],
    )
    .await;
    let engine = RollupEngine::new(&db, catalog());

    let err = engine.build(STRICT_ROLLUP, "acme", as_of()).await.unwrap_err();
    match &err {
        RollupError::Data { key, .. } => {
            assert_eq!(key.as_deref(), Some(r#"2024-02-04 ["111"]"#))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(
        db.rollups()
            .get_generation(STRICT_ROLLUP, "acme")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_rows_before_window_are_untouched() {
    let (_pool, db) = setup().await;
    seed(
        &db,
        vec![
            fact("acme", date(2024, 1, 10), "111", UsageAmount::Value(dec!(1)), dec!(5)),
            fact("acme", date(2024, 2, 10), "111", UsageAmount::Value(dec!(1)), dec!(6)),
        ],
    )
    .await;
    let engine = RollupEngine::new(&db, catalog());
    engine.build(ROLLUP, "acme", as_of()).await.unwrap();

    // A late correction to January arrives after January left the window.
    seed(
        &db,
        vec![
            fact("acme", date(2024, 1, 10), "111", UsageAmount::Value(dec!(1)), dec!(50)),
            fact("acme", date(2024, 2, 10), "111", UsageAmount::Value(dec!(1)), dec!(60)),
        ],
    )
    .await;
    let report = engine.build(ROLLUP, "acme", date(2024, 4, 2)).await.unwrap();
    assert_eq!(report.window_start, date(2024, 2, 1));

    let rows = published(&db, ROLLUP, "acme").await;
    let costs: Vec<(NaiveDate, _)> = rows.iter().map(|r| (r.usage_start, r.unblended_cost)).collect();
    assert_eq!(
        costs,
        vec![(date(2024, 1, 10), dec!(5)), (date(2024, 2, 10), dec!(66))]
    );
}

#[tokio::test]
async fn test_tenants_are_built_independently() {
    let (_pool, db) = setup().await;
    seed(
        &db,
        vec![
            fact("acme", date(2024, 2, 1), "111", UsageAmount::Value(dec!(1)), dec!(1)),
            fact("globex", date(2024, 2, 1), "111", UsageAmount::Value(dec!(1)), dec!(9)),
        ],
    )
    .await;
    let engine = RollupEngine::new(&db, catalog());

    engine.build(ROLLUP, "acme", as_of()).await.unwrap();
    assert!(published(&db, ROLLUP, "globex").await.is_empty());
    assert_eq!(published(&db, ROLLUP, "acme").await[0].unblended_cost, dec!(1));
}

#[tokio::test]
async fn test_dry_run_does_not_publish() {
    let (_pool, db) = setup().await;
    seed(
        &db,
        vec![fact("acme", date(2024, 2, 1), "111", UsageAmount::Value(dec!(1)), dec!(1))],
    )
    .await;
    let engine = RollupEngine::new(&db, catalog()).with_options(BuildOptions {
        dry_run: true,
        ..Default::default()
    });

    let report = engine.build(ROLLUP, "acme", as_of()).await.unwrap();
    assert_eq!(report.outcome, BuildOutcome::DryRun);
    assert_eq!(report.rows_built, 1);
    assert_eq!(report.rows_published, 0);
    assert_eq!(report.generation, None);
    assert!(published(&db, ROLLUP, "acme").await.is_empty());
}

#[tokio::test]
async fn test_empty_build_clears_window_unless_skipped() {
    let (pool, db) = setup().await;
    seed(
        &db,
        vec![fact("acme", date(2024, 2, 1), "111", UsageAmount::Value(dec!(1)), dec!(1))],
    )
    .await;
    let engine = RollupEngine::new(&db, catalog());
    engine.build(ROLLUP, "acme", as_of()).await.unwrap();

    sqlx::query("DELETE FROM cost_line_items")
        .execute(&pool)
        .await
        .expect("Failed to clear facts");

    let skipping = engine.clone().with_options(BuildOptions {
        skip_empty_builds: true,
        ..Default::default()
    });
    let report = skipping.build(ROLLUP, "acme", as_of()).await.unwrap();
    assert_eq!(report.outcome, BuildOutcome::SkippedEmpty);
    assert_eq!(published(&db, ROLLUP, "acme").await.len(), 1);

    let report = engine.build(ROLLUP, "acme", as_of()).await.unwrap();
    assert_eq!(report.outcome, BuildOutcome::Published);
    assert_eq!(report.generation, Some(2));
    assert!(published(&db, ROLLUP, "acme").await.is_empty());
}

#[tokio::test]
async fn test_unknown_rollup() {
    let (_pool, db) = setup().await;
    let engine = RollupEngine::new(&db, catalog());

    let err = engine.build("nope", "acme", as_of()).await.unwrap_err();
    assert!(matches!(err, RollupError::UnknownRollup(ref name) if name == "nope"));
    assert_eq!(err.outcome(), "unknown_rollup");
}

/// Holds every scan until the test releases the gate.
struct GatedFacts {
    inner: Arc<dyn FactRepo>,
    entered: Arc<Notify>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl FactRepo for GatedFacts {
    fn scan<'a>(&'a self, scan: &'a FactScan) -> BoxStream<'a, DbResult<FactRow>> {
        let wait = async move {
            self.entered.notify_one();
            let _permit = self.gate.acquire().await;
            stream::empty::<DbResult<FactRow>>()
        };
        stream::once(wait)
            .flatten()
            .chain(self.inner.scan(scan))
            .boxed()
    }

    async fn list_tenants(&self) -> DbResult<Vec<String>> {
        self.inner.list_tenants().await
    }

    async fn insert_batch(&self, facts: Vec<FactRow>) -> DbResult<usize> {
        self.inner.insert_batch(facts).await
    }
}

#[tokio::test]
async fn test_concurrent_build_is_rejected_while_first_is_running() {
    let (_pool, db) = setup().await;
    seed(
        &db,
        vec![fact("acme", date(2024, 2, 1), "111", UsageAmount::Value(dec!(1)), dec!(1))],
    )
    .await;
    RollupEngine::new(&db, catalog())
        .build(ROLLUP, "acme", as_of())
        .await
        .unwrap();
    seed(
        &db,
        vec![fact("acme", date(2024, 2, 1), "111", UsageAmount::Value(dec!(1)), dec!(2))],
    )
    .await;

    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Semaphore::new(0));
    let facts = Arc::new(GatedFacts {
        inner: db.facts(),
        entered: entered.clone(),
        gate: gate.clone(),
    });
    let engine = RollupEngine::from_repos(facts, db.rollups(), catalog());

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.build(ROLLUP, "acme", as_of()).await })
    };
    entered.notified().await;

    let err = engine.build(ROLLUP, "acme", as_of()).await.unwrap_err();
    assert!(matches!(err, RollupError::BuildInProgress { .. }));
    assert_eq!(err.outcome(), "busy");

    assert_eq!(published(&db, ROLLUP, "acme").await[0].unblended_cost, dec!(1));

    gate.add_permits(1);
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.generation, Some(2));
    assert_eq!(published(&db, ROLLUP, "acme").await[0].unblended_cost, dec!(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_during_publish_see_one_whole_generation() {
    const ACCOUNTS: usize = 400;
    const BUILDS: usize = 20;

    let dir = tempfile::tempdir().unwrap();
    let pool = create_sqlite_file_pool(&dir.path().join("costroll.db"), 4).await;
    run_sqlite_migrations(&pool).await;
    let db = Arc::new(DbPool::from_sqlite(pool.clone()));
    seed(
        &db,
        (0..ACCOUNTS)
            .map(|i| {
                fact(
                    "acme",
                    date(2024, 2, 1),
                    &format!("{i:04}"),
                    UsageAmount::Value(dec!(1)),
                    dec!(1),
                )
            })
            .collect(),
    )
    .await;
    let engine = RollupEngine::new(&db, catalog());
    engine.build(ROLLUP, "acme", as_of()).await.unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let db = db.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut snapshots = BTreeSet::new();
            let mut reads = 0usize;
            while !stop.load(Ordering::Acquire) {
                let rows = published(&db, ROLLUP, "acme").await;
                let ones = rows.iter().filter(|r| r.unblended_cost == dec!(1)).count();
                let twos = rows.iter().filter(|r| r.unblended_cost == dec!(2)).count();
                snapshots.insert((rows.len(), ones, twos));
                reads += 1;
                tokio::task::yield_now().await;
            }
            (snapshots, reads)
        })
    };

    for i in 0..BUILDS {
        let cost = if i % 2 == 0 { "2" } else { "1" };
        sqlx::query("UPDATE cost_line_items SET unblended_cost = ? WHERE tenant = 'acme'")
            .bind(cost)
            .execute(&pool)
            .await
            .unwrap();
        let report = engine.build(ROLLUP, "acme", as_of()).await.unwrap();
        assert_eq!(report.rows_published, ACCOUNTS as u64);
    }
    stop.store(true, Ordering::Release);

    let (snapshots, reads) = reader.await.unwrap();
    assert!(reads > 0);
    let whole: BTreeSet<_> = [(ACCOUNTS, ACCOUNTS, 0), (ACCOUNTS, 0, ACCOUNTS)].into();
    assert!(
        snapshots.is_subset(&whole),
        "reader saw a partially published window: {snapshots:?}"
    );
    assert_eq!(
        db.rollups().get_generation(ROLLUP, "acme").await.unwrap().map(|g| g.generation),
        Some(BUILDS as i64 + 1)
    );
}
