//! Runs one build: window, fact scan, aggregation, publish.

use std::{sync::Arc, time::Instant};

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Instrument;

use super::{
    BuildScope, RefreshWindow, RollupCatalog, RollupError,
    builder::{BuilderError, RollupBuilder},
    swapper::ViewSwapper,
};
use crate::{
    config::SchedulerConfig,
    db::{DbPool, FactRepo, RollupRepo},
    models::FactScan,
    observability::metrics,
};

/// What a build does when another build of the same rollup and tenant is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Fail immediately with `BuildInProgress`.
    #[default]
    Reject,
    /// Queue behind the running build.
    Wait,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub busy_policy: BusyPolicy,
    /// Aggregate but never publish.
    pub dry_run: bool,
    /// Keep the published window when the build produced no rows.
    pub skip_empty_builds: bool,
}

impl From<&SchedulerConfig> for BuildOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            busy_policy: config.busy_policy,
            dry_run: config.dry_run,
            skip_empty_builds: config.skip_empty_builds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Published,
    DryRun,
    SkippedEmpty,
}

impl BuildOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildOutcome::Published => "published",
            BuildOutcome::DryRun => "dry_run",
            BuildOutcome::SkippedEmpty => "skipped_empty",
        }
    }
}

/// Summary of a finished build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub rollup: String,
    pub tenant: String,
    pub window_start: NaiveDate,
    pub facts_scanned: u64,
    pub facts_skipped: u64,
    pub rows_built: u64,
    pub rows_published: u64,
    /// Generation now visible to readers. `None` when nothing was published.
    pub generation: Option<i64>,
    pub outcome: BuildOutcome,
    pub duration_ms: u64,
}

/// One async mutex per (rollup, tenant).
#[derive(Default)]
struct BuildLocks {
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl BuildLocks {
    async fn acquire(
        &self,
        scope: &BuildScope,
        policy: BusyPolicy,
    ) -> Result<OwnedMutexGuard<()>, RollupError> {
        // Clone the Arc out so the shard lock is released before awaiting.
        let lock = self
            .locks
            .entry((scope.rollup.clone(), scope.tenant.clone()))
            .or_default()
            .clone();

        match policy {
            BusyPolicy::Reject => lock.try_lock_owned().map_err(|_| RollupError::BuildInProgress {
                scope: scope.clone(),
            }),
            BusyPolicy::Wait => Ok(lock.lock_owned().await),
        }
    }
}

#[derive(Clone)]
pub struct RollupEngine {
    facts: Arc<dyn FactRepo>,
    swapper: ViewSwapper,
    catalog: Arc<RollupCatalog>,
    options: BuildOptions,
    locks: Arc<BuildLocks>,
}

impl RollupEngine {
    pub fn new(db: &DbPool, catalog: RollupCatalog) -> Self {
        Self::from_repos(db.facts(), db.rollups(), catalog)
    }

    pub fn from_repos(
        facts: Arc<dyn FactRepo>,
        rollups: Arc<dyn RollupRepo>,
        catalog: RollupCatalog,
    ) -> Self {
        Self {
            facts,
            swapper: ViewSwapper::new(rollups),
            catalog: Arc::new(catalog),
            options: BuildOptions::default(),
            locks: Arc::new(BuildLocks::default()),
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn catalog(&self) -> &RollupCatalog {
        &self.catalog
    }

    pub fn facts(&self) -> &Arc<dyn FactRepo> {
        &self.facts
    }

    /// Build rollup `rollup` for `tenant` with the window anchored at `as_of`.
    ///
    /// On any error the previously published generation is left intact.
    pub async fn build(
        &self,
        rollup: &str,
        tenant: &str,
        as_of: NaiveDate,
    ) -> Result<BuildReport, RollupError> {
        let span = tracing::info_span!("rollup_build", rollup = %rollup, tenant = %tenant);
        async {
            let started = Instant::now();
            let result = self.build_inner(rollup, tenant, as_of, started).await;
            let elapsed = started.elapsed().as_secs_f64();

            match &result {
                Ok(report) => {
                    tracing::info!(
                        window_start = %report.window_start,
                        facts_scanned = report.facts_scanned,
                        rows_built = report.rows_built,
                        rows_published = report.rows_published,
                        generation = ?report.generation,
                        outcome = report.outcome.as_str(),
                        duration_ms = report.duration_ms,
                        "Rollup build finished"
                    );
                    metrics::record_rollup_build(
                        rollup,
                        report.outcome.as_str(),
                        report.rows_published,
                        elapsed,
                    );
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        outcome = e.outcome(),
                        retryable = e.is_retryable(),
                        "Rollup build failed"
                    );
                    metrics::record_rollup_build(rollup, e.outcome(), 0, elapsed);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn build_inner(
        &self,
        rollup: &str,
        tenant: &str,
        as_of: NaiveDate,
        started: Instant,
    ) -> Result<BuildReport, RollupError> {
        let definition = self
            .catalog
            .get(rollup)
            .ok_or_else(|| RollupError::UnknownRollup(rollup.to_string()))?;
        let scope = BuildScope::new(rollup, tenant);

        let _guard = self.locks.acquire(&scope, self.options.busy_policy).await?;

        let window = RefreshWindow::for_retention(as_of, definition.retention_months).map_err(
            |source| RollupError::Window {
                scope: scope.clone(),
                source,
            },
        )?;
        let scope = scope.with_window(window.start);
        tracing::info!(window = %window, as_of = %as_of, "Rollup build started");

        let scan = FactScan {
            tenant: tenant.to_string(),
            line_item_type: definition.line_item_type.clone(),
            window_start: window.start,
        };
        let mut builder = RollupBuilder::new(definition, window);
        builder
            .aggregate(self.facts.scan(&scan))
            .await
            .map_err(|e| builder_error(&scope, e))?;
        let built = builder.finish().map_err(|e| builder_error(&scope, e))?;

        let rows_built = built.len() as u64;
        let (outcome, generation) = if self.options.dry_run {
            (BuildOutcome::DryRun, None)
        } else if built.is_empty() && self.options.skip_empty_builds {
            tracing::debug!("No facts in window, keeping published rows");
            (BuildOutcome::SkippedEmpty, None)
        } else {
            let generation = self
                .swapper
                .publish(definition, tenant, window, &built)
                .await?;
            (BuildOutcome::Published, Some(generation))
        };

        Ok(BuildReport {
            rollup: rollup.to_string(),
            tenant: tenant.to_string(),
            window_start: window.start,
            facts_scanned: built.facts_scanned,
            facts_skipped: built.facts_skipped,
            rows_built,
            rows_published: generation
                .as_ref()
                .map(|g| g.row_count.max(0) as u64)
                .unwrap_or(0),
            generation: generation.map(|g| g.generation),
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn builder_error(scope: &BuildScope, error: BuilderError) -> RollupError {
    match error {
        BuilderError::Store(e) => RollupError::from_db(scope.clone(), e),
        BuilderError::Aggregate { key, source } => RollupError::Data {
            scope: scope.clone(),
            key: Some(key),
            message: source.to_string(),
        },
    }
}
