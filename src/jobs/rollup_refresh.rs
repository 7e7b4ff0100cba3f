//! Scheduled refresh of every catalog rollup for every tenant.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::{
    config::SchedulerConfig,
    db::DbError,
    rollup::{RollupEngine, RollupError},
};

/// Results from a single refresh run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshRunResult {
    /// Builds that completed (published, dry run or skipped as empty).
    pub built: u64,
    /// Builds that failed with a store, data or consistency error.
    pub failed: u64,
    /// Builds rejected because another build of the same dataset was running.
    pub busy: u64,
    /// Rows published across all builds.
    pub rows: u64,
}

impl RefreshRunResult {
    pub fn attempted(&self) -> u64 {
        self.built + self.failed + self.busy
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Starts the refresh worker as a background task.
///
/// Runs until the task is cancelled. Failed builds are retried at the next interval.
pub async fn start_rollup_refresh_worker(engine: Arc<RollupEngine>, config: SchedulerConfig) {
    if !config.enabled {
        tracing::info!("Rollup refresh worker disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = config.interval_secs,
        rollups = engine.catalog().len(),
        tenants = ?config.tenants,
        busy_policy = ?config.busy_policy,
        dry_run = config.dry_run,
        "Starting rollup refresh worker"
    );

    let interval = config.interval();
    if !config.run_on_startup {
        tokio::time::sleep(interval).await;
    }

    loop {
        let as_of = Utc::now().date_naive();
        match run_refresh(&engine, &config.tenants, as_of).await {
            Ok(result) => {
                if result.has_failures() {
                    tracing::warn!(
                        built = result.built,
                        failed = result.failed,
                        busy = result.busy,
                        rows = result.rows,
                        "Rollup refresh run complete with failures"
                    );
                } else {
                    tracing::info!(
                        built = result.built,
                        busy = result.busy,
                        rows = result.rows,
                        "Rollup refresh run complete"
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Error listing tenants for rollup refresh");
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Build every catalog rollup, in catalog order, for each tenant.
///
/// An empty `tenants` list means every tenant that has facts. Individual build
/// failures are counted and logged; only tenant discovery can fail the run.
pub async fn run_refresh(
    engine: &RollupEngine,
    tenants: &[String],
    as_of: NaiveDate,
) -> Result<RefreshRunResult, DbError> {
    let tenants = if tenants.is_empty() {
        engine.facts().list_tenants().await?
    } else {
        tenants.to_vec()
    };

    let mut result = RefreshRunResult::default();
    for tenant in &tenants {
        for definition in engine.catalog().iter() {
            match engine.build(&definition.name, tenant, as_of).await {
                Ok(report) => {
                    result.built += 1;
                    result.rows += report.rows_published;
                }
                Err(RollupError::BuildInProgress { .. }) => result.busy += 1,
                Err(_) => result.failed += 1,
            }
        }
    }
    Ok(result)
}
