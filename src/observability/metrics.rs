//! Prometheus metrics for rollup builds.
//!
//! Provides metrics for:
//! - Build outcomes per rollup
//! - Rows published per build
//! - Build duration

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Initialize the metrics system and start the Prometheus listener.
///
/// Must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &config.duration_buckets_secs,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(listen = %config.listen, "Prometheus metrics exporter started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record the outcome of one rollup build.
///
/// # Arguments
/// * `rollup` - The rollup name
/// * `outcome` - "published", "dry_run", "skipped_empty", "busy", or an error class
///   ("store_error", "data_error", "consistency_error", "window_error", "unknown_rollup")
/// * `rows` - Rows published (0 unless the build published)
/// * `duration_secs` - Wall time of the build
pub fn record_rollup_build(rollup: &str, outcome: &str, rows: u64, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "rollup_builds_total",
            "rollup" => rollup.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);

        if rows > 0 {
            counter!("rollup_rows_published", "rollup" => rollup.to_string()).increment(rows);
        }

        histogram!("rollup_build_duration_seconds", "rollup" => rollup.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (rollup, outcome, rows, duration_secs);
    }
}

/// Errors that can occur during metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
