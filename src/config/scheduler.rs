//! Scheduled rollup refresh configuration.
//!
//! # Example
//!
//! ```toml
//! [scheduler]
//! enabled = true
//! interval_secs = 3600
//! tenants = ["acct10001", "acct10002"]
//! busy_policy = "wait"
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::rollup::BusyPolicy;

/// Background refresh of every catalog rollup for every tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Whether the refresh worker runs in `serve` mode.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between refresh runs.
    /// Default: 3600 (hourly)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Run a refresh immediately on startup instead of waiting one interval.
    #[serde(default = "default_true")]
    pub run_on_startup: bool,

    /// Tenants to refresh. Empty means every tenant that has facts.
    #[serde(default)]
    pub tenants: Vec<String>,

    /// What to do when a build for the same rollup and tenant is already running.
    #[serde(default)]
    pub busy_policy: BusyPolicy,

    /// Aggregate without publishing. Useful for validating a new catalog.
    #[serde(default)]
    pub dry_run: bool,

    /// Leave the published window untouched when a build finds no facts,
    /// instead of clearing it.
    #[serde(default)]
    pub skip_empty_builds: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            run_on_startup: true,
            tenants: Vec::new(),
            busy_policy: BusyPolicy::default(),
            dry_run: false,
            skip_empty_builds: false,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "scheduler.interval_secs must be greater than zero".into(),
            ));
        }
        if self.tenants.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "scheduler.tenants cannot contain empty names".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    3600
}
