use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

use super::WindowError;
use crate::db::DbError;

/// Rollup, tenant and window a failed build was working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildScope {
    pub rollup: String,
    pub tenant: String,
    pub window_start: Option<NaiveDate>,
}

impl BuildScope {
    pub fn new(rollup: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            rollup: rollup.into(),
            tenant: tenant.into(),
            window_start: None,
        }
    }

    pub fn with_window(mut self, window_start: NaiveDate) -> Self {
        self.window_start = Some(window_start);
        self
    }
}

impl fmt::Display for BuildScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rollup '{}' tenant '{}'", self.rollup, self.tenant)?;
        if let Some(start) = self.window_start {
            write!(f, " window [{}, +inf)", start)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RollupError {
    #[error("Unknown rollup '{0}'")]
    UnknownRollup(String),

    #[error("{scope}: a build is already in progress")]
    BuildInProgress { scope: BuildScope },

    #[error("{scope}: {source}")]
    Window {
        scope: BuildScope,
        #[source]
        source: WindowError,
    },

    /// The store was unreachable or a query failed. The prior generation is intact.
    #[error("{scope}: store error: {source}")]
    Store {
        scope: BuildScope,
        #[source]
        source: DbError,
    },

    /// A fact could not be decoded or aggregated.
    #[error("{scope}: data error{}: {message}", key_suffix(.key))]
    Data {
        scope: BuildScope,
        key: Option<String>,
        message: String,
    },

    /// The build produced duplicate (period, dimension key) rows. Indicates a grouping bug.
    #[error("{scope}: consistency error{}: {message}", key_suffix(.key))]
    Consistency {
        scope: BuildScope,
        key: Option<String>,
        message: String,
    },
}

fn key_suffix(key: &Option<String>) -> String {
    key.as_ref()
        .map(|k| format!(" at key {k}"))
        .unwrap_or_default()
}

impl RollupError {
    /// Whether the next scheduled run may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RollupError::Store { .. })
    }

    pub fn scope(&self) -> Option<&BuildScope> {
        match self {
            RollupError::UnknownRollup(_) => None,
            RollupError::BuildInProgress { scope }
            | RollupError::Window { scope, .. }
            | RollupError::Store { scope, .. }
            | RollupError::Data { scope, .. }
            | RollupError::Consistency { scope, .. } => Some(scope),
        }
    }

    /// Short label used for the metrics `outcome` and log fields.
    pub fn outcome(&self) -> &'static str {
        match self {
            RollupError::UnknownRollup(_) => "unknown_rollup",
            RollupError::BuildInProgress { .. } => "busy",
            RollupError::Window { .. } => "window_error",
            RollupError::Store { .. } => "store_error",
            RollupError::Data { .. } => "data_error",
            RollupError::Consistency { .. } => "consistency_error",
        }
    }

    /// Classify a storage error. Undecodable stored values are data errors;
    /// everything else is treated as transient.
    pub(crate) fn from_db(scope: BuildScope, error: DbError) -> Self {
        match error {
            DbError::Validation(message) => RollupError::Data {
                scope,
                key: None,
                message,
            },
            DbError::Conflict(message) => RollupError::Consistency {
                scope,
                key: None,
                message,
            },
            source => RollupError::Store { scope, source },
        }
    }
}
