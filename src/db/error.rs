use thiserror::Error;

/// Failures of the fact and rollup stores.
///
/// `Validation` and `Conflict` describe the data and are never retried;
/// `Sqlx` covers connectivity and query failures.
#[derive(Debug, Error)]
pub enum DbError {
    /// No `[database]` section was configured.
    #[error("no database configured")]
    NotConfigured,

    /// A published row collided with the (rollup, tenant, period, key) index.
    #[error("rollup key conflict: {0}")]
    Conflict(String),

    /// A stored value could not be decoded into its domain type.
    #[error("undecodable stored value: {0}")]
    Validation(String),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("store query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = Result<T, DbError>;
