//! Tracing initialization with configurable logging formats.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LogLevel, LoggingConfig, ObservabilityConfig};

/// Initialize the tracing subscriber with the given configuration.
///
/// This sets up:
/// - Console logging with configurable format (pretty, compact, JSON)
/// - Environment-based log filtering (`RUST_LOG` wins over the config)
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TracingError> {
    let logging = &config.logging;
    let filter = build_env_filter(logging);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match (&logging.format, logging.timestamps) {
        (LogFormat::Pretty, true) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line),
            )
            .try_init(),
        (LogFormat::Pretty, false) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line)
                    .without_time(),
            )
            .try_init(),
        (LogFormat::Compact, true) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line),
            )
            .try_init(),
        (LogFormat::Compact, false) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line)
                    .without_time(),
            )
            .try_init(),
        (LogFormat::Json, true) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(logging.include_spans)
                    .with_span_list(logging.include_spans)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line),
            )
            .try_init(),
        (LogFormat::Json, false) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(logging.include_spans)
                    .with_span_list(logging.include_spans)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line)
                    .without_time(),
            )
            .try_init(),
    };

    result.map_err(|e| TracingError::Init(e.to_string()))
}

/// Build the environment filter from logging config.
fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    // Start with the configured level
    let base_level = match config.level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };

    // Check for RUST_LOG environment variable first
    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else if let Some(filter) = &config.filter {
        // Use config filter if provided
        let combined = format!("{},{}", base_level, filter);
        EnvFilter::try_new(combined).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else {
        // Default filter that quiets noisy crates
        EnvFilter::new(format!("{},sqlx=warn", base_level))
    }
}

/// Tracing initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}
