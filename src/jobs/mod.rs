//! Background jobs.
//!
//! Jobs follow a consistent pattern:
//! 1. Configuration in `config/scheduler.rs`
//! 2. Worker function that runs in a loop with configurable interval
//! 3. Run function that performs a single pass
//! 4. Structured result type for tracking state
//!
//! # Example
//!
//! ```toml
//! [scheduler]
//! enabled = true
//! interval_secs = 3600
//! run_on_startup = true
//! ```

mod rollup_refresh;

pub use rollup_refresh::{RefreshRunResult, run_refresh, start_rollup_refresh_worker};
