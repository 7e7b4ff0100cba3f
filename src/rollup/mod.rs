//! The rollup engine.
//!
//! A build selects the refresh window for a rollup, streams the tenant's facts
//! from that window, groups them by period and dimension key, and replaces the
//! in-window slice of the published dataset in one transaction.

mod aggregate;
mod builder;
mod catalog;
mod engine;
mod error;
mod swapper;
mod window;

pub use aggregate::{
    AggregateAssignment, AggregateError, GroupAggregate, Measures, NumericPolicy,
    RepresentativePolicy,
};
pub use builder::{BuilderError, BuiltRollup, RollupBuilder};
pub use catalog::{CatalogError, RollupCatalog};
pub use engine::{BuildOptions, BuildOutcome, BuildReport, BusyPolicy, RollupEngine};
pub use error::{BuildScope, RollupError};
pub use swapper::ViewSwapper;
pub use window::{RefreshWindow, WindowError};

#[cfg(all(test, feature = "database-sqlite"))]
mod tests;
