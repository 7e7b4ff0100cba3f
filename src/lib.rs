//! Windowed cost aggregation and materialized rollups for cloud billing data.
//!
//! Raw line items live in a fact table populated by an external ingestion
//! pipeline. For each rollup definition and tenant, the engine recomputes the
//! rows of a rolling, month-anchored window and replaces the published slice
//! of the rollup dataset in one transaction.

pub mod config;
pub mod db;
pub mod jobs;
pub mod models;
pub mod observability;
pub mod rollup;
