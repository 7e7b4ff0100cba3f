//! Shared database repository test infrastructure
//!
//! This module provides a test harness for running the same test logic against
//! both SQLite and PostgreSQL implementations. Tests are organized as:
//!
//! - **Unit tests (SQLite)**: Fast, in-memory tests that run with every `cargo test`
//! - **Integration tests (PostgreSQL)**: Slower tests using testcontainers, run with `cargo test -- --ignored`
//!
//! # Architecture
//!
//! Each repository has a test module (e.g., `facts.rs`) containing:
//! - Shared test functions that take `&dyn XxxRepo`
//! - SQLite-specific setup using in-memory databases
//! - PostgreSQL-specific setup using testcontainers (marked `#[ignore]`)
//!
//! # Running tests
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```
