//! Shared test utilities for loadrelay integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs with temp spool, export and storage directories
//! - Builders for test messages and configuration files
//! - Fake storage backends for failover scenarios

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::TestHarness;
