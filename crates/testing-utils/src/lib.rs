//! # Ensemble Testing Utils
//!
//! Shared testing utilities for the ensemble assimilation workspace.
//! This crate provides mock domain models, recording/failing runnables
//! and test data builders that can be used across all other crates.
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! ensemble-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
