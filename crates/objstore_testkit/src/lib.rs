//! # objstore testkit
//!
//! Test utilities for objstore.
//!
//! This crate provides:
//! - Store fixtures for both backends with temporary directory cleanup
//! - A backend conformance suite and the [`conformance_tests!`] macro
//! - Crash recovery harness for the log backend
//! - Cancellation safety trials for worker threads
//! - Concurrent stress tests for batch atomicity
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objstore_testkit::prelude::*;
//!
//! objstore_testkit::conformance_tests!(log, objstore_testkit::make_log_store);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cancellation;
pub mod conformance;
pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::*;
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
