//! # Unitas Testkit
//!
//! Test utilities for Unitas.
//!
//! This crate provides:
//! - Store fixtures for every bundled entity store, with automatic cleanup
//! - A recording store wrapper that counts calls into the write path
//! - Entity types used across the test suites
//! - A conformance suite every [`EntityStore`](unitas_core::EntityStore)
//!   must pass
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use unitas_testkit::prelude::*;
//!
//! #[test]
//! fn journal_store_conforms() {
//!     conformance::run_all(StoreKind::JournalFile);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conformance;
pub mod fixtures;
pub mod generators;
pub mod model;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::conformance;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
}

pub use fixtures::*;
pub use generators::*;
pub use model::*;
