//! # driftsync Testkit
//!
//! Test utilities for driftsync.
//!
//! This crate provides:
//! - Replica fixtures that commit local files and sync them through a
//!   shared in-memory remote
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use driftsync_testkit::prelude::*;
//!
//! #[test]
//! fn replicas_converge() {
//!     let cloud = Cloud::new();
//!     let a = cloud.replica("A");
//!     a.write("notes.txt", b"hello");
//!     a.up();
//!
//!     let b = cloud.replica("B");
//!     b.down().unwrap();
//!     assert_eq!(a.tree(), b.tree());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
