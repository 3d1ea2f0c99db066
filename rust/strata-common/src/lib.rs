//! Core definitions (error types and argument verification), relied upon by all strata-* crates.

pub mod error;
pub mod result;

pub use result::Result;

/// Log target used for diagnostics emitted by strata crates.
pub const LOG_TARGET: &str = "strata";
