//! Terminal reporting.
//!
//! Formatting lives here so the data and fitting layers never print.

pub mod format;

pub use format::*;
