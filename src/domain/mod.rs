//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the experiment data model (`Experiment`, `TimeAxis`, `Signal`, `Event`)
//! - x-axis units (`TimeUnit`)
//! - the analysis settings record (`Context`)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
