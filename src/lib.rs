//! `od-curves` library crate.
//!
//! Reads growth-curve exports from photobioreactors and plate readers, conditions the
//! series, and derives per-experiment measurements, model fits and statistics. The
//! `odc` binary is a thin wrapper around [`app::run`].
//!
//! - [`io`]: instrument readers and the native CSV writer
//! - [`data`], [`manager`]: replicate-aware storage and queries
//! - [`process`], [`calibration`]: signal conditioning
//! - [`models`], [`fit`]: growth models and least-squares fitting
//! - [`stats`], [`report`]: hypothesis tests and text output

pub mod app;
pub mod calibration;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod manager;
pub mod math;
pub mod models;
pub mod process;
pub mod report;
pub mod stats;

pub use error::{Error, ErrorKind, Result};
pub use manager::{DataManager, Measurement};
