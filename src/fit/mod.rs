//! Model fitting.
//!
//! `fitter` holds the least squares engine; model formulas and Jacobians live in
//! `crate::models`.

pub mod fitter;

pub use fitter::*;
