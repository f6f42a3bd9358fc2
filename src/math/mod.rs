//! Numerical building blocks: least squares, interpolation, descriptive statistics and
//! Savitzky–Golay filtering.

pub mod interp;
pub mod ols;
pub mod savgol;
pub mod stats;

pub use interp::*;
pub use ols::*;
pub use savgol::*;
