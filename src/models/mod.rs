//! Growth model family.
//!
//! Models are implemented as small, pure functions so that fitting code can stay
//! generic; `format` holds the parameter pretty-printers.

pub mod format;
pub mod model;

pub use format::*;
pub use model::*;
