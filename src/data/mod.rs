//! In-memory experiment storage.

pub mod holder;

pub use holder::DataHolder;
