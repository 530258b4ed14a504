//! Read-side reconstruction of aggregate graphs.

pub mod finder;

pub use finder::{Finder, FinderError, FinderResult};
