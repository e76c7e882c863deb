//! Filtering primitives for count matrices.

pub mod abundance;

pub use abundance::{filter_mean_count, FilterReport, DEFAULT_MIN_MEAN_COUNT};
