//! Normalization and transformation of RNA-seq counts.
//!
//! - **size_factors**: median-of-ratios or total-count scaling
//! - **vst**: variance-stabilizing transform for plots and clustering
//! - **batch**: batch-effect removal on transformed values

pub mod batch;
pub mod size_factors;
pub mod transformed;
pub mod vst;

pub use batch::remove_batch_effect;
pub use size_factors::{normalized_counts, size_factors, SizeFactorMethod};
pub use transformed::TransformedMatrix;
pub use vst::{vst, vst_blind};
