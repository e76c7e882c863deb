//! Multiple testing correction.

pub mod bh;
pub mod qvalue;

pub use bh::{adjust_bh, correct_bh, BhCorrected};
pub use qvalue::{estimate_pi0, qvalues};
