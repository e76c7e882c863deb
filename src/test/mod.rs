//! Statistical hypothesis testing for differential expression.

pub mod lrt;
pub mod wald;

pub use lrt::{test_lrt_nb, LrtResultSingle};
pub use wald::{test_wald_nb, WaldResultSingle};
