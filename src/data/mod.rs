//! Data structures for expression analysis.

mod count_matrix;
mod design;
mod design_matrix;
mod metadata;
mod result;

pub use count_matrix::CountMatrix;
pub use design::{ModelSpec, TestMode};
pub use design_matrix::DesignMatrix;
pub use metadata::{SampleMetadata, Variable, VariableType};
pub use result::{
    Direction, ModelResult, ModelResultSet, ResultSummary, SkippedGene, RESULT_COLUMNS,
};
