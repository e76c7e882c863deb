//! Error types for the fame-omics library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum FameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid count value '{value}' at row {row}, column {col}")]
    InvalidCount {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Duplicate identifier '{0}'")]
    DuplicateId(String),

    /// Sample identifiers of counts and phenotype data do not line up.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Missing column '{0}' in metadata")]
    MissingColumn(String),

    #[error("Invalid variable type for column '{column}': {reason}")]
    InvalidVariableType { column: String, reason: String },

    #[error("Empty data: {0}")]
    EmptyData(String),

    /// Too few observations to fit a gene; callers skip the gene.
    #[error("Insufficient data for '{id}': {reason}")]
    InsufficientData { id: String, reason: String },

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Identifier absent from the annotation resource; callers leave the label empty.
    #[error("No annotation for gene '{0}'")]
    AnnotationLookupFailure(String),

    #[error("Enrichment universe is empty: {0}")]
    EnrichmentUniverseEmpty(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FameError {
    /// Whether this error only concerns a single gene and may be skipped.
    pub fn is_per_gene(&self) -> bool {
        matches!(
            self,
            FameError::InsufficientData { .. } | FameError::AnnotationLookupFailure(_)
        )
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, FameError>;
