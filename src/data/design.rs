//! Typed model specification for one predictor of interest.

use serde::{Deserialize, Serialize};

/// Hypothesis test applied to the predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Wald z-test on a single coefficient.
    #[default]
    Wald,
    /// Likelihood ratio test of the full model against the model without
    /// the predictor. Used for multi-level ordered factors.
    Lrt,
}

impl std::fmt::Display for TestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestMode::Wald => write!(f, "wald"),
            TestMode::Lrt => write!(f, "lrt"),
        }
    }
}

/// One differential expression model: `~ covariates + predictor`.
///
/// ```
/// use fame_omics::data::{ModelSpec, TestMode};
///
/// let spec = ModelSpec::new("menopause")
///     .with_covariates(&["batch"])
///     .with_contrast("post");
/// assert_eq!(spec.test, TestMode::Wald);
/// assert_eq!(spec.label(), "menopause");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Phenotype column tested.
    pub predictor: String,
    /// Adjustment columns, in design order.
    #[serde(default)]
    pub covariates: Vec<String>,
    #[serde(default)]
    pub test: TestMode,
    /// Level compared against the reference for a categorical predictor
    /// (Wald only). Defaults to the last level.
    #[serde(default)]
    pub contrast_level: Option<String>,
    /// Z-score a continuous predictor before fitting (hormone levels).
    #[serde(default)]
    pub standardize: bool,
    /// Output label; defaults to the predictor name.
    #[serde(default)]
    pub name: Option<String>,
}

impl ModelSpec {
    pub fn new(predictor: &str) -> Self {
        Self {
            predictor: predictor.to_string(),
            covariates: Vec::new(),
            test: TestMode::Wald,
            contrast_level: None,
            standardize: false,
            name: None,
        }
    }

    pub fn with_covariates(mut self, covariates: &[&str]) -> Self {
        self.covariates = covariates.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_test(mut self, test: TestMode) -> Self {
        self.test = test;
        self
    }

    pub fn with_contrast(mut self, level: &str) -> Self {
        self.contrast_level = Some(level.to_string());
        self
    }

    pub fn standardized(mut self) -> Self {
        self.standardize = true;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Name used for output files and logs.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.predictor)
    }

    /// All phenotype columns the model reads, covariates first.
    pub fn variables(&self) -> Vec<&str> {
        self.covariates
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.predictor.as_str()))
            .collect()
    }
}
