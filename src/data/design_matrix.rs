//! Design matrix construction from phenotype data and a model spec.

use crate::data::{ModelSpec, SampleMetadata, Variable, VariableType};
use crate::error::{FameError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// A design matrix for the NB GLM.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (samples × coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Sample IDs (rows).
    sample_ids: Vec<String>,
    /// Reference levels for categorical variables.
    reference_levels: HashMap<String, String>,
    /// Columns belonging to the predictor of interest.
    predictor_columns: Vec<usize>,
}

impl DesignMatrix {
    /// Create a design matrix directly from components.
    pub fn from_matrix(
        matrix: DMatrix<f64>,
        coefficient_names: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Self {
        Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels: HashMap::new(),
            predictor_columns: Vec::new(),
        }
    }

    /// Build `~ 1 + covariates + predictor` for the samples in `metadata`.
    ///
    /// Categorical variables are treatment coded against their first level
    /// (`{variable}{level}` columns). Model variables must be complete;
    /// drop incomplete samples with [`SampleMetadata::complete_cases`] first.
    pub fn from_spec(metadata: &SampleMetadata, spec: &ModelSpec) -> Result<Self> {
        let sample_ids = metadata.sample_ids().to_vec();
        let n_samples = sample_ids.len();

        let mut coefficient_names = vec!["(Intercept)".to_string()];
        let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n_samples]];
        let mut reference_levels = HashMap::new();
        let mut predictor_columns = Vec::new();

        for var in spec.variables() {
            let is_predictor = var == spec.predictor;
            let standardize = is_predictor && spec.standardize;
            let terms = term_columns(metadata, var, standardize, &mut reference_levels)?;
            if is_predictor && terms.is_empty() {
                return Err(FameError::InsufficientData {
                    id: var.to_string(),
                    reason: "predictor has a single level".to_string(),
                });
            }
            for (name, col) in terms {
                if is_predictor {
                    predictor_columns.push(columns.len());
                }
                coefficient_names.push(name);
                columns.push(col);
            }
        }

        let n_coef = columns.len();
        let matrix = DMatrix::from_fn(n_samples, n_coef, |i, j| columns[j][i]);

        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels,
            predictor_columns,
        })
    }

    /// Build `~ 1 + variables` with no predictor of interest.
    pub fn from_variables(metadata: &SampleMetadata, variables: &[&str]) -> Result<Self> {
        let n_samples = metadata.n_samples();
        let mut coefficient_names = vec!["(Intercept)".to_string()];
        let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n_samples]];
        let mut reference_levels = HashMap::new();
        for var in variables {
            for (name, col) in term_columns(metadata, var, false, &mut reference_levels)? {
                coefficient_names.push(name);
                columns.push(col);
            }
        }
        let matrix = DMatrix::from_fn(n_samples, columns.len(), |i, j| columns[j][i]);
        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids: metadata.sample_ids().to_vec(),
            reference_levels,
            predictor_columns: Vec::new(),
        })
    }

    /// The nested model with the predictor columns removed.
    pub fn reduced_without_predictor(&self) -> Self {
        let keep: Vec<usize> = (0..self.n_coefficients())
            .filter(|j| !self.predictor_columns.contains(j))
            .collect();
        let matrix = self.matrix.select_columns(keep.iter());
        let coefficient_names = keep
            .iter()
            .map(|&j| self.coefficient_names[j].clone())
            .collect();
        Self {
            matrix,
            coefficient_names,
            sample_ids: self.sample_ids.clone(),
            reference_levels: self.reference_levels.clone(),
            predictor_columns: Vec::new(),
        }
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Get sample IDs.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Number of samples (rows).
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Column indices of the predictor of interest.
    pub fn predictor_columns(&self) -> &[usize] {
        &self.predictor_columns
    }

    /// Get the reference level for a categorical variable.
    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Coefficient tested by a Wald test for `spec`.
    ///
    /// Continuous predictors have one column. For a categorical predictor
    /// this is `contrast_level` against the reference, or the last level.
    pub fn tested_coefficient(&self, spec: &ModelSpec) -> Result<usize> {
        match &spec.contrast_level {
            Some(level) => {
                let name = format!("{}{}", spec.predictor, level);
                self.coefficient_index(&name).ok_or_else(|| {
                    FameError::InvalidParameter(format!(
                        "contrast level '{}' is not a non-reference level of '{}'",
                        level, spec.predictor
                    ))
                })
            }
            None => self.predictor_columns.last().copied().ok_or_else(|| {
                FameError::InvalidParameter(format!("'{}' has no design columns", spec.predictor))
            }),
        }
    }
}

fn term_columns(
    metadata: &SampleMetadata,
    var_name: &str,
    standardize: bool,
    reference_levels: &mut HashMap<String, String>,
) -> Result<Vec<(String, Vec<f64>)>> {
    let values = metadata.column(var_name)?;
    if values.iter().any(|v| v.is_missing()) {
        return Err(FameError::InvalidVariableType {
            column: var_name.to_string(),
            reason: "missing values in a model variable".to_string(),
        });
    }

    match metadata.column_type(var_name) {
        Some(VariableType::Continuous) => {
            let mut col: Vec<f64> = values.iter().filter_map(|v| v.as_continuous()).collect();
            if standardize {
                zscore_in_place(&mut col, var_name)?;
            }
            Ok(vec![(var_name.to_string(), col)])
        }
        Some(VariableType::Categorical) | None => {
            let levels = metadata.levels(var_name)?;
            if let Some(reference) = levels.first() {
                reference_levels.insert(var_name.to_string(), reference.clone());
            }
            Ok(levels
                .iter()
                .skip(1)
                .map(|level| {
                    let col = values
                        .iter()
                        .map(|v| match v {
                            Variable::Categorical(s) if s == level => 1.0,
                            _ => 0.0,
                        })
                        .collect();
                    (format!("{}{}", var_name, level), col)
                })
                .collect())
        }
    }
}

fn zscore_in_place(values: &mut [f64], name: &str) -> Result<()> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let sd = var.sqrt();
    if !(sd > 0.0) {
        return Err(FameError::InsufficientData {
            id: name.to_string(),
            reason: "cannot standardize a constant predictor".to_string(),
        });
    }
    for v in values.iter_mut() {
        *v = (*v - mean) / sd;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_metadata() -> SampleMetadata {
        let ids: Vec<String> = (1..=6).map(|i| format!("S{}", i)).collect();
        let mut meta = SampleMetadata::new(ids).unwrap();
        let status = ["pre", "post", "pre", "post", "pre", "post"];
        meta.add_categorical("status", status.iter().map(|s| Some(s.to_string())).collect())
            .unwrap();
        let age_cat = ["young", "mid", "old", "young", "mid", "old"];
        meta.add_categorical("age_cat", age_cat.iter().map(|s| Some(s.to_string())).collect())
            .unwrap();
        meta.add_continuous("e2", vec![Some(10.0), Some(2.0), Some(12.0), Some(4.0), Some(8.0), Some(6.0)])
            .unwrap();
        let order: Vec<String> = vec!["young".into(), "mid".into(), "old".into()];
        meta.with_level_order("age_cat", &order).unwrap()
    }

    #[test]
    fn test_categorical_predictor() {
        let meta = create_test_metadata();
        let spec = ModelSpec::new("status");
        let dm = DesignMatrix::from_spec(&meta, &spec).unwrap();

        assert_eq!(dm.coefficient_names(), &["(Intercept)", "statuspre"]);
        assert_eq!(dm.reference_level("status"), Some("post"));
        let col: Vec<f64> = (0..6).map(|i| dm.matrix()[(i, 1)]).collect();
        assert_eq!(col, vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        assert_eq!(dm.tested_coefficient(&spec).unwrap(), 1);
    }

    #[test]
    fn test_ordered_levels_and_reduced() {
        let meta = create_test_metadata();
        let spec = ModelSpec::new("age_cat").with_covariates(&["status"]);
        let dm = DesignMatrix::from_spec(&meta, &spec).unwrap();

        assert_eq!(
            dm.coefficient_names(),
            &["(Intercept)", "statuspre", "age_catmid", "age_catold"]
        );
        assert_eq!(dm.predictor_columns(), &[2, 3]);
        assert_eq!(dm.tested_coefficient(&spec).unwrap(), 3);
        let mid = spec.clone().with_contrast("mid");
        assert_eq!(dm.tested_coefficient(&mid).unwrap(), 2);
        let reference = spec.clone().with_contrast("young");
        assert!(dm.tested_coefficient(&reference).is_err());

        let reduced = dm.reduced_without_predictor();
        assert_eq!(reduced.coefficient_names(), &["(Intercept)", "statuspre"]);
        assert_eq!(reduced.n_samples(), 6);
    }

    #[test]
    fn test_standardized_continuous() {
        let meta = create_test_metadata();
        let spec = ModelSpec::new("e2").standardized();
        let dm = DesignMatrix::from_spec(&meta, &spec).unwrap();
        let col: Vec<f64> = (0..6).map(|i| dm.matrix()[(i, 1)]).collect();
        let mean = col.iter().sum::<f64>() / 6.0;
        let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 5.0;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-12);
        assert_relative_eq!(var, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_value_rejected() {
        let mut meta = create_test_metadata();
        meta.add_continuous("bmi", vec![Some(20.0), None, Some(22.0), Some(25.0), Some(30.0), Some(21.0)])
            .unwrap();
        let spec = ModelSpec::new("bmi");
        assert!(matches!(
            DesignMatrix::from_spec(&meta, &spec),
            Err(FameError::InvalidVariableType { .. })
        ));
    }
}
