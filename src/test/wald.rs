//! Wald test for NB GLM coefficients.

use crate::error::{FameError, Result};
use crate::model::NbFitSingle;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::LN_2;

/// Result of a Wald test for a single gene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaldResultSingle {
    pub gene_id: String,
    /// Coefficient name being tested.
    pub coefficient: String,
    /// Coefficient on the log2 scale.
    pub log2_fold_change: f64,
    /// Standard error on the log2 scale.
    pub lfc_se: f64,
    /// z statistic.
    pub statistic: f64,
    /// Two-sided p-value.
    pub p_value: f64,
}

/// Perform a Wald z-test on one coefficient of a fitted gene.
///
/// Tests H0: β = 0 vs H1: β ≠ 0 using the normal distribution.
/// Coefficients are fitted on the natural log scale and reported in log2.
///
/// # Arguments
/// * `fit` - NB fit of one gene
/// * `coef_idx` - Index of the tested coefficient
/// * `coefficient` - Its name, carried into the result
pub fn test_wald_nb(fit: &NbFitSingle, coef_idx: usize, coefficient: &str) -> Result<WaldResultSingle> {
    let estimate = fit.coefficients.get(coef_idx).copied().ok_or_else(|| {
        FameError::InvalidParameter(format!(
            "coefficient index {} out of range ({} coefficients)",
            coef_idx,
            fit.coefficients.len()
        ))
    })?;
    let std_error = fit.std_errors[coef_idx];

    let statistic = if std_error > 0.0 && std_error.is_finite() {
        estimate / std_error
    } else {
        f64::NAN
    };

    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| FameError::Numerical(format!("standard normal: {}", e)))?;
    let p_value = if statistic.is_finite() {
        2.0 * normal.sf(statistic.abs())
    } else {
        f64::NAN
    };

    Ok(WaldResultSingle {
        gene_id: fit.gene_id.clone(),
        coefficient: coefficient.to_string(),
        log2_fold_change: estimate / LN_2,
        lfc_se: std_error / LN_2,
        statistic,
        p_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fit(coef: f64, se: f64) -> NbFitSingle {
        NbFitSingle {
            gene_id: "g".into(),
            coefficients: vec![3.0, coef],
            std_errors: vec![0.1, se],
            dispersion: 0.1,
            log_likelihood: -10.0,
            deviance: 1.0,
            iterations: 3,
            converged: true,
            fitted_values: vec![],
        }
    }

    #[test]
    fn test_known_p_value() {
        // z = 1.96 -> p ~ 0.05
        let r = test_wald_nb(&fit(0.196, 0.1), 1, "statuspost").unwrap();
        assert_relative_eq!(r.statistic, 1.96, epsilon = 1e-12);
        assert_relative_eq!(r.p_value, 0.04999579, epsilon = 1e-6);
        assert_relative_eq!(r.log2_fold_change, 0.196 / LN_2, epsilon = 1e-12);
        assert_eq!(r.coefficient, "statuspost");
    }

    #[test]
    fn test_sign_symmetric() {
        let up = test_wald_nb(&fit(0.5, 0.2), 1, "x").unwrap();
        let down = test_wald_nb(&fit(-0.5, 0.2), 1, "x").unwrap();
        assert_relative_eq!(up.p_value, down.p_value, epsilon = 1e-15);
        assert!(up.statistic > 0.0 && down.statistic < 0.0);
    }

    #[test]
    fn test_degenerate_se_gives_nan() {
        let r = test_wald_nb(&fit(0.5, 0.0), 1, "x").unwrap();
        assert!(r.p_value.is_nan());
        assert!(test_wald_nb(&fit(0.5, 0.1), 5, "x").is_err());
    }
}
