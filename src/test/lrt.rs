//! Likelihood Ratio Test (LRT) for nested NB models.
//!
//! Compares a full model against a reduced model without the predictor,
//! both fitted at the same dispersion.

use crate::data::DesignMatrix;
use crate::error::{FameError, Result};
use crate::model::{fit_nb_single, NbFitSingle};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Result of LRT for a single gene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrtResultSingle {
    pub gene_id: String,
    /// Log-likelihood of the full model.
    pub ll_full: f64,
    /// Log-likelihood of the reduced model.
    pub ll_reduced: f64,
    /// LRT statistic: 2 * (ll_full - ll_reduced).
    pub statistic: f64,
    /// Degrees of freedom (number of predictor columns).
    pub df: usize,
    pub p_value: f64,
}

/// Perform an LRT for one gene given its full-model fit.
///
/// The reduced model is refitted at the full model's dispersion. The
/// statistic is compared to a chi-squared distribution with
/// `df = full columns - reduced columns`.
///
/// # Arguments
/// * `full` - Full model fit of the gene
/// * `y` - Counts of the gene
/// * `full_design` - Design of the full fit
/// * `reduced_design` - Nested design without the predictor
/// * `log_offset` - `ln` size factors
pub fn test_lrt_nb(
    full: &NbFitSingle,
    y: &[f64],
    full_design: &DesignMatrix,
    reduced_design: &DesignMatrix,
    log_offset: &[f64],
) -> Result<LrtResultSingle> {
    let df = full_design
        .n_coefficients()
        .checked_sub(reduced_design.n_coefficients())
        .filter(|&d| d > 0)
        .ok_or_else(|| {
            FameError::InvalidParameter(
                "reduced design must have fewer coefficients than the full design".to_string(),
            )
        })?;

    let reduced = fit_nb_single(
        &full.gene_id,
        y,
        reduced_design.matrix(),
        log_offset,
        full.dispersion,
    )?;

    let chi_sq = ChiSquared::new(df as f64)
        .map_err(|e| FameError::Numerical(format!("chi-squared({}): {}", df, e)))?;

    let ll_full = full.log_likelihood;
    let ll_reduced = reduced.log_likelihood;
    // Nested fits; tiny negative values are convergence noise
    let statistic = (2.0 * (ll_full - ll_reduced)).max(0.0);
    let p_value = if statistic.is_finite() {
        chi_sq.sf(statistic)
    } else {
        f64::NAN
    };

    Ok(LrtResultSingle {
        gene_id: full.gene_id.clone(),
        ll_full,
        ll_reduced,
        statistic,
        df,
        p_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn designs() -> (DesignMatrix, DesignMatrix) {
        let ids: Vec<String> = (0..9).map(|i| format!("s{}", i)).collect();
        // Three ordered groups of three samples
        let full = DMatrix::from_fn(9, 3, |i, j| match j {
            0 => 1.0,
            1 => ((i / 3) == 1) as u8 as f64,
            _ => ((i / 3) == 2) as u8 as f64,
        });
        let full = DesignMatrix::from_matrix(
            full,
            vec!["(Intercept)".into(), "age_catmid".into(), "age_catold".into()],
            ids.clone(),
        );
        let reduced = DesignMatrix::from_matrix(
            DMatrix::from_element(9, 1, 1.0),
            vec!["(Intercept)".into()],
            ids,
        );
        (full, reduced)
    }

    #[test]
    fn test_lrt_detects_group_shift() {
        let (full_design, reduced_design) = designs();
        let y = [20.0, 22.0, 18.0, 60.0, 55.0, 65.0, 200.0, 190.0, 210.0];
        let offset = [0.0; 9];
        let full = fit_nb_single("g", &y, full_design.matrix(), &offset, 0.02).unwrap();
        let r = test_lrt_nb(&full, &y, &full_design, &reduced_design, &offset).unwrap();
        assert_eq!(r.df, 2);
        assert!(r.ll_full >= r.ll_reduced);
        assert!(r.p_value < 1e-6, "p = {}", r.p_value);
    }

    #[test]
    fn test_lrt_null_gene() {
        let (full_design, reduced_design) = designs();
        let y = [50.0, 52.0, 48.0, 49.0, 51.0, 50.0, 50.0, 48.0, 52.0];
        let offset = [0.0; 9];
        let full = fit_nb_single("g", &y, full_design.matrix(), &offset, 0.02).unwrap();
        let r = test_lrt_nb(&full, &y, &full_design, &reduced_design, &offset).unwrap();
        assert!(r.p_value > 0.5, "p = {}", r.p_value);
    }

    #[test]
    fn test_lrt_requires_nested_design() {
        let (full_design, _) = designs();
        let y = [1.0; 9];
        let full = fit_nb_single("g", &y, full_design.matrix(), &[0.0; 9], 0.1).unwrap();
        assert!(test_lrt_nb(&full, &y, &full_design, &full_design, &[0.0; 9]).is_err());
    }
}
