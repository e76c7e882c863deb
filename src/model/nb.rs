//! Negative binomial GLM for RNA-seq counts.
//!
//! Log link with a per-sample offset `log(size factor)`:
//! `log mu_ij = log s_j + x_j' beta_i`, `Var(y) = mu + alpha mu^2`.
//! The dispersion `alpha` is held fixed during the fit; it is estimated
//! separately in [`crate::model::dispersion`].

use crate::error::{FameError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

/// Maximum iterations for IRLS.
pub const MAX_ITER: usize = 100;

/// Relative deviance change at which IRLS stops.
const DEV_TOL: f64 = 1e-8;

/// Lower bound on fitted means.
const MIN_MU: f64 = 0.5;

/// Ridge penalty on coefficients, keeps the fit finite when a group is all zero.
const RIDGE: f64 = 1e-6;

/// Fit of one gene at a fixed dispersion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbFitSingle {
    /// Gene identifier.
    pub gene_id: String,
    /// Estimated coefficients (natural log scale).
    pub coefficients: Vec<f64>,
    /// Standard errors of coefficients.
    pub std_errors: Vec<f64>,
    /// Dispersion used for the fit.
    pub dispersion: f64,
    /// Log-likelihood at convergence.
    pub log_likelihood: f64,
    pub deviance: f64,
    /// Number of IRLS iterations.
    pub iterations: usize,
    pub converged: bool,
    /// Fitted means, size factors included.
    #[serde(skip)]
    pub fitted_values: Vec<f64>,
}

impl NbFitSingle {
    /// Calculate z-statistic for a coefficient.
    pub fn z_statistic(&self, index: usize) -> Option<f64> {
        let coef = self.coefficients.get(index)?;
        let se = self.std_errors.get(index)?;
        if *se > 0.0 {
            Some(coef / se)
        } else {
            None
        }
    }
}

/// Fit a negative binomial GLM to a single gene using IRLS.
///
/// # Arguments
/// * `y` - Counts of one gene
/// * `x` - Design matrix (samples × coefficients)
/// * `log_offset` - `ln` of the size factor of every sample
/// * `alpha` - Fixed dispersion
///
/// # Returns
/// The fit, or `InsufficientData` when the information matrix is singular.
pub fn fit_nb_single(
    gene_id: &str,
    y: &[f64],
    x: &DMatrix<f64>,
    log_offset: &[f64],
    alpha: f64,
) -> Result<NbFitSingle> {
    let n_samples = y.len();
    let n_coef = x.ncols();
    if x.nrows() != n_samples || log_offset.len() != n_samples {
        return Err(FameError::DimensionMismatch {
            expected: n_samples,
            actual: x.nrows(),
        });
    }
    if !(alpha.is_finite() && alpha > 0.0) {
        return Err(FameError::InsufficientData {
            id: gene_id.to_string(),
            reason: format!("non-finite dispersion {}", alpha),
        });
    }
    let singular = || FameError::InsufficientData {
        id: gene_id.to_string(),
        reason: "singular information matrix".to_string(),
    };

    let y_vec = DVector::from_column_slice(y);
    let offset = DVector::from_column_slice(log_offset);

    // Start from least squares on log normalized counts
    let z0 = DVector::from_iterator(
        n_samples,
        (0..n_samples).map(|i| (y[i] + 0.1).ln() - offset[i]),
    );
    let xtx = x.transpose() * x + DMatrix::identity(n_coef, n_coef) * RIDGE;
    let mut beta = xtx
        .cholesky()
        .ok_or_else(singular)?
        .solve(&(x.transpose() * &z0));

    let mut mu = compute_mu(x, &beta, &offset);
    let mut dev = nb_deviance(&y_vec, &mu, alpha);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..MAX_ITER {
        iterations = iter + 1;

        let w = working_weights(&mu, alpha);
        // Working response on the linear predictor scale, offset removed
        let z = DVector::from_iterator(
            n_samples,
            (0..n_samples).map(|i| mu[i].ln() - offset[i] + (y_vec[i] - mu[i]) / mu[i]),
        );

        let xtw = weighted_transpose(x, &w);
        let info = &xtw * x + DMatrix::identity(n_coef, n_coef) * RIDGE;
        let beta_new = info.cholesky().ok_or_else(singular)?.solve(&(&xtw * z));

        let mu_new = compute_mu(x, &beta_new, &offset);
        let dev_new = nb_deviance(&y_vec, &mu_new, alpha);
        if !dev_new.is_finite() {
            break;
        }

        let rel_change = (dev_new - dev).abs() / (dev_new.abs() + 0.1);
        beta = beta_new;
        mu = mu_new;
        dev = dev_new;
        if rel_change < DEV_TOL {
            converged = true;
            break;
        }
    }

    // Standard errors from the Fisher information X'WX
    let w = working_weights(&mu, alpha);
    let info = weighted_transpose(x, &w) * x;
    let cov = info.try_inverse().ok_or_else(singular)?;
    let std_errors: Vec<f64> = (0..n_coef).map(|j| cov[(j, j)].max(0.0).sqrt()).collect();
    if std_errors.iter().any(|se| !se.is_finite()) {
        return Err(singular());
    }

    Ok(NbFitSingle {
        gene_id: gene_id.to_string(),
        coefficients: beta.iter().copied().collect(),
        std_errors,
        dispersion: alpha,
        log_likelihood: nb_log_likelihood(&y_vec, &mu, alpha),
        deviance: dev,
        iterations,
        converged,
        fitted_values: mu.iter().copied().collect(),
    })
}

/// Compute mu = s * exp(X * beta).
pub(crate) fn compute_mu(x: &DMatrix<f64>, beta: &DVector<f64>, offset: &DVector<f64>) -> DVector<f64> {
    let eta = x * beta + offset;
    DVector::from_iterator(eta.len(), eta.iter().map(|e| e.exp().max(MIN_MU)))
}

/// IRLS weights `mu / (1 + alpha mu)`.
pub(crate) fn working_weights(mu: &DVector<f64>, alpha: f64) -> DVector<f64> {
    DVector::from_iterator(mu.len(), mu.iter().map(|&m| m / (1.0 + alpha * m)))
}

/// `X' W` for diagonal `W`.
pub(crate) fn weighted_transpose(x: &DMatrix<f64>, w: &DVector<f64>) -> DMatrix<f64> {
    let mut xt = x.transpose();
    for (j, &wj) in w.iter().enumerate() {
        xt.column_mut(j).scale_mut(wj);
    }
    xt
}

/// Negative binomial log-likelihood with dispersion `alpha`.
pub fn nb_log_likelihood(y: &DVector<f64>, mu: &DVector<f64>, alpha: f64) -> f64 {
    let theta = 1.0 / alpha;
    y.iter()
        .zip(mu.iter())
        .map(|(&yi, &m)| {
            ln_gamma(yi + theta) - ln_gamma(theta) - ln_gamma(yi + 1.0)
                + theta * (theta / (theta + m)).ln()
                + yi * (m / (theta + m)).ln()
        })
        .sum()
}

/// Negative binomial deviance with dispersion `alpha`.
pub fn nb_deviance(y: &DVector<f64>, mu: &DVector<f64>, alpha: f64) -> f64 {
    let theta = 1.0 / alpha;
    let dev_sum: f64 = y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &m)| {
            let term1 = if yi > 0.0 { yi * (yi / m).ln() } else { 0.0 };
            let term2 = (yi + theta) * ((yi + theta) / (m + theta)).ln();
            term1 - term2
        })
        .sum();
    2.0 * dev_sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 8 samples, alternating reference / contrast group.
    fn two_group_design() -> DMatrix<f64> {
        DMatrix::from_fn(8, 2, |i, j| if j == 0 { 1.0 } else { (i % 2) as f64 })
    }

    #[test]
    fn test_recovers_group_effect() {
        let y = [48.0, 195.0, 52.0, 205.0, 47.0, 198.0, 53.0, 202.0];
        let fit = fit_nb_single("g", &y, &two_group_design(), &[0.0; 8], 0.01).unwrap();

        assert!(fit.converged);
        // Group means 50 and 200
        assert_relative_eq!(fit.coefficients[0], 50.0_f64.ln(), epsilon = 1e-4);
        assert_relative_eq!(fit.coefficients[1], 4.0_f64.ln(), epsilon = 1e-4);
        assert!(fit.z_statistic(1).unwrap() > 5.0);
    }

    #[test]
    fn test_offsets_absorb_depth() {
        // Same expression, second group sequenced twice as deep
        let y = [50.0, 100.0, 50.0, 100.0, 50.0, 100.0, 50.0, 100.0];
        let offset: Vec<f64> = (0..8).map(|i| if i % 2 == 1 { 2.0_f64.ln() } else { 0.0 }).collect();
        let fit = fit_nb_single("g", &y, &two_group_design(), &offset, 0.05).unwrap();
        assert_relative_eq!(fit.coefficients[1], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_null_gene_small_z() {
        let y = [95.0, 105.0, 98.0, 102.0, 97.0, 103.0, 99.0, 101.0];
        let fit = fit_nb_single("g", &y, &two_group_design(), &[0.0; 8], 0.01).unwrap();
        assert!(fit.z_statistic(1).unwrap().abs() < 2.0);
        assert!(fit.std_errors.iter().all(|se| *se > 0.0 && se.is_finite()));
    }

    #[test]
    fn test_invalid_dispersion_is_per_gene_error() {
        let y = [1.0; 8];
        let err = fit_nb_single("g", &y, &two_group_design(), &[0.0; 8], f64::NAN).unwrap_err();
        assert!(err.is_per_gene());
    }

    #[test]
    fn test_deviance_zero_at_saturation() {
        let y = DVector::from_vec(vec![3.0, 10.0]);
        assert_relative_eq!(nb_deviance(&y, &y, 0.1), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_log_likelihood_matches_poisson_limit() {
        // alpha -> 0 approaches the Poisson log-likelihood
        let y = DVector::from_vec(vec![4.0]);
        let mu = DVector::from_vec(vec![5.0]);
        let poisson = 4.0 * 5.0_f64.ln() - 5.0 - ln_gamma(5.0);
        assert_relative_eq!(nb_log_likelihood(&y, &mu, 1e-7), poisson, epsilon = 1e-4);
    }
}
