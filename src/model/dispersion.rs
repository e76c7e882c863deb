//! Dispersion estimation for the NB GLM.
//!
//! Gene-wise estimates maximize the Cox-Reid adjusted profile likelihood
//! over `log alpha` with the fitted means held fixed. A parametric trend
//! `alpha(mu) = asympt + extra / mu` is then fitted across genes, and the
//! final dispersion of each gene is chosen by [`DispersionMode`].

use crate::data::{CountMatrix, DesignMatrix};
use crate::error::{FameError, Result};
use crate::model::nb::{fit_nb_single, nb_log_likelihood, weighted_transpose};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Smallest dispersion considered.
pub const MIN_DISP: f64 = 1e-8;

/// Rounds of (fit means, optimize dispersion).
const ALTERNATING_ROUNDS: usize = 3;

/// Trend fit iterations.
const TREND_MAX_ITER: usize = 10;

/// How the final per-gene dispersion is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispersionMode {
    /// Gene-wise estimate only.
    GeneWise,
    /// Larger of the gene-wise estimate and the trend.
    #[default]
    Maximum,
    /// Trend value at the gene's mean.
    Trend,
}

/// Parametric mean-dispersion relation `asympt + extra / mean`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispersionTrend {
    pub asympt: f64,
    pub extra: f64,
}

impl DispersionTrend {
    /// Trend with no mean dependence.
    pub fn constant(alpha: f64) -> Self {
        Self {
            asympt: alpha,
            extra: 0.0,
        }
    }

    /// Dispersion predicted at `mean`.
    pub fn eval(&self, mean: f64) -> f64 {
        self.asympt + self.extra / mean.max(MIN_DISP)
    }

    /// Whether the closed-form variance-stabilizing transform applies.
    pub fn is_usable(&self) -> bool {
        self.asympt > 0.0 && self.extra >= 0.0 && self.asympt.is_finite() && self.extra.is_finite()
    }

    /// Fit the trend to gene-wise estimates.
    ///
    /// Gamma-family GLM with identity link, fitted by iteratively reweighted
    /// least squares; genes whose residual ratio falls outside `[1e-4, 15]`
    /// are dropped between iterations. Falls back to a constant trend at
    /// the median gene-wise dispersion when the fit does not give positive
    /// coefficients.
    pub fn fit(means: &[f64], dispersions: &[f64]) -> Result<Self> {
        let points: Vec<(f64, f64)> = means
            .iter()
            .zip(dispersions)
            .filter(|(m, d)| **m > 0.0 && d.is_finite() && **d >= 100.0 * MIN_DISP)
            .map(|(&m, &d)| (m, d))
            .collect();
        if points.is_empty() {
            return Err(FameError::Numerical(
                "no gene-wise dispersion usable for the trend".to_string(),
            ));
        }

        let fallback = Self::constant(median(points.iter().map(|p| p.1).collect()));
        if points.len() < 3 {
            return Ok(fallback);
        }

        let mut coef = (0.1, 1.0);
        let mut use_point = vec![true; points.len()];
        for iter in 0..TREND_MAX_ITER {
            let mut xtwx = DMatrix::<f64>::zeros(2, 2);
            let mut xtwy = DVector::<f64>::zeros(2);
            for (&(m, d), _) in points.iter().zip(&use_point).filter(|(_, u)| **u) {
                let fitted = (coef.0 + coef.1 / m).max(MIN_DISP);
                let w = 1.0 / (fitted * fitted);
                let row = [1.0, 1.0 / m];
                for a in 0..2 {
                    xtwy[a] += w * row[a] * d;
                    for b in 0..2 {
                        xtwx[(a, b)] += w * row[a] * row[b];
                    }
                }
            }
            let Some(solved) = xtwx.try_inverse().map(|inv| inv * xtwy) else {
                return Ok(fallback);
            };
            let new_coef = (solved[0], solved[1]);
            if !(new_coef.0 > 0.0 && new_coef.1 >= 0.0) {
                warn!(
                    asympt = new_coef.0,
                    extra = new_coef.1,
                    "dispersion trend coefficients not positive, using constant trend"
                );
                return Ok(fallback);
            }

            let extra_change = if coef.1 > 0.0 && new_coef.1 > 0.0 {
                (new_coef.1 / coef.1).ln().abs()
            } else {
                0.0
            };
            let change = (new_coef.0 / coef.0).ln().abs().max(extra_change);
            coef = new_coef;
            for (u, &(m, d)) in use_point.iter_mut().zip(&points) {
                let ratio = d / (coef.0 + coef.1 / m);
                *u = (1e-4..15.0).contains(&ratio);
            }
            debug!(iter, asympt = coef.0, extra = coef.1, "dispersion trend iteration");
            if change < 1e-6 {
                break;
            }
        }

        Ok(Self {
            asympt: coef.0,
            extra: coef.1,
        })
    }
}

/// Dispersion estimates for every gene of a count matrix.
#[derive(Debug, Clone)]
pub struct DispersionEstimates {
    /// Mean of normalized counts per gene.
    pub base_means: Vec<f64>,
    /// Gene-wise estimates; `None` for genes that could not be estimated.
    pub gene_wise: Vec<Option<f64>>,
    pub trend: DispersionTrend,
    /// Final dispersion per gene, chosen by the mode.
    pub dispersions: Vec<Option<f64>>,
    pub mode: DispersionMode,
}

/// Estimate dispersions for all genes.
///
/// # Arguments
/// * `counts` - Count matrix (genes × samples)
/// * `design` - Design used for the gene-wise fits
/// * `size_factors` - One size factor per sample
/// * `mode` - How to combine gene-wise estimates and the trend
pub fn estimate_dispersions(
    counts: &CountMatrix,
    design: &DesignMatrix,
    size_factors: &[f64],
    mode: DispersionMode,
) -> Result<DispersionEstimates> {
    let n_samples = counts.n_samples();
    if design.n_samples() != n_samples || size_factors.len() != n_samples {
        return Err(FameError::DimensionMismatch {
            expected: n_samples,
            actual: design.n_samples().min(size_factors.len()),
        });
    }
    if n_samples <= design.n_coefficients() {
        return Err(FameError::InsufficientData {
            id: "design".to_string(),
            reason: "no residual degrees of freedom for dispersion estimation".to_string(),
        });
    }

    let log_offset: Vec<f64> = size_factors.iter().map(|s| s.ln()).collect();
    let x = design.matrix();

    let per_gene: Vec<(f64, Option<f64>)> = (0..counts.n_genes())
        .into_par_iter()
        .map(|i| {
            let y = counts.row_f64(i);
            let base_mean = y
                .iter()
                .zip(size_factors)
                .map(|(c, s)| c / s)
                .sum::<f64>()
                / n_samples as f64;
            let alpha = gene_wise_dispersion(&counts.gene_ids()[i], &y, x, &log_offset).ok();
            (base_mean, alpha)
        })
        .collect();

    let (base_means, gene_wise): (Vec<f64>, Vec<Option<f64>>) = per_gene.into_iter().unzip();
    let usable: Vec<(f64, f64)> = base_means
        .iter()
        .zip(&gene_wise)
        .filter_map(|(&m, d)| d.map(|d| (m, d)))
        .collect();
    let (means, disps): (Vec<f64>, Vec<f64>) = usable.into_iter().unzip();
    let trend = DispersionTrend::fit(&means, &disps)?;
    info!(
        genes = counts.n_genes(),
        estimated = disps.len(),
        asympt = trend.asympt,
        extra = trend.extra,
        "dispersion trend fitted"
    );

    let dispersions = base_means
        .iter()
        .zip(&gene_wise)
        .map(|(&m, gw)| {
            let gw = (*gw)?;
            let fitted = trend.eval(m);
            Some(match mode {
                DispersionMode::GeneWise => gw,
                DispersionMode::Trend => fitted,
                DispersionMode::Maximum => gw.max(fitted),
            })
        })
        .collect();

    Ok(DispersionEstimates {
        base_means,
        gene_wise,
        trend,
        dispersions,
        mode,
    })
}

/// Gene-wise dispersion by Cox-Reid adjusted profile likelihood.
///
/// Alternates between fitting the GLM means at the current dispersion and
/// a golden-section search over `log alpha` in `[MIN_DISP, max(10, n)]`
/// with the means fixed.
pub fn gene_wise_dispersion(
    gene_id: &str,
    y: &[f64],
    x: &DMatrix<f64>,
    log_offset: &[f64],
) -> Result<f64> {
    if y.iter().all(|&v| v == 0.0) {
        return Err(FameError::InsufficientData {
            id: gene_id.to_string(),
            reason: "all-zero counts".to_string(),
        });
    }
    let n = y.len();
    let max_disp = (n as f64).max(10.0);
    let y_vec = DVector::from_column_slice(y);

    let mut alpha = moments_dispersion(y, log_offset, x).clamp(MIN_DISP, max_disp);
    for _ in 0..ALTERNATING_ROUNDS {
        let fit = fit_nb_single(gene_id, y, x, log_offset, alpha)?;
        let mu = DVector::from_vec(fit.fitted_values);
        let log_alpha = golden_section_max(
            |la| cox_reid_log_likelihood(&y_vec, x, &mu, la.exp()),
            MIN_DISP.ln(),
            max_disp.ln(),
            1e-6,
        );
        let new_alpha = log_alpha.exp();
        let settled = (new_alpha.ln() - alpha.ln()).abs() < 1e-4;
        alpha = new_alpha;
        if settled {
            break;
        }
    }

    if !alpha.is_finite() {
        return Err(FameError::InsufficientData {
            id: gene_id.to_string(),
            reason: "non-finite dispersion".to_string(),
        });
    }
    Ok(alpha)
}

/// Log-likelihood with the Cox-Reid term `-0.5 log det(X' W X)`.
pub fn cox_reid_log_likelihood(y: &DVector<f64>, x: &DMatrix<f64>, mu: &DVector<f64>, alpha: f64) -> f64 {
    let w = DVector::from_iterator(mu.len(), mu.iter().map(|&m| 1.0 / (1.0 / m + alpha)));
    let info = weighted_transpose(x, &w) * x;
    let cr_term = match info.cholesky() {
        Some(chol) => -chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>(),
        None => 0.0,
    };
    nb_log_likelihood(y, mu, alpha) + cr_term
}

/// Starting value: moments estimate on normalized counts around the
/// least-squares group means.
fn moments_dispersion(y: &[f64], log_offset: &[f64], x: &DMatrix<f64>) -> f64 {
    let n = y.len();
    let p = x.ncols();
    let normalized = DVector::from_iterator(
        n,
        y.iter().zip(log_offset).map(|(c, lo)| c / lo.exp()),
    );
    let mu = match (x.transpose() * x).try_inverse() {
        Some(inv) => x * (inv * (x.transpose() * &normalized)),
        None => DVector::from_element(n, normalized.mean()),
    };
    let sum: f64 = normalized
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &m)| {
            let m = m.max(1.0);
            ((yi - m).powi(2) - m) / (m * m)
        })
        .sum();
    (sum / (n - p).max(1) as f64).max(MIN_DISP)
}

/// Maximize a unimodal function on `[lo, hi]`.
pub(crate) fn golden_section_max<F: Fn(f64) -> f64>(f: F, lo: f64, hi: f64, tol: f64) -> f64 {
    let inv_phi = (5.0_f64.sqrt() - 1.0) / 2.0;
    let (mut a, mut b) = (lo, hi);
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let mut fc = f(c);
    let mut fd = f(d);
    while (b - a).abs() > tol {
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = f(d);
        }
    }
    (a + b) / 2.0
}

pub(crate) fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{simulate_two_group, TwoGroupConfig};
    use approx::assert_relative_eq;

    #[test]
    fn test_golden_section() {
        let x = golden_section_max(|v| -(v - 1.3).powi(2), -5.0, 5.0, 1e-8);
        assert_relative_eq!(x, 1.3, epsilon = 1e-6);
    }

    #[test]
    fn test_trend_recovers_parametric_curve() {
        let means: Vec<f64> = (1..=200).map(|i| i as f64 * 5.0).collect();
        let disps: Vec<f64> = means.iter().map(|m| 0.05 + 2.0 / m).collect();
        let trend = DispersionTrend::fit(&means, &disps).unwrap();
        assert_relative_eq!(trend.asympt, 0.05, epsilon = 1e-4);
        assert_relative_eq!(trend.extra, 2.0, epsilon = 1e-3);
        assert!(trend.is_usable());
    }

    #[test]
    fn test_trend_falls_back_to_constant() {
        let trend = DispersionTrend::fit(&[10.0, 20.0], &[0.2, 0.4]).unwrap();
        assert_eq!(trend.extra, 0.0);
        assert_relative_eq!(trend.asympt, 0.3, epsilon = 1e-12);
        assert!(DispersionTrend::fit(&[], &[]).is_err());
    }

    #[test]
    fn test_all_zero_gene_rejected() {
        let x = DMatrix::from_element(6, 1, 1.0);
        let err = gene_wise_dispersion("g", &[0.0; 6], &x, &[0.0; 6]).unwrap_err();
        assert!(err.is_per_gene());
    }

    #[test]
    fn test_gene_wise_tracks_true_dispersion() {
        let config = TwoGroupConfig {
            n_genes: 200,
            n_samples: 40,
            n_differential: 0,
            dispersion: 0.1,
            base_mean: 500.0,
            seed: 11,
            ..Default::default()
        };
        let data = simulate_two_group(&config).unwrap();
        let design = DesignMatrix::from_matrix(
            DMatrix::from_element(40, 1, 1.0),
            vec!["(Intercept)".into()],
            data.counts.sample_ids().to_vec(),
        );
        let est = estimate_dispersions(&data.counts, &design, &vec![1.0; 40], DispersionMode::GeneWise)
            .unwrap();
        let gw: Vec<f64> = est.gene_wise.iter().flatten().copied().collect();
        assert_eq!(gw.len(), 200);
        let med = median(gw);
        assert!(med > 0.06 && med < 0.15, "median gene-wise dispersion {}", med);
    }

    #[test]
    fn test_maximum_mode_not_below_trend() {
        let config = TwoGroupConfig {
            n_genes: 100,
            n_samples: 12,
            seed: 5,
            ..Default::default()
        };
        let data = simulate_two_group(&config).unwrap();
        let design = DesignMatrix::from_matrix(
            DMatrix::from_element(12, 1, 1.0),
            vec!["(Intercept)".into()],
            data.counts.sample_ids().to_vec(),
        );
        let est = estimate_dispersions(&data.counts, &design, &vec![1.0; 12], DispersionMode::Maximum)
            .unwrap();
        for ((m, d), gw) in est.base_means.iter().zip(&est.dispersions).zip(&est.gene_wise) {
            if let (Some(d), Some(gw)) = (d, gw) {
                assert!(*d >= est.trend.eval(*m) - 1e-12);
                assert!(*d >= *gw);
            }
        }
    }
}
