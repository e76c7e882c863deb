//! Per-sample size factors and normalized counts.

use crate::data::CountMatrix;
use crate::error::{FameError, Result};
use crate::model::dispersion::median;
use crate::normalize::TransformedMatrix;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Size factor estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeFactorMethod {
    /// Median of ratios to the per-gene geometric mean. Robust when a
    /// minority of genes change.
    #[default]
    MedianOfRatios,
    /// Library size over the geometric mean of library sizes.
    TotalCount,
}

/// Estimate one size factor per sample.
///
/// For `MedianOfRatios`, genes with a zero in any sample are left out of
/// the reference. Errors with `Numerical` when a sample has no reads or no
/// gene is usable.
pub fn size_factors(counts: &CountMatrix, method: SizeFactorMethod) -> Result<Vec<f64>> {
    let lib_sizes = counts.col_sums();
    if let Some(j) = lib_sizes.iter().position(|&l| l == 0) {
        return Err(FameError::Numerical(format!(
            "sample '{}' has zero sequencing depth",
            counts.sample_ids()[j]
        )));
    }

    let factors = match method {
        SizeFactorMethod::TotalCount => {
            let log_libs: Vec<f64> = lib_sizes.iter().map(|&l| (l as f64).ln()).collect();
            let log_geo = log_libs.iter().sum::<f64>() / log_libs.len() as f64;
            log_libs.iter().map(|l| (l - log_geo).exp()).collect()
        }
        SizeFactorMethod::MedianOfRatios => {
            let n_samples = counts.n_samples();
            let reference: Vec<(Vec<f64>, f64)> = (0..counts.n_genes())
                .filter_map(|i| {
                    let row = counts.row_dense(i);
                    if row.iter().any(|&c| c == 0) {
                        return None;
                    }
                    let logs: Vec<f64> = row.iter().map(|&c| (c as f64).ln()).collect();
                    let log_geo = logs.iter().sum::<f64>() / n_samples as f64;
                    Some((logs, log_geo))
                })
                .collect();
            if reference.is_empty() {
                return Err(FameError::Numerical(
                    "every gene has a zero in some sample; median of ratios undefined".to_string(),
                ));
            }
            debug!(reference_genes = reference.len(), "median-of-ratios reference");
            (0..n_samples)
                .map(|j| {
                    let ratios = reference.iter().map(|(logs, g)| logs[j] - g).collect();
                    median(ratios).exp()
                })
                .collect()
        }
    };
    Ok(factors)
}

/// Counts divided by the sample size factors.
pub fn normalized_counts(counts: &CountMatrix, size_factors: &[f64]) -> Result<TransformedMatrix> {
    if size_factors.len() != counts.n_samples() {
        return Err(FameError::DimensionMismatch {
            expected: counts.n_samples(),
            actual: size_factors.len(),
        });
    }
    let data = DMatrix::from_fn(counts.n_genes(), counts.n_samples(), |i, j| {
        counts.get(i, j) as f64 / size_factors[j]
    });
    Ok(TransformedMatrix {
        data,
        gene_ids: counts.gene_ids().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
        transformation: "normalized".to_string(),
    })
}
