//! Variance-stabilizing transform for visualization and clustering.

use crate::data::{CountMatrix, DesignMatrix};
use crate::error::{FameError, Result};
use crate::model::dispersion::{estimate_dispersions, DispersionMode, DispersionTrend};
use crate::normalize::TransformedMatrix;
use nalgebra::DMatrix;
use tracing::{info, warn};

/// Apply the closed-form VST for the parametric dispersion trend.
///
/// With `alpha(mu) = a + b / mu` and normalized count `q`:
///
/// `vst(q) = log2((1 + b + 2 a q + 2 sqrt(a q (1 + b + a q))) / (4 a))`
///
/// Falls back to `log2(q + 1)` when the trend is not usable (`a <= 0`).
pub fn vst(
    counts: &CountMatrix,
    size_factors: &[f64],
    trend: &DispersionTrend,
) -> Result<TransformedMatrix> {
    if size_factors.len() != counts.n_samples() {
        return Err(FameError::DimensionMismatch {
            expected: counts.n_samples(),
            actual: size_factors.len(),
        });
    }

    let usable = trend.is_usable();
    if !usable {
        warn!(?trend, "dispersion trend unusable, VST falls back to log2(q + 1)");
    }
    let (a, b) = (trend.asympt, trend.extra);
    let transform = |q: f64| {
        if usable {
            ((1.0 + b + 2.0 * a * q + 2.0 * (a * q * (1.0 + b + a * q)).sqrt()) / (4.0 * a)).log2()
        } else {
            (q + 1.0).log2()
        }
    };

    let data = DMatrix::from_fn(counts.n_genes(), counts.n_samples(), |i, j| {
        transform(counts.get(i, j) as f64 / size_factors[j])
    });
    Ok(TransformedMatrix {
        data,
        gene_ids: counts.gene_ids().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
        transformation: if usable { "vst" } else { "log2p1" }.to_string(),
    })
}

/// VST with a trend estimated blind to the sample groups (intercept-only design).
pub fn vst_blind(counts: &CountMatrix, size_factors: &[f64]) -> Result<TransformedMatrix> {
    let n = counts.n_samples();
    let design = DesignMatrix::from_matrix(
        DMatrix::from_element(n, 1, 1.0),
        vec!["(Intercept)".to_string()],
        counts.sample_ids().to_vec(),
    );
    let trend = match estimate_dispersions(counts, &design, size_factors, DispersionMode::GeneWise) {
        Ok(est) => est.trend,
        Err(e) => {
            warn!(error = %e, "blind dispersion estimation failed");
            DispersionTrend::constant(0.0)
        }
    };
    info!(asympt = trend.asympt, extra = trend.extra, "blind VST trend");
    vst(counts, size_factors, &trend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn single_gene(values: Vec<u64>) -> CountMatrix {
        let n = values.len();
        CountMatrix::from_rows(
            &[values],
            vec!["g".to_string()],
            (0..n).map(|i| format!("s{}", i)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_vst_monotone_and_log2_like_for_large_counts() {
        let counts = single_gene(vec![0, 10, 100, 1000, 10000]);
        let trend = DispersionTrend {
            asympt: 0.05,
            extra: 1.0,
        };
        let t = vst(&counts, &[1.0; 5], &trend).unwrap();
        let row = t.row(0);
        assert!(row.windows(2).all(|w| w[1] > w[0]));
        // For large q the slope approaches 1 on the log2 scale
        assert_relative_eq!(row[4] - row[3], 10.0_f64.log2(), epsilon = 0.05);
        assert_eq!(t.transformation, "vst");
    }

    #[test]
    fn test_vst_fallback() {
        let counts = single_gene(vec![0, 3, 7]);
        let t = vst(&counts, &[1.0; 3], &DispersionTrend::constant(0.0)).unwrap();
        assert_eq!(t.row(0), vec![0.0, 2.0, 3.0]);
        assert_eq!(t.transformation, "log2p1");
    }

    #[test]
    fn test_vst_uses_size_factors() {
        let counts = single_gene(vec![50, 100]);
        let trend = DispersionTrend::constant(0.1);
        let t = vst(&counts, &[1.0, 2.0], &trend).unwrap();
        assert_relative_eq!(t.get(0, 0), t.get(0, 1), epsilon = 1e-12);
    }
}
