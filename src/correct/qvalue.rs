//! Storey q-values.

use crate::correct::bh::adjust_bh;

/// Lambda used for the null proportion estimate.
pub const DEFAULT_LAMBDA: f64 = 0.5;

/// Estimate the proportion of true nulls, `#{p > lambda} / (m (1 - lambda))`, capped at 1.
pub fn estimate_pi0(p_values: &[f64], lambda: f64) -> f64 {
    let finite: Vec<f64> = p_values.iter().copied().filter(|p| !p.is_nan()).collect();
    if finite.is_empty() {
        return 1.0;
    }
    let above = finite.iter().filter(|&&p| p > lambda).count() as f64;
    let pi0 = above / (finite.len() as f64 * (1.0 - lambda));
    if pi0 > 0.0 {
        pi0.min(1.0)
    } else {
        1.0
    }
}

/// Storey q-values: BH-adjusted p-values scaled by `pi0`.
pub fn qvalues(p_values: &[f64], lambda: f64) -> Vec<f64> {
    let pi0 = estimate_pi0(p_values, lambda);
    adjust_bh(p_values).into_iter().map(|q| q * pi0).collect()
}
