//! Benjamini-Hochberg false discovery rate correction.

use serde::{Deserialize, Serialize};

/// Result of BH correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhCorrected {
    /// Identifiers in original order.
    pub ids: Vec<String>,
    /// Original p-values.
    pub p_values: Vec<f64>,
    /// Adjusted p-values; NaN where the input was NaN.
    pub p_adjusted: Vec<f64>,
    /// Number of finite p-values that entered the correction.
    pub n_tests: usize,
}

impl BhCorrected {
    /// Get the adjusted p-value for an identifier.
    pub fn get(&self, id: &str) -> Option<f64> {
        let idx = self.ids.iter().position(|f| f == id)?;
        self.p_adjusted.get(idx).copied()
    }

    /// Count significant results at a threshold.
    pub fn n_significant(&self, alpha: f64) -> usize {
        self.p_adjusted.iter().filter(|&&q| q < alpha).count()
    }
}

/// Benjamini-Hochberg adjusted p-values.
///
/// `p_adj[i] = min over j with p_j >= p_i of (p_j * m / rank_j)`, capped at 1.
/// NaN p-values are excluded from `m` and stay NaN.
pub fn adjust_bh(p_values: &[f64]) -> Vec<f64> {
    let mut indices: Vec<usize> = (0..p_values.len())
        .filter(|&i| !p_values[i].is_nan())
        .collect();
    let m = indices.len();
    let mut adjusted = vec![f64::NAN; p_values.len()];
    if m == 0 {
        return adjusted;
    }

    indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let m_f64 = m as f64;
    let mut running_min = 1.0_f64;
    // Work backwards from the largest p-value
    for (rank0, &idx) in indices.iter().enumerate().rev() {
        let rank = (rank0 + 1) as f64;
        let candidate = p_values[idx] * m_f64 / rank;
        running_min = running_min.min(candidate);
        adjusted[idx] = running_min.min(1.0);
    }
    adjusted
}

/// Apply Benjamini-Hochberg FDR correction.
///
/// # Arguments
/// * `p_values` - Raw p-values
/// * `ids` - Identifiers (same order as p_values)
pub fn correct_bh(p_values: &[f64], ids: &[String]) -> BhCorrected {
    let p_adjusted = adjust_bh(p_values);
    BhCorrected {
        ids: ids.to_vec(),
        p_values: p_values.to_vec(),
        n_tests: p_values.iter().filter(|p| !p.is_nan()).count(),
        p_adjusted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_known_values() {
        // Matches R: p.adjust(c(0.01, 0.04, 0.03, 0.005), "BH")
        let adj = adjust_bh(&[0.01, 0.04, 0.03, 0.005]);
        assert_relative_eq!(adj[0], 0.02, epsilon = 1e-12);
        assert_relative_eq!(adj[1], 0.04, epsilon = 1e-12);
        assert_relative_eq!(adj[2], 0.04, epsilon = 1e-12);
        assert_relative_eq!(adj[3], 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_monotone_and_bounded() {
        let p: Vec<f64> = (0..50).map(|i| ((i * 37) % 50) as f64 / 49.0).collect();
        let adj = adjust_bh(&p);
        let mut order: Vec<usize> = (0..p.len()).collect();
        order.sort_by(|&a, &b| p[a].total_cmp(&p[b]));
        for w in order.windows(2) {
            assert!(adj[w[0]] <= adj[w[1]]);
        }
        for (pi, qi) in p.iter().zip(&adj) {
            assert!(*qi >= *pi && *qi <= 1.0);
        }
    }

    #[test]
    fn test_nan_excluded_from_count() {
        let adj = adjust_bh(&[0.01, f64::NAN, 0.02]);
        assert!(adj[1].is_nan());
        assert_relative_eq!(adj[0], 0.02, epsilon = 1e-12);
        assert_relative_eq!(adj[2], 0.02, epsilon = 1e-12);

        let bh = correct_bh(&[0.01, f64::NAN], &["a".into(), "b".into()]);
        assert_eq!(bh.n_tests, 1);
        assert_eq!(bh.get("a"), Some(0.01));
        assert_eq!(bh.n_significant(0.05), 1);
    }

    #[test]
    fn test_empty() {
        assert!(adjust_bh(&[]).is_empty());
        assert!(adjust_bh(&[f64::NAN]).iter().all(|q| q.is_nan()));
    }
}
