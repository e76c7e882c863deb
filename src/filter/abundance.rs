//! Expression-level filtering for count matrices.

use crate::data::CountMatrix;
use crate::error::{FameError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default minimum mean count per gene.
pub const DEFAULT_MIN_MEAN_COUNT: f64 = 10.0;

/// Outcome of a filtering step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterReport {
    pub genes_before: usize,
    pub genes_after: usize,
    pub genes_removed: usize,
    pub threshold: f64,
}

impl std::fmt::Display for FilterReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Mean count filter (>= {})", self.threshold)?;
        writeln!(f, "  Genes before:  {}", self.genes_before)?;
        writeln!(f, "  Genes after:   {}", self.genes_after)?;
        writeln!(
            f,
            "  Genes removed: {} ({:.1}%)",
            self.genes_removed,
            100.0 * self.genes_removed as f64 / self.genes_before.max(1) as f64
        )?;
        Ok(())
    }
}

/// Drop genes whose mean count across all samples is below `threshold`.
///
/// Zeros count toward the mean. Applying the filter twice gives the same
/// matrix as applying it once.
///
/// # Arguments
/// * `counts` - The count matrix to filter
/// * `threshold` - Minimum across-sample mean count
///
/// # Returns
/// The filtered matrix and a report; `EmptyData` when no gene passes.
pub fn filter_mean_count(counts: &CountMatrix, threshold: f64) -> Result<(CountMatrix, FilterReport)> {
    if !(threshold >= 0.0) {
        return Err(FameError::InvalidParameter(
            "threshold must be non-negative".to_string(),
        ));
    }

    let means = counts.row_means();
    let keep_indices: Vec<usize> = (0..counts.n_genes())
        .into_par_iter()
        .filter(|&row| means[row] >= threshold)
        .collect();

    if keep_indices.is_empty() {
        return Err(FameError::EmptyData(format!(
            "No genes have mean count >= {}",
            threshold
        )));
    }

    let filtered = counts.subset_genes(&keep_indices)?;
    let report = FilterReport {
        genes_before: counts.n_genes(),
        genes_after: filtered.n_genes(),
        genes_removed: counts.n_genes() - filtered.n_genes(),
        threshold,
    };
    info!(
        before = report.genes_before,
        after = report.genes_after,
        samples = filtered.n_samples(),
        "mean count filter applied"
    );
    Ok((filtered, report))
}
