//! Per-predictor differential expression: design, dispersion, per-gene
//! NB fits, hypothesis tests and BH adjustment.

use crate::correct::adjust_bh;
use crate::data::{
    CountMatrix, DesignMatrix, ModelResult, ModelResultSet, ModelSpec, SampleMetadata,
    SkippedGene, TestMode,
};
use crate::error::{FameError, Result};
use crate::model::dispersion::{estimate_dispersions, DispersionMode};
use crate::model::nb::fit_nb_single;
use crate::normalize::{size_factors, SizeFactorMethod};
use crate::test::{test_lrt_nb, test_wald_nb};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::f64::consts::LN_2;
use tracing::{info, warn};

/// Default significance threshold on adjusted p-values.
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Options shared by every model of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    pub size_factor_method: SizeFactorMethod,
    pub dispersion_mode: DispersionMode,
    /// Significance threshold used in log summaries.
    pub alpha: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            size_factor_method: SizeFactorMethod::default(),
            dispersion_mode: DispersionMode::default(),
            alpha: DEFAULT_ALPHA,
        }
    }
}

/// Outcome of one predictor. A failing predictor does not stop the others.
#[derive(Debug)]
pub struct PredictorOutcome {
    pub spec: ModelSpec,
    pub result: Result<ModelResultSet>,
}

impl PredictorOutcome {
    pub fn label(&self) -> &str {
        self.spec.label()
    }

    /// The result set if the predictor was fitted.
    pub fn ok(&self) -> Option<&ModelResultSet> {
        self.result.as_ref().ok()
    }
}

/// Fit `counts ~ offset(log s) + covariates + predictor` for every gene.
///
/// Samples with a missing value in any model variable are dropped for this
/// model only. Genes that cannot be fitted are recorded in
/// [`ModelResultSet::skipped`] and never imputed.
///
/// # Errors
/// `SchemaMismatch` when phenotype rows are not aligned with the count
/// columns, `MissingColumn` for an unknown model variable and
/// `InsufficientData` when too few samples remain.
pub fn fit_model(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    spec: &ModelSpec,
    options: &FitOptions,
) -> Result<ModelResultSet> {
    metadata.ensure_aligned(counts.sample_ids())?;
    let label = spec.label().to_string();

    let complete = metadata.complete_cases(&spec.variables())?;
    let dropped = counts.n_samples() - complete.len();
    let (counts, metadata) = if dropped > 0 {
        let ids: Vec<String> = complete
            .iter()
            .map(|&i| counts.sample_ids()[i].clone())
            .collect();
        warn!(predictor = %label, dropped, "samples with missing model variables dropped");
        (
            Cow::Owned(counts.subset_samples(&complete)?),
            Cow::Owned(metadata.subset_samples(&ids)?),
        )
    } else {
        (Cow::Borrowed(counts), Cow::Borrowed(metadata))
    };

    let design = DesignMatrix::from_spec(&metadata, spec)?;
    let n_coef = design.n_coefficients();
    if counts.n_samples() <= n_coef {
        return Err(FameError::InsufficientData {
            id: label,
            reason: format!(
                "{} samples for {} coefficients",
                counts.n_samples(),
                n_coef
            ),
        });
    }
    let coef_idx = design.tested_coefficient(spec)?;
    let coef_name = design.coefficient_names()[coef_idx].clone();
    let reduced = match spec.test {
        TestMode::Lrt => Some(design.reduced_without_predictor()),
        TestMode::Wald => None,
    };

    let sf = size_factors(&counts, options.size_factor_method)?;
    let log_offset: Vec<f64> = sf.iter().map(|s| s.ln()).collect();
    let disp = estimate_dispersions(&counts, &design, &sf, options.dispersion_mode)?;

    let outcomes: Vec<std::result::Result<ModelResult, SkippedGene>> = (0..counts.n_genes())
        .into_par_iter()
        .map(|i| {
            let gene_id = &counts.gene_ids()[i];
            let skip = |reason: String| SkippedGene {
                gene_id: gene_id.clone(),
                reason,
            };
            let y = counts.row_f64(i);
            let nonzero = y.iter().filter(|&&v| v > 0.0).count();
            if nonzero == 0 {
                return Err(skip("all-zero counts".to_string()));
            }
            if nonzero < n_coef + 1 {
                return Err(skip(format!(
                    "{} non-zero observations for {} coefficients",
                    nonzero, n_coef
                )));
            }
            let alpha = disp.dispersions[i]
                .ok_or_else(|| skip("dispersion could not be estimated".to_string()))?;
            let fit = fit_nb_single(gene_id, &y, design.matrix(), &log_offset, alpha)
                .map_err(|e| skip(e.to_string()))?;

            let mut row = ModelResult {
                gene_id: gene_id.clone(),
                predictor: label.clone(),
                coefficient: coef_name.clone(),
                base_mean: disp.base_means[i],
                log2_fold_change: fit.coefficients[coef_idx] / LN_2,
                lfc_se: fit.std_errors[coef_idx] / LN_2,
                statistic: f64::NAN,
                p_value: f64::NAN,
                p_adjusted: f64::NAN,
                symbol: None,
                dispersion: alpha,
            };
            match &reduced {
                None => {
                    let wald = test_wald_nb(&fit, coef_idx, &coef_name)
                        .map_err(|e| skip(e.to_string()))?;
                    row.statistic = wald.statistic;
                    row.p_value = wald.p_value;
                }
                Some(reduced) => {
                    let lrt = test_lrt_nb(&fit, &y, &design, reduced, &log_offset)
                        .map_err(|e| skip(e.to_string()))?;
                    row.statistic = lrt.statistic;
                    row.p_value = lrt.p_value;
                }
            }
            Ok(row)
        })
        .collect();

    let mut results = Vec::with_capacity(outcomes.len());
    let mut skipped = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(r) => results.push(r),
            Err(s) => skipped.push(s),
        }
    }

    let p: Vec<f64> = results.iter().map(|r| r.p_value).collect();
    for (r, q) in results.iter_mut().zip(adjust_bh(&p)) {
        r.p_adjusted = q;
    }

    let mut set = ModelResultSet::new(label, spec.test, results);
    set.skipped = skipped;
    set.dropped_samples = dropped;

    let summary = set.summary(options.alpha);
    info!(
        predictor = %set.predictor,
        test = %spec.test,
        samples = counts.n_samples(),
        tested = summary.tested,
        up = summary.up,
        down = summary.down,
        skipped = summary.skipped,
        "model fitted"
    );
    Ok(set)
}

/// Fit every model spec in order.
pub fn fit_predictors(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    specs: &[ModelSpec],
    options: &FitOptions,
) -> Vec<PredictorOutcome> {
    specs
        .iter()
        .map(|spec| {
            let result = fit_model(counts, metadata, spec, options);
            if let Err(e) = &result {
                warn!(predictor = spec.label(), error = %e, "predictor failed");
            }
            PredictorOutcome {
                spec: spec.clone(),
                result,
            }
        })
        .collect()
}
