//! Negative binomial GLM fitting for differential expression.

pub mod dispersion;
pub mod fit;
pub mod nb;

pub use dispersion::{
    estimate_dispersions, gene_wise_dispersion, DispersionEstimates, DispersionMode,
    DispersionTrend,
};
pub use fit::{fit_model, fit_predictors, FitOptions, PredictorOutcome, DEFAULT_ALPHA};
pub use nb::{fit_nb_single, nb_deviance, nb_log_likelihood, NbFitSingle};
