//! Transcriptome analysis for the FAMe ageing and menopause study
//!
//! This library relates age, menopausal status and sex hormones to RNA-seq
//! counts with negative-binomial models, then interprets the results with
//! gene-set enrichment and expression-trajectory clustering.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (CountMatrix, SampleMetadata, ModelSpec, results)
//! - **merge**: Outer join of cohorts on gene identifier
//! - **filter**: Mean-count gene filtering
//! - **normalize**: Size factors, variance-stabilizing transform, batch removal
//! - **model**: NB GLM fits and dispersion estimation
//! - **test**: Wald and likelihood ratio tests
//! - **correct**: Benjamini-Hochberg and Storey q-values
//! - **annotate**: Gene id to symbol mapping
//! - **enrich**: Over-representation analysis and preranked GSEA
//! - **cluster**: Average-linkage clustering of group trajectories
//! - **report**: Plot-ready records and SVG figures
//! - **pipeline**: YAML-configured end-to-end runs
//! - **simulate**: Synthetic NB count data with known effects
//!
//! # Example
//!
//! ```no_run
//! use fame_omics::prelude::*;
//!
//! let counts = CountMatrix::from_tsv("counts.tsv").unwrap();
//! let metadata = SampleMetadata::from_tsv("phenotype.tsv").unwrap();
//!
//! let spec = ModelSpec::new("menopause")
//!     .with_covariates(&["batch"])
//!     .with_contrast("post");
//! let results = fit_model(&counts, &metadata, &spec, &FitOptions::default()).unwrap();
//! results.to_tsv("menopause_results.tsv").unwrap();
//! ```

pub mod annotate;
pub mod cluster;
pub mod correct;
pub mod data;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod simulate;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::annotate::{AnnotationOptions, AnnotationReport, GeneAnnotator};
    pub use crate::cluster::{cluster_patterns, PatternClusters, PatternConfig};
    pub use crate::correct::{adjust_bh, correct_bh, qvalues};
    pub use crate::data::{
        CountMatrix, Direction, ModelResult, ModelResultSet, ModelSpec, SampleMetadata, TestMode,
        Variable,
    };
    pub use crate::enrich::{
        gsea_preranked, ora, ranking_from_results, GeneSet, GeneSetCollection, GseaConfig,
        GseaReport, OraConfig, OraReport, RankMetric,
    };
    pub use crate::error::{FameError, Result};
    pub use crate::filter::{filter_mean_count, FilterReport};
    pub use crate::merge::{merge_cohorts, Cohort, MergedCohort};
    pub use crate::model::{fit_model, fit_predictors, DispersionMode, FitOptions};
    pub use crate::normalize::{
        remove_batch_effect, size_factors, vst, vst_blind, SizeFactorMethod, TransformedMatrix,
    };
    pub use crate::pipeline::{run_analysis, AnalysisConfig, AnalysisOutput};
    pub use crate::report::{Layout, Panel, Renderer};
    pub use crate::simulate::{
        simulate_continuous, simulate_trajectories, simulate_two_group, ContinuousConfig,
        TrajectoryConfig, TwoGroupConfig,
    };
}
