//! Configured end-to-end analysis runs.

pub mod config;
mod runner;

pub use config::{
    AnalysisConfig, AnnotationSettings, ClusteringSettings, EnrichmentMode, EnrichmentSettings,
};
pub use runner::{
    run_analysis, AnalysisOutput, ClusteringOutcome, ClusteringSummary, EnrichmentSummary,
    ModelSummary, PredictorEnrichment, RunSummary,
};
