//! Analysis configuration, stored as YAML.

use crate::annotate::AnnotationOptions;
use crate::cluster::PatternConfig;
use crate::data::{ModelSpec, TestMode};
use crate::enrich::{GseaConfig, OraConfig, RankMetric};
use crate::error::{FameError, Result};
use crate::filter::DEFAULT_MIN_MEAN_COUNT;
use crate::model::{DispersionMode, FitOptions, DEFAULT_ALPHA};
use crate::normalize::SizeFactorMethod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Which enrichment analyses to run per predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentMode {
    #[default]
    Ora,
    Gsea,
    Both,
}

impl EnrichmentMode {
    pub fn runs_ora(self) -> bool {
        matches!(self, EnrichmentMode::Ora | EnrichmentMode::Both)
    }

    pub fn runs_gsea(self) -> bool {
        matches!(self, EnrichmentMode::Gsea | EnrichmentMode::Both)
    }
}

/// Annotation table location and columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSettings {
    pub path: PathBuf,
    #[serde(flatten)]
    pub options: AnnotationOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    /// GMT or long TSV gene-set file. Enrichment is skipped when unset.
    pub gene_sets: Option<PathBuf>,
    pub mode: EnrichmentMode,
    pub ora: OraConfig,
    pub gsea: GseaConfig,
    pub rank_metric: RankMetric,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            gene_sets: None,
            mode: EnrichmentMode::default(),
            ora: OraConfig::default(),
            gsea: GseaConfig::default(),
            rank_metric: RankMetric::default(),
        }
    }
}

/// Trajectory clustering of one predictor's significant genes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringSettings {
    /// Ordered categorical column giving the trajectory axis.
    pub group_column: String,
    /// Model label whose significant genes are clustered; defaults to the first model.
    #[serde(default)]
    pub predictor: Option<String>,
    #[serde(flatten)]
    pub patterns: PatternConfig,
}

/// Everything a run needs besides the input tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub name: String,
    pub description: Option<String>,
    /// Genes with a lower across-sample mean count are dropped before fitting.
    pub min_mean_count: f64,
    pub size_factor_method: SizeFactorMethod,
    pub dispersion_mode: DispersionMode,
    /// Threshold on adjusted p-values.
    pub alpha: f64,
    /// Explicit level orders of categorical columns; the first level is the reference.
    pub level_orders: BTreeMap<String, Vec<String>>,
    pub models: Vec<ModelSpec>,
    pub annotation: Option<AnnotationSettings>,
    pub enrichment: EnrichmentSettings,
    pub clustering: Option<ClusteringSettings>,
    /// Batch column regressed out of the transformed matrix before clustering.
    pub batch_column: Option<String>,
    /// Write SVG figures next to the tables.
    pub figures: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            name: "fame".to_string(),
            description: None,
            min_mean_count: DEFAULT_MIN_MEAN_COUNT,
            size_factor_method: SizeFactorMethod::default(),
            dispersion_mode: DispersionMode::default(),
            alpha: DEFAULT_ALPHA,
            level_orders: BTreeMap::new(),
            models: Vec::new(),
            annotation: None,
            enrichment: EnrichmentSettings::default(),
            clustering: None,
            batch_column: None,
            figures: true,
        }
    }
}

impl AnalysisConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(FameError::from)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            size_factor_method: self.size_factor_method,
            dispersion_mode: self.dispersion_mode,
            alpha: self.alpha,
        }
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(FameError::InvalidParameter(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if !(self.min_mean_count >= 0.0) {
            return Err(FameError::InvalidParameter(
                "min_mean_count must be non-negative".to_string(),
            ));
        }
        let mut labels: Vec<&str> = self.models.iter().map(ModelSpec::label).collect();
        labels.sort_unstable();
        if let Some(w) = labels.windows(2).find(|w| w[0] == w[1]) {
            return Err(FameError::DuplicateId(w[0].to_string()));
        }
        if let Some(c) = &self.clustering {
            if let Some(p) = &c.predictor {
                if !labels.contains(&p.as_str()) {
                    return Err(FameError::InvalidParameter(format!(
                        "clustering predictor '{}' is not a configured model",
                        p
                    )));
                }
            }
        }
        Ok(())
    }

    /// Template covering the study's standard models.
    pub fn example() -> Self {
        let age_order = vec!["young".to_string(), "mid".to_string(), "old".to_string()];
        Self {
            name: "fame-muscle".to_string(),
            description: Some("Age, menopause and hormone effects on muscle transcriptome".to_string()),
            level_orders: BTreeMap::from([("age_group".to_string(), age_order)]),
            models: vec![
                ModelSpec::new("age_group")
                    .with_covariates(&["batch"])
                    .with_test(TestMode::Lrt),
                ModelSpec::new("menopause")
                    .with_covariates(&["batch"])
                    .with_contrast("post"),
                ModelSpec::new("estradiol")
                    .with_covariates(&["batch"])
                    .standardized(),
            ],
            annotation: Some(AnnotationSettings {
                path: PathBuf::from("annotation.tsv"),
                options: AnnotationOptions::default(),
            }),
            enrichment: EnrichmentSettings {
                gene_sets: Some(PathBuf::from("go_bp.gmt")),
                mode: EnrichmentMode::Both,
                ..EnrichmentSettings::default()
            },
            clustering: Some(ClusteringSettings {
                group_column: "age_group".to_string(),
                predictor: Some("age_group".to_string()),
                patterns: PatternConfig::default(),
            }),
            batch_column: Some("batch".to_string()),
            ..Self::default()
        }
    }
}
