//! Runs one configured analysis from filtered counts to written tables.

use crate::annotate::{AnnotationReport, GeneAnnotator};
use crate::cluster::{cluster_patterns, PatternClusters};
use crate::data::{CountMatrix, ModelResultSet, ResultSummary, SampleMetadata, VariableType};
use crate::enrich::{
    gsea_preranked, ora, ranking_from_results, GeneSetCollection, GseaReport, OraReport,
};
use crate::error::{FameError, Result};
use crate::filter::{filter_mean_count, FilterReport};
use crate::model::{fit_predictors, PredictorOutcome};
use crate::normalize::{remove_batch_effect, size_factors, vst_blind, TransformedMatrix};
use crate::pipeline::config::{AnalysisConfig, ClusteringSettings};
use crate::report::{
    enrichment_dots, gsea_dots, trajectory_series, volcano_points, Layout, Panel, Renderer,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Terms shown per enrichment dot plot.
const DOT_PLOT_TERMS: usize = 20;

/// Enrichment of one predictor. Each analysis fails on its own.
#[derive(Debug)]
pub struct PredictorEnrichment {
    pub predictor: String,
    pub ora: Option<Result<OraReport>>,
    pub gsea: Option<Result<GseaReport>>,
}

/// Trajectory clustering of one predictor's significant genes.
#[derive(Debug)]
pub struct ClusteringOutcome {
    pub predictor: String,
    /// VST values, batch-corrected when a batch column is configured.
    pub transformed: TransformedMatrix,
    pub result: Result<PatternClusters>,
}

/// Everything produced by [`run_analysis`].
#[derive(Debug)]
pub struct AnalysisOutput {
    pub name: String,
    pub alpha: f64,
    pub filter: FilterReport,
    pub sample_ids: Vec<String>,
    pub size_factors: Vec<f64>,
    pub outcomes: Vec<PredictorOutcome>,
    pub annotation: Vec<(String, AnnotationReport)>,
    pub enrichment: Vec<PredictorEnrichment>,
    pub clustering: Option<ClusteringOutcome>,
    pub figures: bool,
}

/// Run one analysis.
///
/// Stages run in order: mean-count filter, size factors, one NB model per
/// configured predictor, annotation, enrichment and trajectory clustering.
/// A failing predictor, enrichment or clustering is recorded and the run
/// goes on; misaligned inputs and invalid configuration abort it.
///
/// # Arguments
/// * `counts` - Raw counts, genes × samples
/// * `metadata` - Phenotype rows in count column order
/// * `config` - Models and stage settings
/// * `annotator` - Symbol table, if annotation is wanted
/// * `collection` - Gene sets, if enrichment is wanted
pub fn run_analysis(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    config: &AnalysisConfig,
    annotator: Option<&GeneAnnotator>,
    collection: Option<&GeneSetCollection>,
) -> Result<AnalysisOutput> {
    config.validate()?;
    if config.models.is_empty() {
        return Err(FameError::Pipeline("no models configured".to_string()));
    }
    metadata.ensure_aligned(counts.sample_ids())?;
    let metadata = apply_level_orders(metadata, config)?;

    info!(
        name = %config.name,
        genes = counts.n_genes(),
        samples = counts.n_samples(),
        models = config.models.len(),
        "analysis started"
    );
    let (filtered, filter) = filter_mean_count(counts, config.min_mean_count)?;
    let sf = size_factors(&filtered, config.size_factor_method)?;

    let mut outcomes = fit_predictors(&filtered, &metadata, &config.models, &config.fit_options());

    let mut annotation = Vec::new();
    if let Some(annotator) = annotator {
        for outcome in &mut outcomes {
            let label = outcome.label().to_string();
            if let Ok(set) = outcome.result.as_mut() {
                annotation.push((label, annotator.annotate(set)));
            }
        }
    }

    let enrichment = match collection {
        Some(collection) => outcomes
            .iter()
            .filter_map(|o| o.ok().map(|set| (o.label(), set)))
            .map(|(label, set)| enrich_predictor(label, set, collection, config))
            .collect(),
        None => Vec::new(),
    };

    let clustering = match &config.clustering {
        Some(settings) => Some(cluster_predictor(
            &filtered, &metadata, &sf, &outcomes, settings, config,
        )?),
        None => None,
    };

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    info!(
        fitted = outcomes.len() - failed,
        failed,
        "analysis finished"
    );

    Ok(AnalysisOutput {
        name: config.name.clone(),
        alpha: config.alpha,
        filter,
        sample_ids: filtered.sample_ids().to_vec(),
        size_factors: sf,
        outcomes,
        annotation,
        enrichment,
        clustering,
        figures: config.figures,
    })
}

fn apply_level_orders(metadata: &SampleMetadata, config: &AnalysisConfig) -> Result<SampleMetadata> {
    let mut metadata = metadata.clone();
    for (column, order) in &config.level_orders {
        if metadata.column_type(column) != Some(VariableType::Categorical) {
            metadata = metadata.with_categorical(column)?;
        }
        metadata = metadata.with_level_order(column, order)?;
    }
    Ok(metadata)
}

fn enrich_predictor(
    label: &str,
    set: &ModelResultSet,
    collection: &GeneSetCollection,
    config: &AnalysisConfig,
) -> PredictorEnrichment {
    let settings = &config.enrichment;
    let ora_report = settings.mode.runs_ora().then(|| {
        let query = set.significant_ids(config.alpha);
        ora(&query, &set.tested_ids(), collection, &settings.ora)
    });
    let gsea_report = settings.mode.runs_gsea().then(|| {
        let ranking = ranking_from_results(set, settings.rank_metric);
        gsea_preranked(&ranking, collection, &settings.gsea)
    });
    for (kind, err) in [
        ("ora", ora_report.as_ref().and_then(|r| r.as_ref().err())),
        ("gsea", gsea_report.as_ref().and_then(|r| r.as_ref().err())),
    ] {
        if let Some(e) = err {
            warn!(predictor = label, analysis = kind, error = %e, "enrichment failed");
        }
    }
    PredictorEnrichment {
        predictor: label.to_string(),
        ora: ora_report,
        gsea: gsea_report,
    }
}

fn cluster_predictor(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    sf: &[f64],
    outcomes: &[PredictorOutcome],
    settings: &ClusteringSettings,
    config: &AnalysisConfig,
) -> Result<ClusteringOutcome> {
    let outcome = match &settings.predictor {
        Some(p) => outcomes.iter().find(|o| o.label() == p),
        None => outcomes.first(),
    }
    .ok_or_else(|| FameError::Pipeline("no model to cluster".to_string()))?;

    let mut transformed = vst_blind(counts, sf)?;
    if let Some(batch) = &config.batch_column {
        transformed = remove_batch_effect(&transformed, metadata, batch, &[settings.group_column.as_str()])?;
    }

    let result = match outcome.result.as_ref() {
        Ok(set) => {
            let genes = set.significant_ids(config.alpha);
            cluster_patterns(&transformed, metadata, &settings.group_column, &genes, &settings.patterns)
        }
        Err(e) => Err(FameError::Pipeline(format!(
            "model '{}' failed: {}",
            outcome.label(),
            e
        ))),
    };
    if let Err(e) = &result {
        warn!(predictor = outcome.label(), error = %e, "clustering failed");
    }
    Ok(ClusteringOutcome {
        predictor: outcome.label().to_string(),
        transformed,
        result,
    })
}

/// JSON record of one run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub name: String,
    pub filter: FilterReport,
    pub models: Vec<ModelSummary>,
    pub enrichment: Vec<EnrichmentSummary>,
    pub clustering: Option<ClusteringSummary>,
}

#[derive(Debug, Serialize)]
pub struct ModelSummary {
    pub predictor: String,
    pub summary: Option<ResultSummary>,
    pub annotation: Option<AnnotationReport>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnrichmentSummary {
    pub predictor: String,
    pub analysis: String,
    pub tested: usize,
    pub significant: usize,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClusteringSummary {
    pub predictor: String,
    pub k: Option<usize>,
    pub silhouette: Option<f64>,
    pub reported_clusters: usize,
    pub unassigned: usize,
    pub error: Option<String>,
}

impl AnalysisOutput {
    pub fn summary(&self, config: &AnalysisConfig) -> RunSummary {
        let models = self
            .outcomes
            .iter()
            .map(|o| ModelSummary {
                predictor: o.label().to_string(),
                summary: o.ok().map(|s| s.summary(self.alpha)),
                annotation: self
                    .annotation
                    .iter()
                    .find(|(p, _)| p == o.label())
                    .map(|(_, r)| *r),
                error: o.result.as_ref().err().map(|e| e.to_string()),
            })
            .collect();

        let mut enrichment = Vec::new();
        for e in &self.enrichment {
            if let Some(r) = &e.ora {
                enrichment.push(EnrichmentSummary {
                    predictor: e.predictor.clone(),
                    analysis: "ora".to_string(),
                    tested: r.as_ref().map_or(0, |r| r.results.len()),
                    significant: r
                        .as_ref()
                        .map_or(0, |r| r.significant(&config.enrichment.ora).len()),
                    error: r.as_ref().err().map(|e| e.to_string()),
                });
            }
            if let Some(r) = &e.gsea {
                let cutoff = config.enrichment.gsea.p_adjusted_cutoff;
                enrichment.push(EnrichmentSummary {
                    predictor: e.predictor.clone(),
                    analysis: "gsea".to_string(),
                    tested: r.as_ref().map_or(0, |r| r.results.len()),
                    significant: r.as_ref().map_or(0, |r| r.significant(cutoff).len()),
                    error: r.as_ref().err().map(|e| e.to_string()),
                });
            }
        }

        let clustering = self.clustering.as_ref().map(|c| {
            let ok = c.result.as_ref().ok();
            ClusteringSummary {
                predictor: c.predictor.clone(),
                k: ok.map(|p| p.k),
                silhouette: ok.map(|p| p.silhouette),
                reported_clusters: ok.map_or(0, |p| p.profiles.len()),
                unassigned: ok.map_or(0, |p| p.n_unassigned()),
                error: c.result.as_ref().err().map(|e| e.to_string()),
            }
        });

        RunSummary {
            name: self.name.clone(),
            filter: self.filter.clone(),
            models,
            enrichment,
            clustering,
        }
    }

    /// Write every table (and figures, if enabled) into `dir`.
    ///
    /// Returns the paths written, in order.
    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P, config: &AnalysisConfig) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        let path = dir.join("size_factors.tsv");
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "sample_id\tsize_factor")?;
        for (sid, s) in self.sample_ids.iter().zip(&self.size_factors) {
            writeln!(writer, "{}\t{:.6}", sid, s)?;
        }
        writer.flush()?;
        written.push(path);

        for outcome in &self.outcomes {
            let Some(set) = outcome.ok() else { continue };
            let stem = file_stem(outcome.label());
            let path = dir.join(format!("{}_results.tsv", stem));
            set.to_tsv(&path)?;
            written.push(path);
            if !set.skipped.is_empty() {
                let path = dir.join(format!("{}_skipped.tsv", stem));
                set.skipped_to_tsv(&path)?;
                written.push(path);
            }
        }

        for e in &self.enrichment {
            let stem = file_stem(&e.predictor);
            if let Some(Ok(report)) = &e.ora {
                let path = dir.join(format!("{}_ora.tsv", stem));
                report.to_tsv(&path)?;
                written.push(path);
            }
            if let Some(Ok(report)) = &e.gsea {
                let path = dir.join(format!("{}_gsea.tsv", stem));
                report.to_tsv(&path)?;
                written.push(path);
            }
        }

        if let Some(c) = &self.clustering {
            let path = dir.join("vst.tsv");
            c.transformed.to_tsv(&path)?;
            written.push(path);
            if let Ok(clusters) = &c.result {
                let path = dir.join("cluster_assignments.tsv");
                clusters.assignments_to_tsv(&path)?;
                written.push(path);
                let path = dir.join("cluster_profiles.tsv");
                clusters.profiles_to_tsv(&path)?;
                written.push(path);
                let path = dir.join("cluster_trajectories.tsv");
                clusters.trajectories_to_tsv(&path)?;
                written.push(path);
            }
        }

        let path = dir.join("summary.json");
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, &self.summary(config))?;
        written.push(path);

        if self.figures {
            written.extend(self.render_figures(dir, config)?);
        }
        info!(dir = %dir.display(), files = written.len(), "outputs written");
        Ok(written)
    }

    fn render_figures(&self, dir: &Path, config: &AnalysisConfig) -> Result<Vec<PathBuf>> {
        let renderer = Renderer::default();
        let mut written = Vec::new();

        for outcome in &self.outcomes {
            let Some(set) = outcome.ok() else { continue };
            let label = outcome.label();
            let mut panels = vec![Panel::Volcano {
                title: label.to_string(),
                points: volcano_points(set, self.alpha),
                alpha: self.alpha,
                lfc_threshold: 1.0,
            }];
            if let Some(e) = self.enrichment.iter().find(|e| e.predictor == label) {
                if let Some(Ok(report)) = &e.ora {
                    let significant = OraReport {
                        results: report
                            .significant(&config.enrichment.ora)
                            .into_iter()
                            .cloned()
                            .collect(),
                        n_skipped: report.n_skipped,
                    };
                    let dots = enrichment_dots(&significant, DOT_PLOT_TERMS);
                    if !dots.is_empty() {
                        panels.push(Panel::EnrichmentDots {
                            title: format!("{} ORA", label),
                            dots,
                        });
                    }
                }
                if let Some(Ok(report)) = &e.gsea {
                    let dots = gsea_dots(report, DOT_PLOT_TERMS);
                    if !dots.is_empty() {
                        panels.push(Panel::EnrichmentDots {
                            title: format!("{} GSEA", label),
                            dots,
                        });
                    }
                }
            }
            let path = dir.join(format!("{}_figure.svg", file_stem(label)));
            renderer.render_figure(Layout::for_panels(panels.len()), &panels, &path)?;
            written.push(path);
        }

        if let Some(Ok(clusters)) = self.clustering.as_ref().map(|c| &c.result) {
            let panels: Vec<Panel> = trajectory_series(clusters)
                .into_iter()
                .map(|series| Panel::Trajectories { series })
                .collect();
            if !panels.is_empty() {
                let path = dir.join("clusters.svg");
                renderer.render_figure(Layout::for_panels(panels.len()), &panels, &path)?;
                written.push(path);
            }
        }
        Ok(written)
    }
}

/// Predictor label made safe for a file name.
fn file_stem(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
