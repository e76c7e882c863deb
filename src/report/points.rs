//! Plot-ready records derived from result tables.

use crate::cluster::PatternClusters;
use crate::data::{Direction, ModelResultSet};
use crate::enrich::{GseaReport, OraReport};
use serde::{Deserialize, Serialize};

/// One gene of a volcano plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolcanoPoint {
    pub gene_id: String,
    /// Symbol if annotated, else the gene id.
    pub label: String,
    pub log2_fold_change: f64,
    /// `-log10(p_adjusted)`
    pub neg_log10_padj: f64,
    pub direction: Direction,
}

/// Volcano records of every gene with a finite effect and adjusted p-value.
///
/// Adjusted p-values of 0 are drawn at the smallest positive `f64`.
pub fn volcano_points(results: &ModelResultSet, alpha: f64) -> Vec<VolcanoPoint> {
    results
        .iter()
        .filter(|r| r.log2_fold_change.is_finite() && r.p_adjusted.is_finite())
        .map(|r| VolcanoPoint {
            gene_id: r.gene_id.clone(),
            label: r.label().to_string(),
            log2_fold_change: r.log2_fold_change,
            neg_log10_padj: -r.p_adjusted.max(f64::MIN_POSITIVE).log10(),
            direction: r.direction(alpha),
        })
        .collect()
}

/// One term of an enrichment dot plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentDot {
    pub term: String,
    /// Overlap over query size (ORA) or leading-edge fraction (GSEA).
    pub gene_ratio: f64,
    pub count: usize,
    pub p_adjusted: f64,
}

/// Top `top_n` ORA terms by p-value, most significant first.
pub fn enrichment_dots(report: &OraReport, top_n: usize) -> Vec<EnrichmentDot> {
    report
        .results
        .iter()
        .take(top_n)
        .map(|r| EnrichmentDot {
            term: display_term(&r.term, r.description.as_deref()),
            gene_ratio: r.gene_ratio(),
            count: r.overlap,
            p_adjusted: r.p_adjusted,
        })
        .collect()
}

/// Top `top_n` GSEA terms as dots; the ratio is the leading-edge fraction.
pub fn gsea_dots(report: &GseaReport, top_n: usize) -> Vec<EnrichmentDot> {
    report
        .results
        .iter()
        .take(top_n)
        .map(|r| EnrichmentDot {
            term: display_term(&r.term, r.description.as_deref()),
            gene_ratio: r.leading_edge.len() as f64 / r.set_size.max(1) as f64,
            count: r.leading_edge.len(),
            p_adjusted: r.p_adjusted,
        })
        .collect()
}

fn display_term(term: &str, description: Option<&str>) -> String {
    match description {
        Some(d) => d.to_string(),
        None => term.to_string(),
    }
}

/// Gene trajectories and mean of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySeries {
    pub cluster: usize,
    pub groups: Vec<String>,
    pub mean: Vec<f64>,
    pub genes: Vec<Vec<f64>>,
}

impl TrajectorySeries {
    pub fn title(&self) -> String {
        format!("Cluster {} ({} genes)", self.cluster, self.genes.len())
    }
}

/// One series per reported cluster, in cluster order.
pub fn trajectory_series(clusters: &PatternClusters) -> Vec<TrajectorySeries> {
    clusters
        .profiles
        .iter()
        .map(|p| {
            let genes = clusters
                .trajectories
                .iter()
                .zip(&clusters.assignments)
                .filter(|(_, a)| a.cluster == Some(p.cluster))
                .map(|(t, _)| t.values.clone())
                .collect();
            TrajectorySeries {
                cluster: p.cluster,
                groups: clusters.groups.clone(),
                mean: p.mean.clone(),
                genes,
            }
        })
        .collect()
}
