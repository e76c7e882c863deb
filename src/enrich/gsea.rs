//! Preranked gene set enrichment analysis.
//!
//! Weighted Kolmogorov-Smirnov running sum over a ranked gene list
//! (Subramanian et al. 2005), with a gene-set permutation null: random sets
//! of the same size are drawn from the ranked list.

use crate::correct::adjust_bh;
use crate::data::ModelResultSet;
use crate::enrich::GeneSetCollection;
use crate::error::{FameError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Column contract of the GSEA table.
pub const GSEA_COLUMNS: [&str; 8] = [
    "term",
    "description",
    "set_size",
    "enrichment_score",
    "nes",
    "p_value",
    "p_adjusted",
    "leading_edge",
];

/// Statistic used to order genes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    #[default]
    Log2FoldChange,
    /// Wald z or LRT statistic.
    Statistic,
}

/// Genes sorted by decreasing score.
#[derive(Debug, Clone, Default)]
pub struct RankedGenes {
    genes: Vec<String>,
    scores: Vec<f64>,
}

impl RankedGenes {
    /// Sort `(gene, score)` pairs by decreasing score; non-finite scores are dropped.
    pub fn new(pairs: Vec<(String, f64)>) -> Self {
        let mut pairs: Vec<(String, f64)> =
            pairs.into_iter().filter(|(_, s)| s.is_finite()).collect();
        pairs.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let (genes, scores) = pairs.into_iter().unzip();
        Self { genes, scores }
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }
}

/// Rank all tested genes of a result set.
pub fn ranking_from_results(results: &ModelResultSet, metric: RankMetric) -> RankedGenes {
    RankedGenes::new(
        results
            .iter()
            .map(|r| {
                let score = match metric {
                    RankMetric::Log2FoldChange => r.log2_fold_change,
                    RankMetric::Statistic => r.statistic,
                };
                (r.gene_id.clone(), score)
            })
            .collect(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GseaConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub n_permutations: usize,
    /// Exponent on `|score|`; 1 is classic GSEA, 0 the unweighted KS statistic.
    pub weight: f64,
    pub seed: u64,
    pub p_adjusted_cutoff: f64,
}

impl Default for GseaConfig {
    fn default() -> Self {
        Self {
            min_size: 5,
            max_size: 2000,
            n_permutations: 1000,
            weight: 1.0,
            seed: 42,
            p_adjusted_cutoff: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GseaResult {
    pub term: String,
    pub description: Option<String>,
    /// Members present in the ranked list.
    pub set_size: usize,
    pub enrichment_score: f64,
    /// ES over the mean |ES| of same-sign permutations.
    pub nes: f64,
    pub p_value: f64,
    pub p_adjusted: f64,
    /// Members ranked before the running-sum peak (after it for negative ES).
    pub leading_edge: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GseaReport {
    pub results: Vec<GseaResult>,
    pub n_skipped: usize,
}

impl GseaReport {
    pub fn significant(&self, cutoff: f64) -> Vec<&GseaResult> {
        self.results.iter().filter(|r| r.p_adjusted < cutoff).collect()
    }

    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", GSEA_COLUMNS.join("\t"))?;
        for r in &self.results {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                r.term,
                r.description.as_deref().unwrap_or("NA"),
                r.set_size,
                r.enrichment_score,
                r.nes,
                r.p_value,
                r.p_adjusted,
                r.leading_edge.join("/"),
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Peak of a running sum: signed value and where it happened.
struct Peak {
    es: f64,
    /// Index into the sorted hit positions.
    hit: usize,
}

/// Enrichment score of the hits at sorted `positions` of a list of `n` genes.
fn running_sum_peak(weights: &[f64], positions: &[usize], n: usize) -> Peak {
    let n_hits = positions.len();
    let norm: f64 = positions.iter().map(|&p| weights[p]).sum();
    let miss = if n > n_hits {
        1.0 / (n - n_hits) as f64
    } else {
        0.0
    };

    let mut hit_sum = 0.0;
    let mut peak = Peak { es: 0.0, hit: 0 };
    for (i, &p) in positions.iter().enumerate() {
        let misses = (p - i) as f64 * miss;
        // Lowest point is just before a hit
        let before = hit_sum - misses;
        if -before > peak.es.abs() {
            peak = Peak { es: before, hit: i };
        }
        hit_sum += if norm > 0.0 {
            weights[p] / norm
        } else {
            1.0 / n_hits as f64
        };
        let after = hit_sum - misses;
        if after > peak.es.abs() {
            peak = Peak { es: after, hit: i };
        }
    }
    peak
}

/// GSEA on a preranked list.
///
/// Each set is tested with its own RNG seeded from `config.seed` and the
/// set's position in the collection, so results do not depend on the
/// number of threads.
pub fn gsea_preranked(
    ranking: &RankedGenes,
    collection: &GeneSetCollection,
    config: &GseaConfig,
) -> Result<GseaReport> {
    if ranking.is_empty() {
        return Err(FameError::EnrichmentUniverseEmpty(
            "ranked list is empty".to_string(),
        ));
    }
    if config.n_permutations == 0 {
        return Err(FameError::InvalidParameter(
            "n_permutations must be > 0".to_string(),
        ));
    }
    let n = ranking.len();
    let position: HashMap<&str, usize> = ranking
        .genes
        .iter()
        .enumerate()
        .map(|(i, g)| (g.as_str(), i))
        .collect();
    let weights: Vec<f64> = ranking
        .scores
        .iter()
        .map(|s| s.abs().powf(config.weight))
        .collect();

    let candidates: Vec<(usize, &crate::enrich::GeneSet, Vec<usize>)> = collection
        .iter()
        .enumerate()
        .map(|(idx, set)| {
            let mut hits: Vec<usize> = set
                .genes
                .iter()
                .filter_map(|g| position.get(g.as_str()).copied())
                .collect();
            hits.sort_unstable();
            hits.dedup();
            (idx, set, hits)
        })
        .collect();
    let total = candidates.len();
    let tested: Vec<_> = candidates
        .into_iter()
        .filter(|(_, _, hits)| {
            hits.len() >= config.min_size && hits.len() <= config.max_size && hits.len() < n
        })
        .collect();
    let n_skipped = total - tested.len();

    let mut results: Vec<GseaResult> = tested
        .par_iter()
        .map(|(idx, set, hits)| {
            let observed = running_sum_peak(&weights, hits, n);
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(*idx as u64));
            let null: Vec<f64> = (0..config.n_permutations)
                .map(|_| {
                    let mut perm = rand::seq::index::sample(&mut rng, n, hits.len()).into_vec();
                    perm.sort_unstable();
                    running_sum_peak(&weights, &perm, n).es
                })
                .collect();

            let es = observed.es;
            let same_sign: Vec<f64> = null
                .iter()
                .copied()
                .filter(|&x| if es >= 0.0 { x >= 0.0 } else { x < 0.0 })
                .collect();
            let extreme = same_sign.iter().filter(|x| x.abs() >= es.abs()).count();
            let p_value = (extreme as f64 + 1.0) / (same_sign.len() as f64 + 1.0);
            let mean_abs = if same_sign.is_empty() {
                0.0
            } else {
                same_sign.iter().map(|x| x.abs()).sum::<f64>() / same_sign.len() as f64
            };
            let nes = if mean_abs > 0.0 { es / mean_abs } else { 0.0 };

            let edge = if es >= 0.0 {
                &hits[..=observed.hit]
            } else {
                &hits[observed.hit..]
            };
            GseaResult {
                term: set.name.clone(),
                description: set.description.clone(),
                set_size: hits.len(),
                enrichment_score: es,
                nes,
                p_value,
                p_adjusted: f64::NAN,
                leading_edge: edge.iter().map(|&p| ranking.genes[p].clone()).collect(),
            }
        })
        .collect();

    let p: Vec<f64> = results.iter().map(|r| r.p_value).collect();
    for (r, q) in results.iter_mut().zip(adjust_bh(&p)) {
        r.p_adjusted = q;
    }
    results.sort_by(|a, b| a.p_value.total_cmp(&b.p_value).then_with(|| b.nes.abs().total_cmp(&a.nes.abs())));

    info!(
        genes = n,
        tested = results.len(),
        skipped = n_skipped,
        permutations = config.n_permutations,
        "preranked GSEA done"
    );
    Ok(GseaReport { results, n_skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::GeneSet;
    use approx::assert_relative_eq;

    fn ranking(n: usize) -> RankedGenes {
        RankedGenes::new((0..n).map(|i| (format!("g{}", i), (n - i) as f64 - n as f64 / 2.0)).collect())
    }

    fn names(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("g{}", i)).collect()
    }

    #[test]
    fn test_running_sum_all_hits_on_top() {
        let weights = vec![1.0; 10];
        let peak = running_sum_peak(&weights, &[0, 1, 2], 10);
        assert_relative_eq!(peak.es, 1.0, epsilon = 1e-12);
        assert_eq!(peak.hit, 2);
        let peak = running_sum_peak(&weights, &[7, 8, 9], 10);
        assert_relative_eq!(peak.es, -1.0, epsilon = 1e-12);
        assert_eq!(peak.hit, 0);
    }

    #[test]
    fn test_top_and_bottom_sets() {
        let r = ranking(200);
        let collection = GeneSetCollection::new(vec![
            GeneSet::new("top", names(0..15)),
            GeneSet::new("bottom", names(185..200)),
            GeneSet::new("spread", (0..15).map(|i| format!("g{}", i * 13)).collect()),
        ])
        .unwrap();
        let config = GseaConfig {
            n_permutations: 500,
            ..Default::default()
        };
        let report = gsea_preranked(&r, &collection, &config).unwrap();
        let get = |t: &str| report.results.iter().find(|x| x.term == t).unwrap();

        assert!(get("top").nes > 1.0);
        assert!(get("top").p_value < 0.01);
        assert!(get("bottom").nes < -1.0);
        assert!(get("bottom").p_value < 0.01);
        assert!(get("spread").p_value > 0.05);
        assert_eq!(get("top").leading_edge.len(), 15);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let r = ranking(100);
        let collection = GeneSetCollection::new(vec![GeneSet::new("s", names(10..30))]).unwrap();
        let config = GseaConfig {
            n_permutations: 200,
            ..Default::default()
        };
        let a = gsea_preranked(&r, &collection, &config).unwrap();
        let b = gsea_preranked(&r, &collection, &config).unwrap();
        assert_eq!(a.results[0].p_value, b.results[0].p_value);
        assert_eq!(a.results[0].nes, b.results[0].nes);
    }

    #[test]
    fn test_repeated_member_counted_once() {
        let r = ranking(100);
        let mut set = GeneSet::new("top", names(0..10));
        set.genes.push("g0".to_string());
        let collection = GeneSetCollection::new(vec![set]).unwrap();
        let config = GseaConfig {
            n_permutations: 100,
            ..Default::default()
        };
        let report = gsea_preranked(&r, &collection, &config).unwrap();
        assert_eq!(report.results[0].set_size, 10);
        assert_relative_eq!(report.results[0].enrichment_score, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ranking_drops_non_finite() {
        let r = RankedGenes::new(vec![
            ("a".into(), 1.0),
            ("b".into(), f64::NAN),
            ("c".into(), 3.0),
        ]);
        assert_eq!(r.genes(), ["c", "a"]);
    }

    #[test]
    fn test_size_limits_and_empty_ranking() {
        let r = ranking(50);
        let collection = GeneSetCollection::new(vec![GeneSet::new("small", names(0..3))]).unwrap();
        let report = gsea_preranked(&r, &collection, &GseaConfig::default()).unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.n_skipped, 1);
        assert!(gsea_preranked(&RankedGenes::default(), &collection, &GseaConfig::default()).is_err());
    }
}
