//! Over-representation analysis with the hypergeometric test.

use crate::correct::{adjust_bh, qvalues};
use crate::correct::qvalue::DEFAULT_LAMBDA;
use crate::enrich::GeneSetCollection;
use crate::error::{FameError, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{DiscreteCDF, Hypergeometric};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Column contract of the ORA table.
pub const ORA_COLUMNS: [&str; 13] = [
    "term",
    "description",
    "overlap",
    "set_size",
    "query_size",
    "universe_size",
    "gene_ratio",
    "background_ratio",
    "fold_enrichment",
    "p_value",
    "p_adjusted",
    "q_value",
    "genes",
];

/// ORA limits and report cutoffs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OraConfig {
    /// Sets with fewer members in the universe are not tested.
    pub min_size: usize,
    /// Sets with more members in the universe are not tested.
    pub max_size: usize,
    pub p_adjusted_cutoff: f64,
    pub q_value_cutoff: f64,
}

impl Default for OraConfig {
    fn default() -> Self {
        Self {
            min_size: 5,
            max_size: 800,
            p_adjusted_cutoff: 0.05,
            q_value_cutoff: 0.2,
        }
    }
}

/// One tested gene set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OraResult {
    pub term: String,
    pub description: Option<String>,
    /// Query genes in the set (k).
    pub overlap: usize,
    /// Set members in the universe (K).
    pub set_size: usize,
    /// Query genes in the universe (n).
    pub query_size: usize,
    /// Universe size (N).
    pub universe_size: usize,
    pub p_value: f64,
    pub p_adjusted: f64,
    pub q_value: f64,
    /// Overlapping gene ids.
    pub genes: Vec<String>,
}

impl OraResult {
    /// `k / n`
    pub fn gene_ratio(&self) -> f64 {
        ratio(self.overlap, self.query_size)
    }

    /// `K / N`
    pub fn background_ratio(&self) -> f64 {
        ratio(self.set_size, self.universe_size)
    }

    pub fn fold_enrichment(&self) -> f64 {
        self.gene_ratio() / self.background_ratio()
    }

    pub fn passes(&self, config: &OraConfig) -> bool {
        self.p_adjusted < config.p_adjusted_cutoff && self.q_value < config.q_value_cutoff
    }
}

fn ratio(a: usize, b: usize) -> f64 {
    if b == 0 {
        f64::NAN
    } else {
        a as f64 / b as f64
    }
}

/// All tested sets of one ORA call, sorted by p-value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OraReport {
    pub results: Vec<OraResult>,
    /// Sets outside the size limits.
    pub n_skipped: usize,
}

impl OraReport {
    /// Rows passing the report cutoffs.
    pub fn significant(&self, config: &OraConfig) -> Vec<&OraResult> {
        self.results.iter().filter(|r| r.passes(config)).collect()
    }

    /// Write every tested set with the [`ORA_COLUMNS`] contract.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", ORA_COLUMNS.join("\t"))?;
        for r in &self.results {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                r.term,
                r.description.as_deref().unwrap_or("NA"),
                r.overlap,
                r.set_size,
                r.query_size,
                r.universe_size,
                r.gene_ratio(),
                r.background_ratio(),
                r.fold_enrichment(),
                r.p_value,
                r.p_adjusted,
                r.q_value,
                r.genes.join("/"),
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Hypergeometric upper tail `P(X >= k)`, `X ~ Hypergeometric(N, K, n)`.
pub fn hypergeometric_upper_tail(k: u64, universe: u64, set_size: u64, query: u64) -> Result<f64> {
    if k == 0 {
        return Ok(1.0);
    }
    let hyper = Hypergeometric::new(universe, set_size, query)
        .map_err(|e| FameError::Numerical(format!("hypergeometric({}, {}, {}): {}", universe, set_size, query, e)))?;
    // sf(k - 1) = P(X > k - 1) = P(X >= k)
    Ok(hyper.sf(k - 1))
}

/// Test every set of `collection` for over-representation of `query`
/// against `universe`.
///
/// Genes outside the universe are ignored on both sides.
///
/// # Errors
/// `EnrichmentUniverseEmpty` when the universe or `query ∩ universe` is empty.
pub fn ora(
    query: &[String],
    universe: &[String],
    collection: &GeneSetCollection,
    config: &OraConfig,
) -> Result<OraReport> {
    let universe: HashSet<&str> = universe.iter().map(String::as_str).collect();
    if universe.is_empty() {
        return Err(FameError::EnrichmentUniverseEmpty(
            "no tested genes".to_string(),
        ));
    }
    let query: HashSet<&str> = query
        .iter()
        .map(String::as_str)
        .filter(|g| universe.contains(g))
        .collect();
    if query.is_empty() {
        return Err(FameError::EnrichmentUniverseEmpty(
            "no query gene in the universe".to_string(),
        ));
    }
    let big_n = universe.len();
    let n = query.len();

    let mut results = Vec::new();
    let mut n_skipped = 0;
    for set in collection.iter() {
        let members = set.restricted_to(&universe);
        let big_k = members.len();
        if big_k < config.min_size || big_k > config.max_size {
            debug!(term = %set.name, size = big_k, "gene set outside size limits");
            n_skipped += 1;
            continue;
        }
        let genes: Vec<String> = members
            .iter()
            .filter(|g| query.contains(*g))
            .map(|g| g.to_string())
            .collect();
        let k = genes.len();
        let p_value = hypergeometric_upper_tail(k as u64, big_n as u64, big_k as u64, n as u64)?;
        results.push(OraResult {
            term: set.name.clone(),
            description: set.description.clone(),
            overlap: k,
            set_size: big_k,
            query_size: n,
            universe_size: big_n,
            p_value,
            p_adjusted: f64::NAN,
            q_value: f64::NAN,
            genes,
        });
    }

    let p: Vec<f64> = results.iter().map(|r| r.p_value).collect();
    for ((r, padj), q) in results
        .iter_mut()
        .zip(adjust_bh(&p))
        .zip(qvalues(&p, DEFAULT_LAMBDA))
    {
        r.p_adjusted = padj;
        r.q_value = q;
    }
    results.sort_by(|a, b| a.p_value.total_cmp(&b.p_value));

    let report = OraReport { results, n_skipped };
    info!(
        query = n,
        universe = big_n,
        tested = report.results.len(),
        skipped = n_skipped,
        significant = report.significant(config).len(),
        "over-representation analysis done"
    );
    Ok(report)
}
