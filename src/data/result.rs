//! Result types for differential expression analysis.

use crate::data::TestMode;
use crate::error::{FameError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Column contract of a differential expression table.
pub const RESULT_COLUMNS: [&str; 9] = [
    "gene_id",
    "symbol",
    "base_mean",
    "log2_fold_change",
    "lfc_se",
    "statistic",
    "p_value",
    "p_adjusted",
    "dispersion",
];

/// Direction of a gene at a significance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    NotSignificant,
}

impl Direction {
    /// Get the descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::NotSignificant => "not_significant",
        }
    }
}

/// Result for a single gene and predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResult {
    pub gene_id: String,
    /// Label of the model (predictor) that produced the row.
    pub predictor: String,
    /// Name of the tested design column (or the predictor for LRT).
    pub coefficient: String,
    /// Mean of size-factor normalized counts.
    pub base_mean: f64,
    /// Effect size on the log2 scale: per unit of a continuous predictor,
    /// or contrast level against the reference level.
    pub log2_fold_change: f64,
    pub lfc_se: f64,
    /// Wald z or LRT chi-square statistic.
    pub statistic: f64,
    pub p_value: f64,
    /// Benjamini-Hochberg adjusted p-value.
    pub p_adjusted: f64,
    /// Filled by the gene annotator.
    pub symbol: Option<String>,
    pub dispersion: f64,
}

impl ModelResult {
    /// Check if significant at `alpha` on the adjusted p-value.
    pub fn is_significant_at(&self, alpha: f64) -> bool {
        self.p_adjusted < alpha
    }

    /// Direction at `alpha`.
    pub fn direction(&self, alpha: f64) -> Direction {
        if !self.is_significant_at(alpha) {
            Direction::NotSignificant
        } else if self.log2_fold_change > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    /// Symbol when annotated, otherwise the gene id.
    pub fn label(&self) -> &str {
        self.symbol.as_deref().unwrap_or(&self.gene_id)
    }
}

/// A gene that was not tested, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedGene {
    pub gene_id: String,
    pub reason: String,
}

/// All results for one predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResultSet {
    /// Model label.
    pub predictor: String,
    pub test: TestMode,
    pub results: Vec<ModelResult>,
    pub skipped: Vec<SkippedGene>,
    /// Samples dropped because a model variable was missing.
    pub dropped_samples: usize,
}

impl ModelResultSet {
    /// Create a new result set.
    pub fn new(predictor: String, test: TestMode, results: Vec<ModelResult>) -> Self {
        Self {
            predictor,
            test,
            results,
            skipped: Vec::new(),
            dropped_samples: 0,
        }
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterate over results.
    pub fn iter(&self) -> impl Iterator<Item = &ModelResult> {
        self.results.iter()
    }

    /// Find the result for a gene.
    pub fn get(&self, gene_id: &str) -> Option<&ModelResult> {
        self.results.iter().find(|r| r.gene_id == gene_id)
    }

    /// Get results sorted by p-value (ascending, NaN last).
    pub fn sorted_by_pvalue(&self) -> Vec<&ModelResult> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| a.p_value.total_cmp(&b.p_value));
        sorted
    }

    /// Significant results at `alpha`.
    pub fn significant_at(&self, alpha: f64) -> Vec<&ModelResult> {
        self.results
            .iter()
            .filter(|r| r.is_significant_at(alpha))
            .collect()
    }

    /// Gene ids significant at `alpha`, the ORA query.
    pub fn significant_ids(&self, alpha: f64) -> Vec<String> {
        self.significant_at(alpha)
            .into_iter()
            .map(|r| r.gene_id.clone())
            .collect()
    }

    /// Tested gene ids, the ORA universe.
    pub fn tested_ids(&self) -> Vec<String> {
        self.results.iter().map(|r| r.gene_id.clone()).collect()
    }

    /// Count tested, up, down and skipped genes.
    pub fn summary(&self, alpha: f64) -> ResultSummary {
        let count = |d: Direction| self.results.iter().filter(|r| r.direction(alpha) == d).count();
        ResultSummary {
            predictor: self.predictor.clone(),
            alpha,
            tested: self.len(),
            up: count(Direction::Up),
            down: count(Direction::Down),
            skipped: self.skipped.len(),
            dropped_samples: self.dropped_samples,
        }
    }

    /// Write results to a TSV file with the fixed column contract.
    ///
    /// Missing symbols and non-finite numbers are written as `NA`.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "{}", RESULT_COLUMNS.join("\t"))?;
        for r in &self.results {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                r.gene_id,
                r.symbol.as_deref().unwrap_or("NA"),
                fmt_num(r.base_mean),
                fmt_num(r.log2_fold_change),
                fmt_num(r.lfc_se),
                fmt_num(r.statistic),
                fmt_num(r.p_value),
                fmt_num(r.p_adjusted),
                fmt_num(r.dispersion),
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the skipped genes as `gene_id<TAB>reason`.
    pub fn skipped_to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
        writer.write_record(["gene_id", "reason"])?;
        for s in &self.skipped {
            writer.write_record([s.gene_id.as_str(), s.reason.as_str()])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a table written by [`to_tsv`](Self::to_tsv).
    pub fn from_tsv<P: AsRef<Path>>(path: P, predictor: &str, test: TestMode) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        let headers = reader.headers()?.clone();
        let index = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| FameError::MissingColumn(name.to_string()))
        };
        let idx: Vec<usize> = RESULT_COLUMNS
            .iter()
            .map(|&c| index(c))
            .collect::<Result<_>>()?;

        let mut results = Vec::new();
        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(idx[i]).unwrap_or("NA");
            let symbol = match field(1) {
                "" | "NA" => None,
                s => Some(s.to_string()),
            };
            results.push(ModelResult {
                gene_id: field(0).to_string(),
                predictor: predictor.to_string(),
                coefficient: predictor.to_string(),
                base_mean: parse_num(field(2)),
                log2_fold_change: parse_num(field(3)),
                lfc_se: parse_num(field(4)),
                statistic: parse_num(field(5)),
                p_value: parse_num(field(6)),
                p_adjusted: parse_num(field(7)),
                symbol,
                dispersion: parse_num(field(8)),
            });
        }
        Ok(Self::new(predictor.to_string(), test, results))
    }
}

fn fmt_num(v: f64) -> String {
    if v.is_finite() {
        format!("{}", v)
    } else {
        "NA".to_string()
    }
}

fn parse_num(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(f64::NAN)
}

/// Counts for one predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub predictor: String,
    pub alpha: f64,
    pub tested: usize,
    pub up: usize,
    pub down: usize,
    pub skipped: usize,
    pub dropped_samples: usize,
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Predictor: {}", self.predictor)?;
        writeln!(f, "Genes tested:  {}", self.tested)?;
        writeln!(f, "Up at {}:   {}", self.alpha, self.up)?;
        writeln!(f, "Down at {}: {}", self.alpha, self.down)?;
        writeln!(f, "Genes skipped: {}", self.skipped)?;
        writeln!(f, "Samples dropped (missing values): {}", self.dropped_samples)?;
        Ok(())
    }
}
