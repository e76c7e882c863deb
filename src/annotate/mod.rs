//! Gene identifier to symbol mapping.
//!
//! The mapping is read from a tab-separated file with a header row. When a
//! gene id maps to several symbols the first row wins.

use crate::data::ModelResultSet;
use crate::error::{FameError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Columns and id normalization used when loading an annotation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationOptions {
    pub id_column: String,
    pub symbol_column: String,
    /// Strip Ensembl version suffixes (`ENSG00000141510.16` -> `ENSG00000141510`).
    pub strip_version: bool,
}

impl Default for AnnotationOptions {
    fn default() -> Self {
        Self {
            id_column: "gene_id".to_string(),
            symbol_column: "symbol".to_string(),
            strip_version: true,
        }
    }
}

/// Resolved and unresolved counts of one annotation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationReport {
    pub resolved: usize,
    pub unresolved: usize,
}

/// In-memory gene id to symbol table.
#[derive(Debug, Clone)]
pub struct GeneAnnotator {
    symbols: HashMap<String, String>,
    version: Option<Regex>,
}

impl GeneAnnotator {
    /// Build from `(gene_id, symbol)` pairs; the first pair for an id wins.
    pub fn from_pairs<I, S>(pairs: I, strip_version: bool) -> Result<Self>
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let version = if strip_version {
            Some(version_pattern()?)
        } else {
            None
        };
        let mut annotator = Self {
            symbols: HashMap::new(),
            version,
        };
        for (id, symbol) in pairs {
            let symbol: String = symbol.into();
            if symbol.is_empty() || symbol == "NA" {
                continue;
            }
            let id: String = id.into();
            let key = annotator.normalize(&id).into_owned();
            annotator.symbols.entry(key).or_insert(symbol);
        }
        Ok(annotator)
    }

    /// Load an annotation table.
    ///
    /// # Errors
    /// `MissingColumn` if the id or symbol column is absent from the header.
    pub fn from_tsv<P: AsRef<Path>>(path: P, options: &AnnotationOptions) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path)?;
        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| FameError::MissingColumn(name.to_string()))
        };
        let id_idx = column(&options.id_column)?;
        let symbol_idx = column(&options.symbol_column)?;

        let mut pairs = Vec::new();
        for record in reader.records() {
            let record = record?;
            if let (Some(id), Some(symbol)) = (record.get(id_idx), record.get(symbol_idx)) {
                pairs.push((id.trim().to_string(), symbol.trim().to_string()));
            }
        }
        let annotator = Self::from_pairs(pairs, options.strip_version)?;
        info!(path = %path.display(), genes = annotator.len(), "annotation loaded");
        Ok(annotator)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn normalize<'a>(&self, id: &'a str) -> std::borrow::Cow<'a, str> {
        match &self.version {
            Some(re) => re.replace(id, "$1"),
            None => std::borrow::Cow::Borrowed(id),
        }
    }

    /// Symbol of a gene id.
    pub fn lookup(&self, gene_id: &str) -> Result<&str> {
        self.symbols
            .get(self.normalize(gene_id).as_ref())
            .map(String::as_str)
            .ok_or_else(|| FameError::AnnotationLookupFailure(gene_id.to_string()))
    }

    /// Fill `symbol` on every result row. Unresolved rows are kept with no symbol.
    pub fn annotate(&self, results: &mut ModelResultSet) -> AnnotationReport {
        let mut report = AnnotationReport::default();
        for r in results.results.iter_mut() {
            match self.lookup(&r.gene_id) {
                Ok(symbol) => {
                    r.symbol = Some(symbol.to_string());
                    report.resolved += 1;
                }
                Err(e) => {
                    debug!(error = %e, "unresolved gene");
                    r.symbol = None;
                    report.unresolved += 1;
                }
            }
        }
        info!(
            predictor = %results.predictor,
            resolved = report.resolved,
            unresolved = report.unresolved,
            "results annotated"
        );
        report
    }
}

fn version_pattern() -> Result<Regex> {
    Regex::new(r"^(ENS[A-Z]*G\d+)\.\d+$")
        .map_err(|e| FameError::InvalidParameter(format!("version pattern: {}", e)))
}
