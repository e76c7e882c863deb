//! Gene set collections (GO terms, pathways) loaded from GMT or long TSV.

use crate::error::{FameError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

/// A named set of gene identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSet {
    pub name: String,
    pub description: Option<String>,
    /// Unique gene ids, in first-seen order.
    pub genes: Vec<String>,
}

impl GeneSet {
    pub fn new(name: &str, genes: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let genes = genes.into_iter().filter(|g| seen.insert(g.clone())).collect();
        Self {
            name: name.to_string(),
            description: None,
            genes,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Distinct members that are also in `universe`, in set order.
    pub fn restricted_to<'a>(&'a self, universe: &HashSet<&str>) -> Vec<&'a str> {
        let mut seen = HashSet::new();
        self.genes
            .iter()
            .map(String::as_str)
            .filter(|g| universe.contains(g) && seen.insert(*g))
            .collect()
    }
}

/// Ordered collection of gene sets with unique names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneSetCollection {
    sets: Vec<GeneSet>,
}

impl GeneSetCollection {
    /// Build a collection; set names must be unique.
    pub fn new(sets: Vec<GeneSet>) -> Result<Self> {
        let mut names = HashSet::new();
        for s in &sets {
            if !names.insert(s.name.as_str()) {
                return Err(FameError::DuplicateId(s.name.clone()));
            }
        }
        Ok(Self { sets })
    }

    /// Load by extension: `.gmt` as GMT, anything else as long TSV.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let is_gmt = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("gmt"))
            .unwrap_or(false);
        let collection = if is_gmt {
            Self::from_gmt(path)?
        } else {
            Self::from_tsv(path)?
        };
        info!(path = %path.display(), sets = collection.len(), "gene sets loaded");
        Ok(collection)
    }

    /// Read GMT: `name<TAB>description<TAB>gene1<TAB>gene2...`, one set per line.
    pub fn from_gmt<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_gmt(&content)
    }

    fn parse_gmt(content: &str) -> Result<Self> {
        let mut sets = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = trimmed.split('\t').collect();
            if parts.len() < 3 {
                return Err(FameError::InvalidParameter(format!(
                    "GMT line {}: expected name, description and at least one gene",
                    idx + 1
                )));
            }
            let genes = parts[2..]
                .iter()
                .map(|g| g.trim())
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect();
            let mut set = GeneSet::new(parts[0].trim(), genes);
            let description = parts[1].trim();
            if !description.is_empty() && description != "NA" {
                set = set.with_description(description);
            }
            sets.push(set);
        }
        Self::new(sets)
    }

    /// Read a long table with a header: `term<TAB>gene_id[<TAB>description]`.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .flexible(true)
            .from_path(path)?;
        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h.trim() == name);
        let term_idx = column("term").ok_or_else(|| FameError::MissingColumn("term".into()))?;
        let gene_idx =
            column("gene_id").ok_or_else(|| FameError::MissingColumn("gene_id".into()))?;
        let desc_idx = column("description");

        let mut order: Vec<String> = Vec::new();
        let mut members: HashMap<String, (Vec<String>, Option<String>)> = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let (Some(term), Some(gene)) = (record.get(term_idx), record.get(gene_idx)) else {
                continue;
            };
            let (term, gene) = (term.trim(), gene.trim());
            if term.is_empty() || gene.is_empty() {
                continue;
            }
            let entry = members.entry(term.to_string()).or_insert_with(|| {
                order.push(term.to_string());
                (Vec::new(), None)
            });
            entry.0.push(gene.to_string());
            if entry.1.is_none() {
                entry.1 = desc_idx
                    .and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(String::from);
            }
        }

        let sets = order
            .into_iter()
            .filter_map(|term| {
                let (genes, description) = members.remove(&term)?;
                let mut set = GeneSet::new(&term, genes);
                set.description = description;
                Some(set)
            })
            .collect();
        Self::new(sets)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneSet> {
        self.sets.iter()
    }

    pub fn get(&self, name: &str) -> Option<&GeneSet> {
        self.sets.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_gmt() {
        let mut file = Builder::new().suffix(".gmt").tempfile().unwrap();
        writeln!(file, "GO:0006954\tinflammatory response\tIL6\tTNF\tIL1B\tTNF").unwrap();
        writeln!(file, "GO:0007165\tNA\tESR1\tPGR").unwrap();
        file.flush().unwrap();

        let c = GeneSetCollection::from_path(file.path()).unwrap();
        assert_eq!(c.len(), 2);
        let inflam = c.get("GO:0006954").unwrap();
        assert_eq!(inflam.genes, vec!["IL6", "TNF", "IL1B"]);
        assert_eq!(inflam.description.as_deref(), Some("inflammatory response"));
        assert_eq!(c.get("GO:0007165").unwrap().description, None);
    }

    #[test]
    fn test_gmt_malformed_line() {
        assert!(GeneSetCollection::parse_gmt("only_name\tdesc\n").is_err());
    }

    #[test]
    fn test_long_tsv_keeps_term_order() {
        let mut file = Builder::new().suffix(".tsv").tempfile().unwrap();
        writeln!(file, "term\tgene_id\tdescription").unwrap();
        writeln!(file, "hsa04915\tESR1\tEstrogen signaling").unwrap();
        writeln!(file, "hsa04060\tIL6\t").unwrap();
        writeln!(file, "hsa04915\tPGR\tEstrogen signaling").unwrap();
        file.flush().unwrap();

        let c = GeneSetCollection::from_path(file.path()).unwrap();
        let names: Vec<&str> = c.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["hsa04915", "hsa04060"]);
        assert_eq!(c.get("hsa04915").unwrap().genes, vec!["ESR1", "PGR"]);
        assert_eq!(c.get("hsa04060").unwrap().description, None);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let sets = vec![
            GeneSet::new("a", vec!["x".into()]),
            GeneSet::new("a", vec!["y".into()]),
        ];
        assert!(matches!(
            GeneSetCollection::new(sets),
            Err(FameError::DuplicateId(_))
        ));
    }
}
