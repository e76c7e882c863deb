//! Tables produced by external motif / transcription factor enrichment tools.

use crate::error::{FameError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One row of an external enrichment table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEnrichment {
    pub term: String,
    /// Tool-specific score; `NaN` when missing.
    pub score: f64,
    pub regulator: Option<String>,
}

/// Read a tab-separated table with `term`, `score` and `regulator` columns.
///
/// Other columns are ignored. Rows keep file order.
pub fn read_external_enrichment<P: AsRef<Path>>(path: P) -> Result<Vec<ExternalEnrichment>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| FameError::MissingColumn(name.to_string()))
    };
    let term_idx = column("term")?;
    let score_idx = column("score")?;
    let regulator_idx = column("regulator")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let term = record.get(term_idx).unwrap_or("").trim();
        if term.is_empty() {
            continue;
        }
        let score = record
            .get(score_idx)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(f64::NAN);
        let regulator = record
            .get(regulator_idx)
            .map(str::trim)
            .filter(|r| !r.is_empty() && *r != "NA")
            .map(String::from);
        rows.push(ExternalEnrichment {
            term: term.to_string(),
            score,
            regulator,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_table() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "term\tscore\tregulator\tsource").unwrap();
        writeln!(file, "MA0112.3\t4.2\tESR1\tJASPAR").unwrap();
        writeln!(file, "MA0079.5\tNA\tNA\tJASPAR").unwrap();
        file.flush().unwrap();

        let rows = read_external_enrichment(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].regulator.as_deref(), Some("ESR1"));
        assert_eq!(rows[0].score, 4.2);
        assert!(rows[1].score.is_nan());
        assert_eq!(rows[1].regulator, None);
    }

    #[test]
    fn test_missing_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "term\tscore").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            read_external_enrichment(file.path()),
            Err(FameError::MissingColumn(c)) if c == "regulator"
        ));
    }
}
