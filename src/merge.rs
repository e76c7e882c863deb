//! Combining cohorts (count matrices plus phenotype tables) into one dataset.

use crate::data::{CountMatrix, SampleMetadata, Variable, VariableType};
use crate::error::{FameError, Result};
use sprs::TriMat;
use std::collections::{HashMap, HashSet};
use tracing::info;

/// One sequencing cohort.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub name: String,
    pub counts: CountMatrix,
    pub metadata: SampleMetadata,
}

impl Cohort {
    pub fn new(name: &str, counts: CountMatrix, metadata: SampleMetadata) -> Self {
        Self {
            name: name.to_string(),
            counts,
            metadata,
        }
    }
}

/// Merged counts with phenotype rows aligned to the count columns.
#[derive(Debug, Clone)]
pub struct MergedCohort {
    pub counts: CountMatrix,
    pub metadata: SampleMetadata,
}

/// Full outer join of cohorts on gene identifier.
///
/// Genes appear in first-seen order; a gene absent from a cohort has count
/// 0 in that cohort's samples. Phenotype tables are concatenated on the
/// union of their columns (absent columns are missing). A column that is
/// continuous in one cohort and categorical in another becomes categorical.
/// When `batch_column` is set, a categorical column holding the cohort name
/// is added.
///
/// # Errors
/// `SchemaMismatch` if a sample id occurs in two cohorts or a count column
/// has no phenotype row.
pub fn merge_cohorts(cohorts: &[Cohort], batch_column: Option<&str>) -> Result<MergedCohort> {
    if cohorts.is_empty() {
        return Err(FameError::EmptyData("no cohorts to merge".to_string()));
    }

    let mut aligned = Vec::with_capacity(cohorts.len());
    for cohort in cohorts {
        let meta = cohort
            .metadata
            .align_to(cohort.counts.sample_ids())
            .map_err(|e| FameError::SchemaMismatch(format!("cohort '{}': {}", cohort.name, e)))?;
        aligned.push(meta);
    }

    // Union of genes in first-seen order
    let mut gene_index: HashMap<String, usize> = HashMap::new();
    let mut gene_ids: Vec<String> = Vec::new();
    for cohort in cohorts {
        for g in cohort.counts.gene_ids() {
            if !gene_index.contains_key(g) {
                gene_index.insert(g.clone(), gene_ids.len());
                gene_ids.push(g.clone());
            }
        }
    }

    let mut sample_ids: Vec<String> = Vec::new();
    let mut seen_samples = HashSet::new();
    for cohort in cohorts {
        for s in cohort.counts.sample_ids() {
            if !seen_samples.insert(s.clone()) {
                return Err(FameError::SchemaMismatch(format!(
                    "sample '{}' appears in more than one cohort",
                    s
                )));
            }
            sample_ids.push(s.clone());
        }
    }

    let mut tri_mat = TriMat::new((gene_ids.len(), sample_ids.len()));
    let mut col_offset = 0;
    for cohort in cohorts {
        let data = cohort.counts.data();
        for (row, row_vec) in data.outer_iterator().enumerate() {
            let new_row = gene_index[&cohort.counts.gene_ids()[row]];
            for (col, &val) in row_vec.iter() {
                tri_mat.add_triplet(new_row, col_offset + col, val);
            }
        }
        col_offset += cohort.counts.n_samples();
    }
    let counts = CountMatrix::new(tri_mat.to_csr(), gene_ids, sample_ids.clone())?;

    let metadata = concat_metadata(cohorts, &aligned, &sample_ids, batch_column)?;
    metadata.ensure_aligned(counts.sample_ids())?;

    info!(
        cohorts = cohorts.len(),
        genes = counts.n_genes(),
        samples = counts.n_samples(),
        "cohorts merged"
    );
    Ok(MergedCohort { counts, metadata })
}

fn concat_metadata(
    cohorts: &[Cohort],
    aligned: &[SampleMetadata],
    sample_ids: &[String],
    batch_column: Option<&str>,
) -> Result<SampleMetadata> {
    let mut columns: Vec<String> = Vec::new();
    for meta in aligned {
        for c in meta.column_names() {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }

    let mut merged = SampleMetadata::new(sample_ids.to_vec())?;
    for col in &columns {
        let all_continuous = aligned
            .iter()
            .all(|m| !m.has_column(col) || m.column_type(col) == Some(VariableType::Continuous));
        let values: Vec<&Variable> = aligned
            .iter()
            .flat_map(|m| {
                m.sample_ids()
                    .iter()
                    .map(move |s| m.get(s, col).unwrap_or(&Variable::Missing))
            })
            .collect();
        if all_continuous {
            merged.add_continuous(col, values.iter().map(|v| v.as_continuous()).collect())?;
        } else {
            let labels = values
                .iter()
                .map(|v| match v {
                    Variable::Categorical(s) => Some(s.clone()),
                    Variable::Continuous(x) => Some(x.to_string()),
                    Variable::Missing => None,
                })
                .collect();
            merged.add_categorical(col, labels)?;
            let order = aligned.iter().find_map(|m| m.level_order(col));
            if let Some(order) = order {
                merged = merged.with_level_order(col, order)?;
            }
        }
    }

    if let Some(batch) = batch_column {
        let labels = cohorts
            .iter()
            .flat_map(|c| std::iter::repeat(Some(c.name.clone())).take(c.counts.n_samples()))
            .collect();
        merged.add_categorical(batch, labels)?;
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cohort(name: &str, genes: &[&str], samples: &[&str], rows: Vec<Vec<u64>>) -> Cohort {
        let counts = CountMatrix::from_rows(
            &rows,
            genes.iter().map(|s| s.to_string()).collect(),
            samples.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        // Phenotype rows in reverse order to exercise alignment
        let mut ids: Vec<String> = samples.iter().map(|s| s.to_string()).collect();
        ids.reverse();
        let mut meta = SampleMetadata::new(ids).unwrap();
        meta.add_continuous("age", (0..samples.len()).map(|i| Some(40.0 + i as f64)).collect())
            .unwrap();
        Cohort::new(name, counts, meta)
    }

    #[test]
    fn test_outer_join_zero_fill() {
        let a = cohort("FAM1", &["g1", "g2"], &["a1", "a2"], vec![vec![1, 2], vec![3, 4]]);
        let b = cohort("FAM2", &["g2", "g3"], &["b1"], vec![vec![5], vec![6]]);
        let merged = merge_cohorts(&[a, b], Some("batch")).unwrap();

        assert_eq!(merged.counts.gene_ids(), &["g1", "g2", "g3"]);
        assert_eq!(merged.counts.sample_ids(), &["a1", "a2", "b1"]);
        assert_eq!(merged.counts.row_dense(0), vec![1, 2, 0]);
        assert_eq!(merged.counts.row_dense(1), vec![3, 4, 5]);
        assert_eq!(merged.counts.row_dense(2), vec![0, 0, 6]);

        assert_eq!(merged.metadata.sample_ids(), merged.counts.sample_ids());
        assert_eq!(
            merged.metadata.get("b1", "batch").and_then(|v| v.as_categorical()),
            Some("FAM2")
        );
        // a1 was the second phenotype row of its cohort
        assert_eq!(merged.metadata.get("a1", "age").and_then(|v| v.as_continuous()), Some(41.0));
    }

    #[test]
    fn test_duplicate_sample_rejected() {
        let a = cohort("FAM1", &["g1"], &["x"], vec![vec![1]]);
        let b = cohort("FAM2", &["g1"], &["x"], vec![vec![2]]);
        assert!(matches!(
            merge_cohorts(&[a, b], None),
            Err(FameError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_missing_phenotype_row_rejected() {
        let mut a = cohort("FAM1", &["g1"], &["x", "y"], vec![vec![1, 2]]);
        a.metadata = a.metadata.subset_samples(&["x".to_string()]).unwrap();
        assert!(matches!(
            merge_cohorts(&[a], None),
            Err(FameError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_union_of_phenotype_columns() {
        let a = cohort("FAM1", &["g1"], &["a1"], vec![vec![1]]);
        let mut b = cohort("FAM2", &["g1"], &["b1"], vec![vec![2]]);
        b.metadata
            .add_categorical("status", vec![Some("post".to_string())])
            .unwrap();
        let merged = merge_cohorts(&[a, b], None).unwrap();
        assert!(merged.metadata.get("a1", "status").unwrap().is_missing());
        assert_eq!(
            merged.metadata.get("b1", "status").and_then(|v| v.as_categorical()),
            Some("post")
        );
    }
}
