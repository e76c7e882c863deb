//! Gene × sample read count matrix with sparse storage.

use crate::error::{FameError, Result};
use rayon::prelude::*;
use sprs::{CsMat, TriMat};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A sparse matrix of non-negative read counts.
///
/// Rows are genes, columns are samples. Stored in CSR format since every
/// downstream stage walks the matrix gene by gene.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Sparse matrix in CSR format (genes × samples)
    data: CsMat<u64>,
    /// Gene identifiers (row names)
    gene_ids: Vec<String>,
    /// Sample identifiers (column names)
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new CountMatrix from a sparse matrix and identifiers.
    ///
    /// Gene and sample identifiers must be unique.
    pub fn new(data: CsMat<u64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows != gene_ids.len() {
            return Err(FameError::DimensionMismatch {
                expected: nrows,
                actual: gene_ids.len(),
            });
        }
        if ncols != sample_ids.len() {
            return Err(FameError::DimensionMismatch {
                expected: ncols,
                actual: sample_ids.len(),
            });
        }
        check_unique(&gene_ids)?;
        check_unique(&sample_ids)?;
        Ok(Self {
            data,
            gene_ids,
            sample_ids,
        })
    }

    /// Build a matrix from dense rows (one `Vec` per gene).
    pub fn from_rows(rows: &[Vec<u64>], gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let n_samples = sample_ids.len();
        let mut tri_mat = TriMat::new((rows.len(), n_samples));
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_samples {
                return Err(FameError::DimensionMismatch {
                    expected: n_samples,
                    actual: row.len(),
                });
            }
            for (j, &val) in row.iter().enumerate() {
                if val > 0 {
                    tri_mat.add_triplet(i, j, val);
                }
            }
        }
        Self::new(tri_mat.to_csr(), gene_ids, sample_ids)
    }

    /// Load a count matrix from a TSV file.
    ///
    /// Expected format:
    /// - First row: header with sample IDs (first column is the gene ID header)
    /// - Subsequent rows: gene ID followed by counts
    ///
    /// Counts written as floats with a zero fraction (`12.0`, as produced by
    /// some quantifiers) are accepted.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| FameError::EmptyData("Empty TSV file".to_string()))??;
        let header: Vec<&str> = header_line.trim_end_matches('\r').split('\t').collect();
        if header.len() < 2 {
            return Err(FameError::EmptyData(
                "TSV must have at least one sample".to_string(),
            ));
        }
        let sample_ids: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();
        let n_samples = sample_ids.len();

        let mut triplets: Vec<(usize, usize, u64)> = Vec::new();
        let mut gene_ids: Vec<String> = Vec::new();

        for line_result in lines {
            let line = line_result?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let row_idx = gene_ids.len();
            let fields: Vec<&str> = line.split('\t').collect();
            gene_ids.push(fields[0].trim().to_string());

            for (col_idx, value_str) in fields[1..].iter().enumerate() {
                if col_idx >= n_samples {
                    break;
                }
                let value = parse_count(value_str).ok_or_else(|| FameError::InvalidCount {
                    value: value_str.to_string(),
                    row: row_idx,
                    col: col_idx,
                })?;
                if value > 0 {
                    triplets.push((row_idx, col_idx, value));
                }
            }
        }

        let n_genes = gene_ids.len();
        if n_genes == 0 {
            return Err(FameError::EmptyData("No genes in TSV".to_string()));
        }

        let mut tri_mat = TriMat::new((n_genes, n_samples));
        for (row, col, val) in triplets {
            tri_mat.add_triplet(row, col, val);
        }

        Self::new(tri_mat.to_csr(), gene_ids, sample_ids)
    }

    /// Write the count matrix to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write!(writer, "gene_id")?;
        for sample_id in &self.sample_ids {
            write!(writer, "\t{}", sample_id)?;
        }
        writeln!(writer)?;

        for (row_idx, gene_id) in self.gene_ids.iter().enumerate() {
            write!(writer, "{}", gene_id)?;
            for value in self.row_dense(row_idx) {
                write!(writer, "\t{}", value)?;
            }
            writeln!(writer)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Get the value at (row, col), returning 0 for missing entries.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.data.get(row, col).copied().unwrap_or(0)
    }

    /// Number of genes (rows).
    #[inline]
    pub fn n_genes(&self) -> usize {
        self.data.rows()
    }

    /// Number of samples (columns).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.cols()
    }

    /// Total number of non-zero entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.data.nnz()
    }

    /// Gene identifiers.
    #[inline]
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    /// Sample identifiers.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Row index of a gene.
    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|g| g == gene_id)
    }

    /// Get the underlying sparse matrix.
    #[inline]
    pub fn data(&self) -> &CsMat<u64> {
        &self.data
    }

    /// Get a dense vector for a specific row (gene).
    pub fn row_dense(&self, row: usize) -> Vec<u64> {
        let mut dense = vec![0u64; self.n_samples()];
        if let Some(row_vec) = self.data.outer_view(row) {
            for (col, &val) in row_vec.iter() {
                dense[col] = val;
            }
        }
        dense
    }

    /// Dense row as `f64`, the form the model fitter consumes.
    pub fn row_f64(&self, row: usize) -> Vec<f64> {
        self.row_dense(row).into_iter().map(|v| v as f64).collect()
    }

    /// Compute row sums (total counts per gene).
    pub fn row_sums(&self) -> Vec<u64> {
        (0..self.n_genes())
            .into_par_iter()
            .map(|row| {
                self.data
                    .outer_view(row)
                    .map(|v| v.iter().map(|(_, &val)| val).sum())
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Mean count per gene across all samples (zeros included).
    pub fn row_means(&self) -> Vec<f64> {
        let n = self.n_samples().max(1) as f64;
        self.row_sums().into_iter().map(|s| s as f64 / n).collect()
    }

    /// Number of non-zero samples per gene.
    pub fn row_nonzero(&self) -> Vec<usize> {
        (0..self.n_genes())
            .map(|row| self.data.outer_view(row).map(|v| v.nnz()).unwrap_or(0))
            .collect()
    }

    /// Compute column sums (library sizes per sample).
    pub fn col_sums(&self) -> Vec<u64> {
        let mut sums = vec![0u64; self.n_samples()];
        for row_vec in self.data.outer_iterator() {
            for (col, &val) in row_vec.iter() {
                sums[col] += val;
            }
        }
        sums
    }

    /// Subset the matrix to include only specified genes (by index).
    pub fn subset_genes(&self, indices: &[usize]) -> Result<Self> {
        let n_genes = indices.len();
        let n_samples = self.n_samples();

        let mut tri_mat = TriMat::new((n_genes, n_samples));
        let mut new_gene_ids = Vec::with_capacity(n_genes);

        for (new_row, &old_row) in indices.iter().enumerate() {
            if old_row >= self.n_genes() {
                return Err(FameError::InvalidParameter(format!(
                    "Gene index {} out of bounds",
                    old_row
                )));
            }
            new_gene_ids.push(self.gene_ids[old_row].clone());

            if let Some(row_vec) = self.data.outer_view(old_row) {
                for (col, &val) in row_vec.iter() {
                    tri_mat.add_triplet(new_row, col, val);
                }
            }
        }

        Self::new(tri_mat.to_csr(), new_gene_ids, self.sample_ids.clone())
    }

    /// Subset the matrix to include only specified samples (by index).
    pub fn subset_samples(&self, indices: &[usize]) -> Result<Self> {
        let n_genes = self.n_genes();
        let n_samples = indices.len();

        let col_map: HashMap<usize, usize> = indices
            .iter()
            .enumerate()
            .map(|(new_idx, &old_idx)| (old_idx, new_idx))
            .collect();

        let mut new_sample_ids = Vec::with_capacity(n_samples);
        for &old_col in indices {
            if old_col >= self.n_samples() {
                return Err(FameError::InvalidParameter(format!(
                    "Sample index {} out of bounds",
                    old_col
                )));
            }
            new_sample_ids.push(self.sample_ids[old_col].clone());
        }

        let mut tri_mat = TriMat::new((n_genes, n_samples));
        for (row, row_vec) in self.data.outer_iterator().enumerate() {
            for (old_col, &val) in row_vec.iter() {
                if let Some(&new_col) = col_map.get(&old_col) {
                    tri_mat.add_triplet(row, new_col, val);
                }
            }
        }

        Self::new(tri_mat.to_csr(), self.gene_ids.clone(), new_sample_ids)
    }

    /// Reorder/subset columns to follow `sample_ids`.
    pub fn select_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let index: HashMap<&str, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        let indices = sample_ids
            .iter()
            .map(|s| {
                index.get(s.as_str()).copied().ok_or_else(|| {
                    FameError::SchemaMismatch(format!("Sample '{}' not found in counts", s))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.subset_samples(&indices)
    }

    /// Convert to a dense matrix (f64).
    pub fn to_dense(&self) -> nalgebra::DMatrix<f64> {
        let mut dense = nalgebra::DMatrix::zeros(self.n_genes(), self.n_samples());
        for (row, row_vec) in self.data.outer_iterator().enumerate() {
            for (col, &val) in row_vec.iter() {
                dense[(row, col)] = val as f64;
            }
        }
        dense
    }
}

fn check_unique(ids: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(FameError::DuplicateId(id.clone()));
        }
    }
    Ok(())
}

fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    let v = raw.parse::<f64>().ok()?;
    if v >= 0.0 && v.fract() == 0.0 && v.is_finite() {
        Some(v as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_matrix() -> CountMatrix {
        // 3 genes × 4 samples
        let rows = vec![vec![10, 20, 0, 5], vec![100, 200, 150, 175], vec![1, 0, 0, 0]];
        let gene_ids = vec!["ENSG01".to_string(), "ENSG02".to_string(), "ENSG03".to_string()];
        let sample_ids = vec![
            "FAM01".to_string(),
            "FAM02".to_string(),
            "FAM03".to_string(),
            "FAM04".to_string(),
        ];
        CountMatrix::from_rows(&rows, gene_ids, sample_ids).unwrap()
    }

    #[test]
    fn test_dimensions() {
        let mat = create_test_matrix();
        assert_eq!(mat.n_genes(), 3);
        assert_eq!(mat.n_samples(), 4);
    }

    #[test]
    fn test_get_values() {
        let mat = create_test_matrix();
        assert_eq!(mat.get(0, 0), 10);
        assert_eq!(mat.get(0, 2), 0);
        assert_eq!(mat.get(2, 0), 1);
        assert_eq!(mat.get(2, 1), 0);
    }

    #[test]
    fn test_sums_and_means() {
        let mat = create_test_matrix();
        assert_eq!(mat.col_sums(), vec![111, 220, 150, 180]);
        assert_eq!(mat.row_sums(), vec![35, 625, 1]);
        assert_eq!(mat.row_means()[1], 156.25);
        assert_eq!(mat.row_nonzero(), vec![3, 4, 1]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let rows = vec![vec![1, 2], vec![3, 4]];
        let result = CountMatrix::from_rows(
            &rows,
            vec!["g".into(), "g".into()],
            vec!["a".into(), "b".into()],
        );
        assert!(matches!(result, Err(FameError::DuplicateId(_))));
    }

    #[test]
    fn test_tsv_roundtrip() {
        let mat = create_test_matrix();
        let temp_file = NamedTempFile::new().unwrap();
        mat.to_tsv(temp_file.path()).unwrap();

        let loaded = CountMatrix::from_tsv(temp_file.path()).unwrap();
        assert_eq!(loaded.gene_ids(), mat.gene_ids());
        assert_eq!(loaded.sample_ids(), mat.sample_ids());
        for row in 0..mat.n_genes() {
            assert_eq!(loaded.row_dense(row), mat.row_dense(row));
        }
    }

    #[test]
    fn test_fractional_count_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\tA\tB").unwrap();
        writeln!(file, "g1\t12.0\t3").unwrap();
        writeln!(file, "g2\t0\t1.5").unwrap();
        file.flush().unwrap();

        let result = CountMatrix::from_tsv(file.path());
        assert!(matches!(result, Err(FameError::InvalidCount { row: 1, col: 1, .. })));
    }

    #[test]
    fn test_select_samples() {
        let mat = create_test_matrix();
        let subset = mat
            .select_samples(&["FAM04".to_string(), "FAM02".to_string()])
            .unwrap();
        assert_eq!(subset.sample_ids(), &["FAM04", "FAM02"]);
        assert_eq!(subset.row_dense(0), vec![5, 20]);

        let missing = mat.select_samples(&["FAM99".to_string()]);
        assert!(matches!(missing, Err(FameError::SchemaMismatch(_))));
    }

    #[test]
    fn test_subset_genes() {
        let mat = create_test_matrix();
        let subset = mat.subset_genes(&[0, 2]).unwrap();
        assert_eq!(subset.gene_ids(), &["ENSG01", "ENSG03"]);
        assert_eq!(subset.get(1, 0), 1);
    }
}
