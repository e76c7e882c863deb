//! Dense gene × sample matrix of transformed expression values.

use crate::error::{FameError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A transformed matrix with metadata about the transformation.
///
/// Produced by normalization and the variance-stabilizing transform; used
/// for visualization and clustering, never as model input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedMatrix {
    /// The transformed data (genes × samples).
    #[serde(skip)]
    pub data: DMatrix<f64>,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    /// Name of the transformation applied.
    pub transformation: String,
}

impl TransformedMatrix {
    /// Get the transformed value for a gene and sample.
    pub fn get(&self, gene: usize, sample: usize) -> f64 {
        self.data[(gene, sample)]
    }

    /// Number of genes.
    pub fn n_genes(&self) -> usize {
        self.data.nrows()
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Get a row (gene) as a vector.
    pub fn row(&self, gene: usize) -> Vec<f64> {
        self.data.row(gene).iter().cloned().collect()
    }

    /// Get reference to the underlying matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Row index of a gene.
    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|g| g == gene_id)
    }

    /// Keep only the listed genes, in the given order.
    pub fn select_genes(&self, gene_ids: &[String]) -> Result<Self> {
        let rows = gene_ids
            .iter()
            .map(|g| {
                self.gene_index(g).ok_or_else(|| {
                    FameError::InvalidParameter(format!("gene '{}' not in transformed matrix", g))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            data: self.data.select_rows(rows.iter()),
            gene_ids: gene_ids.to_vec(),
            sample_ids: self.sample_ids.clone(),
            transformation: self.transformation.clone(),
        })
    }

    /// Write as TSV (first column `gene_id`, header = sample ids).
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write!(writer, "gene_id")?;
        for s in &self.sample_ids {
            write!(writer, "\t{}", s)?;
        }
        writeln!(writer)?;
        for (i, g) in self.gene_ids.iter().enumerate() {
            write!(writer, "{}", g)?;
            for j in 0..self.n_samples() {
                write!(writer, "\t{:.6}", self.data[(i, j)])?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }
}
