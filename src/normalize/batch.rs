//! Removal of batch effects from transformed expression for display.

use crate::data::{DesignMatrix, SampleMetadata};
use crate::error::{FameError, Result};
use crate::normalize::TransformedMatrix;
use nalgebra::DMatrix;
use tracing::info;

/// Regress out a batch factor while protecting `keep_columns`.
///
/// Each gene is fitted by least squares on `~ 1 + keep_columns + batch`
/// with sum-to-zero batch contrasts, and the batch part of the fit is
/// subtracted. The result is for plots and clustering only; models take
/// the batch as a covariate instead.
pub fn remove_batch_effect(
    transformed: &TransformedMatrix,
    metadata: &SampleMetadata,
    batch_column: &str,
    keep_columns: &[&str],
) -> Result<TransformedMatrix> {
    metadata.ensure_aligned(&transformed.sample_ids)?;

    let batch = metadata.column(batch_column)?;
    if let Some(i) = batch.iter().position(|v| v.is_missing()) {
        return Err(FameError::SchemaMismatch(format!(
            "sample '{}' has no '{}' label",
            metadata.sample_ids()[i],
            batch_column
        )));
    }
    let labels: Vec<String> = batch
        .iter()
        .map(|v| match v.as_categorical() {
            Some(s) => s.to_string(),
            None => v.as_continuous().map(|x| x.to_string()).unwrap_or_default(),
        })
        .collect();
    let mut levels = labels.clone();
    levels.sort();
    levels.dedup();
    if levels.len() < 2 {
        return Ok(transformed.clone());
    }

    let keep = DesignMatrix::from_variables(metadata, keep_columns).map_err(|e| match e {
        FameError::InvalidVariableType { column, .. } => FameError::SchemaMismatch(format!(
            "missing values in protected column '{}'",
            column
        )),
        other => other,
    })?;

    let n = labels.len();
    let last = &levels[levels.len() - 1];
    let n_batch = levels.len() - 1;
    let contrasts = DMatrix::from_fn(n, n_batch, |i, j| {
        if labels[i] == levels[j] {
            1.0
        } else if &labels[i] == last {
            -1.0
        } else {
            0.0
        }
    });

    let n_keep = keep.n_coefficients();
    let mut x = DMatrix::zeros(n, n_keep + n_batch);
    x.columns_mut(0, n_keep).copy_from(keep.matrix());
    x.columns_mut(n_keep, n_batch).copy_from(&contrasts);

    let xtx_inv = (x.transpose() * &x).try_inverse().ok_or_else(|| {
        FameError::Numerical(format!(
            "'{}' is confounded with the protected columns",
            batch_column
        ))
    })?;
    // Coefficients for all genes at once: B = Y X (X'X)^-1
    let coefs = transformed.matrix() * &x * xtx_inv;
    let batch_coefs = coefs.columns(n_keep, n_batch);
    let data = transformed.matrix() - batch_coefs * contrasts.transpose();

    info!(
        batch = batch_column,
        levels = levels.len(),
        protected = keep_columns.len(),
        "batch effect removed"
    );
    Ok(TransformedMatrix {
        data,
        gene_ids: transformed.gene_ids.clone(),
        sample_ids: transformed.sample_ids.clone(),
        transformation: format!("{}+batch_removed", transformed.transformation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn setup(batch: Vec<Option<&str>>) -> (TransformedMatrix, SampleMetadata) {
        let ids: Vec<String> = (0..6).map(|i| format!("s{}", i)).collect();
        let mut meta = SampleMetadata::new(ids.clone()).unwrap();
        meta.add_categorical("batch", batch.into_iter().map(|b| b.map(String::from)).collect())
            .unwrap();
        let status = ["pre", "post", "pre", "post", "pre", "post"];
        meta.add_categorical("status", status.iter().map(|s| Some(s.to_string())).collect())
            .unwrap();
        // Status effect +2 for post, batch B shifts by +5
        let values = [1.0, 3.0, 1.0, 8.0, 6.0, 8.0];
        let data = DMatrix::from_row_slice(1, 6, &values);
        let t = TransformedMatrix {
            data,
            gene_ids: vec!["g".into()],
            sample_ids: ids,
            transformation: "vst".into(),
        };
        (t, meta)
    }

    #[test]
    fn test_batch_shift_removed_status_kept() {
        let (t, meta) = setup(vec![
            Some("A"),
            Some("A"),
            Some("A"),
            Some("B"),
            Some("B"),
            Some("B"),
        ]);
        let out = remove_batch_effect(&t, &meta, "batch", &["status"]).unwrap();
        let row = out.row(0);
        // Batch difference gone: both batches' pre samples agree
        assert_relative_eq!(row[0], row[4], epsilon = 1e-9);
        assert_relative_eq!(row[1], row[3], epsilon = 1e-9);
        // Status effect intact
        assert_relative_eq!(row[1] - row[0], 2.0, epsilon = 1e-9);
        assert_eq!(out.transformation, "vst+batch_removed");
    }

    #[test]
    fn test_missing_batch_label_is_schema_error() {
        let (t, meta) = setup(vec![Some("A"), None, Some("A"), Some("B"), Some("B"), Some("B")]);
        assert!(matches!(
            remove_batch_effect(&t, &meta, "batch", &[]),
            Err(FameError::SchemaMismatch(_))
        ));
    }
}
