//! Sample phenotype table (age, menopausal status, hormone levels, batch).

use crate::error::{FameError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A single phenotype value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical variable with string levels.
    Categorical(String),
    /// Continuous numeric variable.
    Continuous(f64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as continuous f64.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            _ => None,
        }
    }

    fn to_field(&self) -> String {
        match self {
            Variable::Categorical(s) => s.clone(),
            Variable::Continuous(v) => v.to_string(),
            Variable::Missing => "NA".to_string(),
        }
    }
}

/// Type hint for columns when loading metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
}

fn is_missing_token(raw: &str) -> bool {
    raw.is_empty() || raw == "NA" || raw == "na" || raw == "NaN"
}

/// Per-sample phenotype data.
///
/// Categorical columns can carry an explicit level order (for example
/// `young < mid < old`); the first level is the reference for treatment
/// coding. Without one, levels sort lexically.
#[derive(Debug, Clone, Default)]
pub struct SampleMetadata {
    /// Sample IDs in order.
    sample_ids: Vec<String>,
    /// Column names.
    column_names: Vec<String>,
    /// Data stored as sample_id -> column_name -> Variable.
    data: HashMap<String, HashMap<String, Variable>>,
    column_types: HashMap<String, VariableType>,
    level_orders: HashMap<String, Vec<String>>,
}

impl SampleMetadata {
    /// Create metadata with the given samples and no columns.
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for sid in &sample_ids {
            if !seen.insert(sid.as_str()) {
                return Err(FameError::DuplicateId(sid.clone()));
            }
        }
        let data = sample_ids
            .iter()
            .map(|s| (s.clone(), HashMap::new()))
            .collect();
        Ok(Self {
            sample_ids,
            column_names: Vec::new(),
            data,
            column_types: HashMap::new(),
            level_orders: HashMap::new(),
        })
    }

    /// Load metadata from a TSV file.
    ///
    /// Expected format:
    /// - First row: header with column names (first column is sample ID)
    /// - Subsequent rows: sample ID followed by variable values
    ///
    /// Columns are inferred as continuous if all non-missing values parse as
    /// numbers, otherwise categorical. `""`, `NA` and `NaN` are missing.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| FameError::EmptyData("Empty metadata file".to_string()))??;
        let header: Vec<&str> = header_line.trim_end_matches('\r').split('\t').collect();
        if header.len() < 2 {
            return Err(FameError::EmptyData(
                "Metadata must have at least one variable column".to_string(),
            ));
        }
        let column_names: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();

        // First pass: collect all values to infer types
        let mut raw_data: Vec<(String, Vec<String>)> = Vec::new();
        for line_result in lines {
            let line = line_result?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let sample_id = fields[0].trim().to_string();
            let values: Vec<String> = fields[1..].iter().map(|s| s.trim().to_string()).collect();
            raw_data.push((sample_id, values));
        }

        if raw_data.is_empty() {
            return Err(FameError::EmptyData("No samples in metadata".to_string()));
        }

        let mut meta = Self::new(raw_data.iter().map(|(s, _)| s.clone()).collect())?;
        for (col_idx, col_name) in column_names.iter().enumerate() {
            let raw: Vec<&str> = raw_data
                .iter()
                .map(|(_, values)| values.get(col_idx).map(String::as_str).unwrap_or(""))
                .collect();
            let all_numeric = raw
                .iter()
                .all(|v| is_missing_token(v) || v.parse::<f64>().is_ok());
            if all_numeric {
                let values = raw
                    .iter()
                    .map(|v| if is_missing_token(v) { None } else { v.parse().ok() })
                    .collect();
                meta.add_continuous(col_name, values)?;
            } else {
                let values = raw
                    .iter()
                    .map(|v| if is_missing_token(v) { None } else { Some(v.to_string()) })
                    .collect();
                meta.add_categorical(col_name, values)?;
            }
        }
        Ok(meta)
    }

    /// Write the table as TSV; missing values are written as `NA`.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write!(writer, "sample_id")?;
        for col in &self.column_names {
            write!(writer, "\t{}", col)?;
        }
        writeln!(writer)?;

        for sid in &self.sample_ids {
            write!(writer, "{}", sid)?;
            for col in &self.column_names {
                let field = self
                    .get(sid, col)
                    .map(Variable::to_field)
                    .unwrap_or_else(|| "NA".to_string());
                write!(writer, "\t{}", field)?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn insert_column(
        &mut self,
        name: &str,
        var_type: VariableType,
        values: Vec<Variable>,
    ) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(FameError::DimensionMismatch {
                expected: self.sample_ids.len(),
                actual: values.len(),
            });
        }
        if !self.has_column(name) {
            self.column_names.push(name.to_string());
        }
        self.column_types.insert(name.to_string(), var_type);
        self.level_orders.remove(name);
        for (sid, value) in self.sample_ids.iter().zip(values) {
            if let Some(row) = self.data.get_mut(sid) {
                row.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// Add (or replace) a categorical column.
    pub fn add_categorical(&mut self, name: &str, values: Vec<Option<String>>) -> Result<()> {
        let values = values
            .into_iter()
            .map(|v| v.map(Variable::Categorical).unwrap_or(Variable::Missing))
            .collect();
        self.insert_column(name, VariableType::Categorical, values)
    }

    /// Add (or replace) a continuous column. Non-finite values become missing.
    pub fn add_continuous(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        let values = values
            .into_iter()
            .map(|v| match v {
                Some(x) if x.is_finite() => Variable::Continuous(x),
                _ => Variable::Missing,
            })
            .collect();
        self.insert_column(name, VariableType::Continuous, values)
    }

    /// Force a column to be categorical (e.g. numeric batch labels).
    pub fn with_categorical(mut self, column: &str) -> Result<Self> {
        let values = self
            .column(column)?
            .into_iter()
            .map(|v| match v {
                Variable::Missing => None,
                other => Some(other.to_field()),
            })
            .collect();
        self.add_categorical(column, values)?;
        Ok(self)
    }

    /// Fix the level order of a categorical column.
    ///
    /// Every observed level must appear in `order`; levels listed but not
    /// observed are kept so that group axes stay stable across subsets.
    pub fn with_level_order(mut self, column: &str, order: &[String]) -> Result<Self> {
        if self.column_type(column) != Some(VariableType::Categorical) {
            return Err(FameError::InvalidVariableType {
                column: column.to_string(),
                reason: "level order requires a categorical column".to_string(),
            });
        }
        for value in self.column(column)? {
            if let Variable::Categorical(s) = value {
                if !order.contains(s) {
                    return Err(FameError::InvalidVariableType {
                        column: column.to_string(),
                        reason: format!("level '{}' missing from level order", s),
                    });
                }
            }
        }
        self.level_orders.insert(column.to_string(), order.to_vec());
        Ok(self)
    }

    /// Sample IDs in order.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Number of columns (variables).
    pub fn n_columns(&self) -> usize {
        self.column_names.len()
    }

    /// Get a variable value for a specific sample and column.
    pub fn get(&self, sample_id: &str, column: &str) -> Option<&Variable> {
        self.data.get(sample_id).and_then(|m| m.get(column))
    }

    /// Get all values for a column, in sample order.
    pub fn column(&self, column: &str) -> Result<Vec<&Variable>> {
        if !self.has_column(column) {
            return Err(FameError::MissingColumn(column.to_string()));
        }
        Ok(self
            .sample_ids
            .iter()
            .map(|sid| {
                self.data
                    .get(sid)
                    .and_then(|m| m.get(column))
                    .unwrap_or(&Variable::Missing)
            })
            .collect())
    }

    /// Continuous values of a column; errors if the column is categorical.
    pub fn continuous(&self, column: &str) -> Result<Vec<Option<f64>>> {
        if self.column_type(column) == Some(VariableType::Categorical) {
            return Err(FameError::InvalidVariableType {
                column: column.to_string(),
                reason: "expected a continuous column".to_string(),
            });
        }
        Ok(self
            .column(column)?
            .into_iter()
            .map(Variable::as_continuous)
            .collect())
    }

    /// Get the type of a column.
    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.column_types.get(column).copied()
    }

    /// Level order set with [`with_level_order`](Self::with_level_order), if any.
    pub fn level_order(&self, column: &str) -> Option<&[String]> {
        self.level_orders.get(column).map(Vec::as_slice)
    }

    /// Levels of a categorical column that occur in the data.
    ///
    /// Follows the explicit level order when one is set, otherwise sorts.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        let values = self.column(column)?;
        let present: HashSet<&str> = values.iter().filter_map(|v| v.as_categorical()).collect();
        if let Some(order) = self.level_orders.get(column) {
            return Ok(order
                .iter()
                .filter(|l| present.contains(l.as_str()))
                .cloned()
                .collect());
        }
        let mut levels: Vec<String> = present.into_iter().map(String::from).collect();
        levels.sort();
        Ok(levels)
    }

    /// Indices of samples with no missing value in any of `columns`.
    pub fn complete_cases(&self, columns: &[&str]) -> Result<Vec<usize>> {
        let cols = columns
            .iter()
            .map(|c| self.column(c))
            .collect::<Result<Vec<_>>>()?;
        Ok((0..self.n_samples())
            .filter(|&i| cols.iter().all(|c| !c[i].is_missing()))
            .collect())
    }

    /// Subset metadata to only include specified samples, in the given order.
    pub fn subset_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let mut new_data = HashMap::new();
        for sid in sample_ids {
            let sample_data = self.data.get(sid).ok_or_else(|| {
                FameError::SchemaMismatch(format!("Sample '{}' not found in metadata", sid))
            })?;
            if new_data.insert(sid.clone(), sample_data.clone()).is_some() {
                return Err(FameError::DuplicateId(sid.clone()));
            }
        }

        Ok(Self {
            sample_ids: sample_ids.to_vec(),
            column_names: self.column_names.clone(),
            data: new_data,
            column_types: self.column_types.clone(),
            level_orders: self.level_orders.clone(),
        })
    }

    /// Align metadata to match the sample order of a count matrix.
    ///
    /// Extra phenotype rows are dropped; a count column without a phenotype
    /// row is a `SchemaMismatch`.
    pub fn align_to(&self, sample_ids: &[String]) -> Result<Self> {
        self.subset_samples(sample_ids)
    }

    /// Fail unless the sample list equals `sample_ids`, order included.
    pub fn ensure_aligned(&self, sample_ids: &[String]) -> Result<()> {
        if self.sample_ids.len() != sample_ids.len() {
            return Err(FameError::SchemaMismatch(format!(
                "{} phenotype rows for {} count columns",
                self.sample_ids.len(),
                sample_ids.len()
            )));
        }
        if let Some((i, (a, b))) = self
            .sample_ids
            .iter()
            .zip(sample_ids)
            .enumerate()
            .find(|(_, (a, b))| a != b)
        {
            return Err(FameError::SchemaMismatch(format!(
                "sample {} is '{}' in phenotype data but '{}' in counts",
                i, a, b
            )));
        }
        Ok(())
    }

    /// Check if a sample exists.
    pub fn has_sample(&self, sample_id: &str) -> bool {
        self.data.contains_key(sample_id)
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.iter().any(|c| c == column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_tsv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample_id\tstatus\tage\tage_cat").unwrap();
        writeln!(file, "FAM01\tpre\t25\tyoung").unwrap();
        writeln!(file, "FAM02\tpost\t58\told").unwrap();
        writeln!(file, "FAM03\tpre\t41\tmid").unwrap();
        writeln!(file, "FAM04\tpost\tNA\told").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_metadata() {
        let file = create_test_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();

        assert_eq!(meta.n_samples(), 4);
        assert_eq!(meta.n_columns(), 3);
        assert_eq!(meta.column_names(), &["status", "age", "age_cat"]);
        assert_eq!(meta.column_type("status"), Some(VariableType::Categorical));
        assert_eq!(meta.column_type("age"), Some(VariableType::Continuous));
        assert_eq!(meta.get("FAM02", "age").unwrap().as_continuous(), Some(58.0));
        assert!(meta.get("FAM04", "age").unwrap().is_missing());
    }

    #[test]
    fn test_levels_sorted_and_ordered() {
        let file = create_test_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();
        assert_eq!(meta.levels("age_cat").unwrap(), vec!["mid", "old", "young"]);

        let order = vec!["young".to_string(), "mid".to_string(), "old".to_string()];
        let meta = meta.with_level_order("age_cat", &order).unwrap();
        assert_eq!(meta.levels("age_cat").unwrap(), order);
    }

    #[test]
    fn test_level_order_must_cover_levels() {
        let file = create_test_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();
        let result = meta.with_level_order("age_cat", &["young".to_string(), "old".to_string()]);
        assert!(matches!(result, Err(FameError::InvalidVariableType { .. })));
    }

    #[test]
    fn test_complete_cases() {
        let file = create_test_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();
        assert_eq!(meta.complete_cases(&["status", "age"]).unwrap(), vec![0, 1, 2]);
        assert!(matches!(
            meta.complete_cases(&["bmi"]),
            Err(FameError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_align_and_ensure_aligned() {
        let file = create_test_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();
        let order = vec!["FAM03".to_string(), "FAM01".to_string()];
        let aligned = meta.align_to(&order).unwrap();
        assert_eq!(aligned.sample_ids(), order.as_slice());
        assert!(aligned.ensure_aligned(&order).is_ok());

        let swapped = vec!["FAM01".to_string(), "FAM03".to_string()];
        assert!(matches!(
            aligned.ensure_aligned(&swapped),
            Err(FameError::SchemaMismatch(_))
        ));
        assert!(matches!(
            meta.align_to(&["FAM99".to_string()]),
            Err(FameError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_with_categorical_numeric_batch() {
        let mut meta = SampleMetadata::new(vec!["a".into(), "b".into()]).unwrap();
        meta.add_continuous("batch", vec![Some(1.0), Some(2.0)]).unwrap();
        let meta = meta.with_categorical("batch").unwrap();
        assert_eq!(meta.levels("batch").unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_tsv_roundtrip() {
        let file = create_test_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();
        let out = NamedTempFile::new().unwrap();
        meta.to_tsv(out.path()).unwrap();
        let reloaded = SampleMetadata::from_tsv(out.path()).unwrap();
        assert_eq!(reloaded.sample_ids(), meta.sample_ids());
        assert!(reloaded.get("FAM04", "age").unwrap().is_missing());
        assert_eq!(reloaded.get("FAM03", "age_cat"), meta.get("FAM03", "age_cat"));
    }
}
