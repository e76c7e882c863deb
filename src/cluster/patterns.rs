//! Expression pattern clustering across ordered sample groups.

use crate::cluster::hierarchical::{silhouette_score, Dendrogram, DistanceMatrix};
use crate::data::SampleMetadata;
use crate::error::{FameError, Result};
use crate::normalize::TransformedMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Largest cluster count tried.
    pub max_k: usize,
    /// Clusters with fewer genes are reported as unassigned.
    pub min_cluster_size: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            max_k: 10,
            min_cluster_size: 15,
        }
    }
}

/// Cluster membership of one gene; `None` when its cluster was too small.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub gene_id: String,
    pub cluster: Option<usize>,
}

/// Z-scored group means of one gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub gene_id: String,
    pub values: Vec<f64>,
}

/// Mean trajectory of one reported cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub size: usize,
    pub mean: Vec<f64>,
}

/// Result of [`cluster_patterns`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternClusters {
    /// Ordered group levels, the trajectory axis.
    pub groups: Vec<String>,
    pub assignments: Vec<ClusterAssignment>,
    pub trajectories: Vec<Trajectory>,
    /// Reported clusters, numbered from 1 by decreasing size.
    pub profiles: Vec<ClusterProfile>,
    /// Cluster count chosen by silhouette.
    pub k: usize,
    pub silhouette: f64,
}

impl PatternClusters {
    /// Gene ids of one cluster.
    pub fn members(&self, cluster: usize) -> Vec<&str> {
        self.assignments
            .iter()
            .filter(|a| a.cluster == Some(cluster))
            .map(|a| a.gene_id.as_str())
            .collect()
    }

    pub fn n_unassigned(&self) -> usize {
        self.assignments.iter().filter(|a| a.cluster.is_none()).count()
    }

    pub fn cluster_of(&self, gene_id: &str) -> Option<usize> {
        self.assignments
            .iter()
            .find(|a| a.gene_id == gene_id)
            .and_then(|a| a.cluster)
    }

    /// `gene_id<TAB>cluster`, `NA` for unassigned genes.
    pub fn assignments_to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "gene_id\tcluster")?;
        for a in &self.assignments {
            match a.cluster {
                Some(c) => writeln!(writer, "{}\t{}", a.gene_id, c)?,
                None => writeln!(writer, "{}\tNA", a.gene_id)?,
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Long table `cluster<TAB>size<TAB>group<TAB>mean_z`.
    pub fn profiles_to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "cluster\tsize\tgroup\tmean_z")?;
        for p in &self.profiles {
            for (group, v) in self.groups.iter().zip(&p.mean) {
                writeln!(writer, "{}\t{}\t{}\t{:.6}", p.cluster, p.size, group, v)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Long table `gene_id<TAB>cluster<TAB>group<TAB>z`.
    pub fn trajectories_to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "gene_id\tcluster\tgroup\tz")?;
        for (t, a) in self.trajectories.iter().zip(&self.assignments) {
            let cluster = a.cluster.map_or_else(|| "NA".to_string(), |c| c.to_string());
            for (group, v) in self.groups.iter().zip(&t.values) {
                writeln!(writer, "{}\t{}\t{}\t{:.6}", t.gene_id, cluster, group, v)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Keep only the listed clusters, for manual curation downstream.
    ///
    /// Cluster ids are preserved; genes of dropped clusters are removed.
    pub fn subset(&self, clusters: &[usize]) -> Result<Self> {
        if let Some(c) = clusters
            .iter()
            .find(|c| !self.profiles.iter().any(|p| p.cluster == **c))
        {
            return Err(FameError::InvalidParameter(format!("no cluster {}", c)));
        }
        let keep = |a: &ClusterAssignment| a.cluster.map_or(false, |c| clusters.contains(&c));
        let (assignments, trajectories) = self
            .assignments
            .iter()
            .zip(&self.trajectories)
            .filter(|(a, _)| keep(a))
            .map(|(a, t)| (a.clone(), t.clone()))
            .unzip();
        Ok(Self {
            groups: self.groups.clone(),
            assignments,
            trajectories,
            profiles: self
                .profiles
                .iter()
                .filter(|p| clusters.contains(&p.cluster))
                .cloned()
                .collect(),
            k: self.k,
            silhouette: self.silhouette,
        })
    }
}

/// Z-score a trajectory with the population standard deviation.
/// Constant trajectories become all zero.
pub fn zscore(values: &[f64]) -> Vec<f64> {
    let m = values.len() as f64;
    let mean = values.iter().sum::<f64>() / m;
    let sd = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / m).sqrt();
    if sd > 1e-12 {
        values.iter().map(|v| (v - mean) / sd).collect()
    } else {
        vec![0.0; values.len()]
    }
}

/// `1 - r` between two z-scored trajectories.
///
/// `r` is taken as 0 when either one is constant; two constant
/// trajectories are at distance 0.
pub fn correlation_distance(a: &[f64], b: &[f64]) -> f64 {
    let flat_a = a.iter().all(|&v| v == 0.0);
    let flat_b = b.iter().all(|&v| v == 0.0);
    match (flat_a, flat_b) {
        (true, true) => 0.0,
        (true, false) | (false, true) => 1.0,
        (false, false) => {
            let r = a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>() / a.len() as f64;
            1.0 - r.clamp(-1.0, 1.0)
        }
    }
}

/// Mean of every gene in each ordered level of `group_column`.
fn group_means(
    transformed: &TransformedMatrix,
    metadata: &SampleMetadata,
    group_column: &str,
    rows: &[usize],
) -> Result<(Vec<String>, Vec<Vec<f64>>)> {
    let levels = metadata.levels(group_column)?;
    let level_idx: HashMap<&str, usize> = levels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();

    let mut sample_level = Vec::with_capacity(transformed.n_samples());
    for sid in &transformed.sample_ids {
        if !metadata.has_sample(sid) {
            return Err(FameError::SchemaMismatch(format!(
                "sample '{}' has no phenotype row",
                sid
            )));
        }
        let level = metadata
            .get(sid, group_column)
            .and_then(|v| v.as_categorical())
            .and_then(|l| level_idx.get(l).copied());
        sample_level.push(level);
    }
    let mut n_per_level = vec![0usize; levels.len()];
    for l in sample_level.iter().flatten() {
        n_per_level[*l] += 1;
    }

    // Levels without a transformed sample have no mean
    let present: Vec<usize> = (0..levels.len()).filter(|&l| n_per_level[l] > 0).collect();
    for (l, name) in levels.iter().enumerate() {
        if n_per_level[l] == 0 {
            debug!(group = %name, "group has no samples, dropped from trajectories");
        }
    }

    let means = rows
        .iter()
        .map(|&r| {
            let mut sums = vec![0.0; levels.len()];
            for (j, level) in sample_level.iter().enumerate() {
                if let Some(l) = level {
                    sums[*l] += transformed.get(r, j);
                }
            }
            present
                .iter()
                .map(|&l| sums[l] / n_per_level[l] as f64)
                .collect()
        })
        .collect();
    let groups = present.into_iter().map(|l| levels[l].clone()).collect();
    Ok((groups, means))
}

/// Cluster genes by the shape of their mean expression across ordered groups.
///
/// The cluster count is the `k` in `2..=max_k` with the highest mean
/// silhouette width (ties go to the smaller `k`). Clusters are numbered
/// from 1 by decreasing size; genes of clusters below `min_cluster_size`
/// are left unassigned.
///
/// # Arguments
/// * `transformed` - VST (or other log-scale) expression
/// * `metadata` - Phenotypes of the transformed samples
/// * `group_column` - Ordered categorical column defining the trajectory axis
/// * `genes` - Genes to cluster, usually the significant ones
pub fn cluster_patterns(
    transformed: &TransformedMatrix,
    metadata: &SampleMetadata,
    group_column: &str,
    genes: &[String],
    config: &PatternConfig,
) -> Result<PatternClusters> {
    let rows: Vec<usize> = genes
        .iter()
        .map(|g| {
            transformed.gene_index(g).ok_or_else(|| {
                FameError::InvalidParameter(format!("gene '{}' not in transformed matrix", g))
            })
        })
        .collect::<Result<_>>()?;
    let n = rows.len();
    if n < 3 {
        return Err(FameError::InsufficientData {
            id: group_column.to_string(),
            reason: format!("{} genes, at least 3 are needed to cluster", n),
        });
    }

    let (groups, means) = group_means(transformed, metadata, group_column, &rows)?;
    if groups.len() < 2 {
        return Err(FameError::InsufficientData {
            id: group_column.to_string(),
            reason: "fewer than two groups".to_string(),
        });
    }
    let z: Vec<Vec<f64>> = means.iter().map(|m| zscore(m)).collect();
    let distances = DistanceMatrix::from_fn(n, |i, j| correlation_distance(&z[i], &z[j]));
    let tree = Dendrogram::average_linkage(&distances)?;

    let mut best: Option<(usize, f64, Vec<usize>)> = None;
    for k in 2..=config.max_k.min(n - 1) {
        let labels = tree.cut(k)?;
        let score = silhouette_score(&distances, &labels)?;
        debug!(k, silhouette = score, "cluster count tried");
        if best.as_ref().map_or(true, |(_, s, _)| score > *s) {
            best = Some((k, score, labels));
        }
    }
    let (k, silhouette, labels) = best.ok_or_else(|| {
        FameError::InvalidParameter("max_k must be at least 2".to_string())
    })?;

    // Renumber from 1 by decreasing size, ties by first member
    let mut sizes: Vec<(usize, usize)> = (0..k)
        .map(|c| (c, labels.iter().filter(|&&l| l == c).count()))
        .collect();
    sizes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut renumber = vec![None; k];
    let mut profiles = Vec::new();
    for (rank, &(c, size)) in sizes.iter().enumerate() {
        if size < config.min_cluster_size {
            continue;
        }
        let id = rank + 1;
        renumber[c] = Some(id);
        let mut mean = vec![0.0; groups.len()];
        for (zi, _) in z.iter().zip(&labels).filter(|(_, &l)| l == c) {
            for (m, v) in mean.iter_mut().zip(zi) {
                *m += v / size as f64;
            }
        }
        profiles.push(ClusterProfile {
            cluster: id,
            size,
            mean,
        });
    }

    let assignments: Vec<ClusterAssignment> = genes
        .iter()
        .zip(&labels)
        .map(|(g, &l)| ClusterAssignment {
            gene_id: g.clone(),
            cluster: renumber[l],
        })
        .collect();
    let trajectories = genes
        .iter()
        .zip(z)
        .map(|(g, values)| Trajectory {
            gene_id: g.clone(),
            values,
        })
        .collect();

    let result = PatternClusters {
        groups,
        assignments,
        trajectories,
        profiles,
        k,
        silhouette,
    };
    info!(
        genes = n,
        k,
        silhouette,
        reported = result.profiles.len(),
        unassigned = result.n_unassigned(),
        "expression patterns clustered"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    #[test]
    fn test_zscore_constant() {
        assert_eq!(zscore(&[2.0, 2.0, 2.0]), vec![0.0; 3]);
        let z = zscore(&[1.0, 2.0, 3.0]);
        assert_relative_eq!(z.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(z[2], 1.224744871391589, epsilon = 1e-12);
    }

    #[test]
    fn test_correlation_distance_cases() {
        let up = zscore(&[1.0, 2.0, 3.0]);
        let down = zscore(&[3.0, 2.0, 1.0]);
        let flat = zscore(&[5.0, 5.0, 5.0]);
        assert_relative_eq!(correlation_distance(&up, &up), 0.0, epsilon = 1e-12);
        assert_relative_eq!(correlation_distance(&up, &down), 2.0, epsilon = 1e-12);
        assert_eq!(correlation_distance(&up, &flat), 1.0);
        assert_eq!(correlation_distance(&flat, &flat), 0.0);
    }

    fn toy(n_per_pattern: usize) -> (TransformedMatrix, SampleMetadata, Vec<String>) {
        // Two groups of samples per level, three levels
        let levels = ["young", "middle", "old"];
        let samples: Vec<String> = (0..6).map(|i| format!("s{}", i)).collect();
        let patterns = [[1.0, 2.0, 3.0], [3.0, 2.0, 1.0]];
        let mut genes = Vec::new();
        let mut rows = Vec::new();
        for (p, pat) in patterns.iter().enumerate() {
            for g in 0..n_per_pattern {
                genes.push(format!("p{}_{}", p, g));
                let jitter = 0.01 * g as f64;
                rows.push((0..6).map(|j| pat[j / 2] * (1.0 + jitter) + jitter).collect::<Vec<f64>>());
            }
        }
        let data = DMatrix::from_fn(rows.len(), 6, |i, j| rows[i][j]);
        let transformed = TransformedMatrix {
            data,
            gene_ids: genes.clone(),
            sample_ids: samples.clone(),
            transformation: "vst".into(),
        };
        let mut meta = SampleMetadata::new(samples).unwrap();
        // Alphabetical order differs from the age order
        meta.add_categorical(
            "age_group",
            (0..6).map(|j| Some(levels[j / 2].to_string())).collect(),
        )
        .unwrap();
        let order: Vec<String> = levels.iter().map(|s| s.to_string()).collect();
        let meta = meta.with_level_order("age_group", &order).unwrap();
        (transformed, meta, genes)
    }

    #[test]
    fn test_two_patterns_separated() {
        let (t, meta, genes) = toy(20);
        let res = cluster_patterns(&t, &meta, "age_group", &genes, &PatternConfig::default()).unwrap();
        assert_eq!(res.groups, vec!["young", "middle", "old"]);
        assert_eq!(res.k, 2);
        assert_eq!(res.profiles.len(), 2);
        let c_up = res.cluster_of("p0_0").unwrap();
        let c_down = res.cluster_of("p1_0").unwrap();
        assert_ne!(c_up, c_down);
        assert!(res.members(c_up).iter().all(|g| g.starts_with("p0_")));
        let up_profile = res.profiles.iter().find(|p| p.cluster == c_up).unwrap();
        assert!(up_profile.mean[0] < up_profile.mean[2]);
    }

    #[test]
    fn test_small_clusters_unassigned() {
        let (t, meta, genes) = toy(5);
        let res = cluster_patterns(&t, &meta, "age_group", &genes, &PatternConfig::default()).unwrap();
        assert!(res.profiles.is_empty());
        assert_eq!(res.n_unassigned(), 10);
    }

    #[test]
    fn test_subset_and_trajectory_table() {
        let (t, meta, genes) = toy(20);
        let res = cluster_patterns(&t, &meta, "age_group", &genes, &PatternConfig::default()).unwrap();
        let picked = res.subset(&[1]).unwrap();
        assert_eq!(picked.profiles.len(), 1);
        assert_eq!(picked.assignments.len(), 20);
        assert!(picked.assignments.iter().all(|a| a.cluster == Some(1)));
        assert!(res.subset(&[7]).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trajectories.tsv");
        picked.trajectories_to_tsv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        // Header plus one line per gene and group
        assert_eq!(text.lines().count(), 1 + 20 * 3);
        assert!(text.lines().nth(1).unwrap().ends_with("\tyoung\t-1.224745")
            || text.lines().nth(1).unwrap().ends_with("\tyoung\t1.224745"));
    }

    #[test]
    fn test_group_without_samples_dropped() {
        let (t, _, genes) = toy(20);
        // Phenotype table lists a level whose only sample was not transformed
        let levels = ["young", "middle", "old", "elderly"];
        let samples: Vec<String> = (0..7).map(|i| format!("s{}", i)).collect();
        let mut meta = SampleMetadata::new(samples).unwrap();
        meta.add_categorical(
            "age_group",
            (0..7).map(|j| Some(levels[(j / 2).min(3)].to_string())).collect(),
        )
        .unwrap();
        let order: Vec<String> = levels.iter().map(|s| s.to_string()).collect();
        let meta = meta.with_level_order("age_group", &order).unwrap();

        let res = cluster_patterns(&t, &meta, "age_group", &genes, &PatternConfig::default()).unwrap();
        assert_eq!(res.groups, vec!["young", "middle", "old"]);
        assert_eq!(res.profiles.len(), 2);
        for traj in &res.trajectories {
            assert_eq!(traj.values.len(), 3);
            assert!(traj.values.iter().all(|v| v.is_finite()), "{}", traj.gene_id);
        }
        for profile in &res.profiles {
            assert!(profile.mean.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_too_few_genes() {
        let (t, meta, genes) = toy(1);
        assert!(cluster_patterns(&t, &meta, "age_group", &genes, &PatternConfig::default()).is_err());
    }
}
