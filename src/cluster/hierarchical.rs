//! Average-linkage agglomerative clustering on a precomputed distance
//! matrix, and silhouette widths for a flat cut.

use crate::error::{FameError, Result};

/// Symmetric distance matrix stored densely.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f64>,
}

impl DistanceMatrix {
    /// Build from a pairwise distance function.
    pub fn from_fn<F: Fn(usize, usize) -> f64>(n: usize, dist: F) -> Self {
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = dist(i, j);
                data[i * n + j] = d;
                data[j * n + i] = d;
            }
        }
        Self { n, data }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    fn set(&mut self, i: usize, j: usize, d: f64) {
        self.data[i * self.n + j] = d;
        self.data[j * self.n + i] = d;
    }
}

/// One agglomeration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeStep {
    pub cluster_a: usize,
    pub cluster_b: usize,
    pub distance: f64,
    /// Size of the merged cluster.
    pub size: usize,
}

/// Full average-linkage dendrogram, merges sorted by distance.
#[derive(Debug, Clone)]
pub struct Dendrogram {
    n: usize,
    merges: Vec<MergeStep>,
}

impl Dendrogram {
    /// Agglomerate all points with the nearest-neighbour chain algorithm.
    pub fn average_linkage(distances: &DistanceMatrix) -> Result<Self> {
        let n = distances.n();
        if n == 0 {
            return Err(FameError::EmptyData("no points to cluster".to_string()));
        }
        let mut dist = distances.clone();
        let mut size = vec![1usize; n];
        let mut active = vec![true; n];
        let mut n_active = n;
        let mut chain: Vec<usize> = Vec::with_capacity(n);
        let mut merges = Vec::with_capacity(n.saturating_sub(1));

        while n_active > 1 {
            if chain.is_empty() {
                if let Some(first) = active.iter().position(|&a| a) {
                    chain.push(first);
                }
            }
            let (a, b, d) = loop {
                let a = chain[chain.len() - 1];
                let prev = chain.len().checked_sub(2).map(|i| chain[i]);
                let mut best = prev;
                let mut best_d = prev.map_or(f64::INFINITY, |p| dist.get(a, p));
                for c in (0..n).filter(|&c| active[c] && c != a) {
                    let d = dist.get(a, c);
                    if d < best_d {
                        best_d = d;
                        best = Some(c);
                    }
                }
                let Some(b) = best else {
                    return Err(FameError::Numerical("no merge candidate".to_string()));
                };
                if Some(b) == prev {
                    chain.truncate(chain.len() - 2);
                    break (a.min(b), a.max(b), best_d);
                }
                chain.push(b);
            };

            // Lance-Williams update for average linkage, b merged into a
            let (sa, sb) = (size[a] as f64, size[b] as f64);
            for c in (0..n).filter(|&c| active[c] && c != a && c != b) {
                let new_d = (dist.get(a, c) * sa + dist.get(b, c) * sb) / (sa + sb);
                dist.set(a, c, new_d);
            }
            size[a] += size[b];
            active[b] = false;
            n_active -= 1;
            merges.push(MergeStep {
                cluster_a: a,
                cluster_b: b,
                distance: d,
                size: size[a],
            });
        }

        merges.sort_by(|x, y| x.distance.total_cmp(&y.distance));
        Ok(Self { n, merges })
    }

    pub fn merges(&self) -> &[MergeStep] {
        &self.merges
    }

    /// Flat cut into `k` clusters. Labels are `0..k` in order of first appearance.
    pub fn cut(&self, k: usize) -> Result<Vec<usize>> {
        if k == 0 || k > self.n {
            return Err(FameError::InvalidParameter(format!(
                "cannot cut {} points into {} clusters",
                self.n, k
            )));
        }
        let mut parent: Vec<usize> = (0..self.n).collect();
        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }
        for m in &self.merges[..self.n - k] {
            let ra = find(&mut parent, m.cluster_a);
            let rb = find(&mut parent, m.cluster_b);
            parent[rb] = ra;
        }

        let mut label_of_root = vec![usize::MAX; self.n];
        let mut next = 0;
        let mut labels = Vec::with_capacity(self.n);
        for i in 0..self.n {
            let r = find(&mut parent, i);
            if label_of_root[r] == usize::MAX {
                label_of_root[r] = next;
                next += 1;
            }
            labels.push(label_of_root[r]);
        }
        Ok(labels)
    }
}

/// Silhouette width of every point. Points in singleton clusters score 0.
pub fn silhouette_samples(distances: &DistanceMatrix, labels: &[usize]) -> Result<Vec<f64>> {
    let n = distances.n();
    if labels.len() != n {
        return Err(FameError::DimensionMismatch {
            expected: n,
            actual: labels.len(),
        });
    }
    let k = labels.iter().copied().max().map_or(0, |m| m + 1);
    if k < 2 {
        return Err(FameError::InvalidParameter(
            "silhouette needs at least 2 clusters".to_string(),
        ));
    }
    let mut sizes = vec![0usize; k];
    for &l in labels {
        sizes[l] += 1;
    }

    Ok((0..n)
        .map(|i| {
            let own = labels[i];
            if sizes[own] < 2 {
                return 0.0;
            }
            let mut sums = vec![0.0; k];
            for j in (0..n).filter(|&j| j != i) {
                sums[labels[j]] += distances.get(i, j);
            }
            let a = sums[own] / (sizes[own] - 1) as f64;
            let b = (0..k)
                .filter(|&c| c != own && sizes[c] > 0)
                .map(|c| sums[c] / sizes[c] as f64)
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if denom > 0.0 {
                (b - a) / denom
            } else {
                0.0
            }
        })
        .collect())
}

/// Mean silhouette width.
pub fn silhouette_score(distances: &DistanceMatrix, labels: &[usize]) -> Result<f64> {
    let s = silhouette_samples(distances, labels)?;
    Ok(s.iter().sum::<f64>() / s.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(points: &[f64]) -> DistanceMatrix {
        DistanceMatrix::from_fn(points.len(), |i, j| (points[i] - points[j]).abs())
    }

    #[test]
    fn test_two_groups_on_a_line() {
        let d = line(&[0.0, 0.1, 0.2, 5.0, 5.1, 5.3]);
        let tree = Dendrogram::average_linkage(&d).unwrap();
        assert_eq!(tree.merges().len(), 5);
        let labels = tree.cut(2).unwrap();
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1]);
        assert!(silhouette_score(&d, &labels).unwrap() > 0.9);
    }

    #[test]
    fn test_average_linkage_distance() {
        // {0, 1} merge first; then 4 joins at mean distance (4 + 3) / 2
        let d = line(&[0.0, 1.0, 4.0]);
        let tree = Dendrogram::average_linkage(&d).unwrap();
        assert_relative_eq!(tree.merges()[0].distance, 1.0);
        assert_relative_eq!(tree.merges()[1].distance, 3.5);
        assert_eq!(tree.merges()[1].size, 3);
    }

    #[test]
    fn test_cut_extremes() {
        let d = line(&[0.0, 1.0, 3.0, 7.0]);
        let tree = Dendrogram::average_linkage(&d).unwrap();
        assert_eq!(tree.cut(1).unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(tree.cut(4).unwrap(), vec![0, 1, 2, 3]);
        assert!(tree.cut(5).is_err());
    }

    #[test]
    fn test_silhouette_known_value() {
        // a = 1, b = mean(4, 5) = 4.5 for point 0
        let d = line(&[0.0, 1.0, 4.0, 5.0]);
        let s = silhouette_samples(&d, &[0, 0, 1, 1]).unwrap();
        assert_relative_eq!(s[0], (4.5 - 1.0) / 4.5, epsilon = 1e-12);
        assert!(silhouette_samples(&d, &[0, 0, 0, 0]).is_err());
    }
}
