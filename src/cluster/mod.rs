//! Clustering of gene expression trajectories over ordered groups.

pub mod hierarchical;
pub mod patterns;

pub use hierarchical::{silhouette_samples, silhouette_score, Dendrogram, DistanceMatrix, MergeStep};
pub use patterns::{
    cluster_patterns, correlation_distance, zscore, ClusterAssignment, ClusterProfile,
    PatternClusters, PatternConfig, Trajectory,
};
