//! Functional enrichment of differential expression results.
//!
//! - [`ora`]: hypergeometric over-representation of a query list
//! - [`gsea_preranked`]: running-sum enrichment of a ranked list
//! - [`read_external_enrichment`]: motif enrichment tables computed elsewhere

pub mod external;
pub mod gene_set;
pub mod gsea;
pub mod ora;

pub use external::{read_external_enrichment, ExternalEnrichment};
pub use gene_set::{GeneSet, GeneSetCollection};
pub use gsea::{
    gsea_preranked, ranking_from_results, GseaConfig, GseaReport, GseaResult, RankMetric,
    RankedGenes,
};
pub use ora::{ora, OraConfig, OraReport, OraResult};
