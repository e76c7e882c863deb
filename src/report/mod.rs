//! Figures and plot-ready tables. Read-only consumers of analysis results.

pub mod points;
pub mod render;

pub use points::{
    enrichment_dots, gsea_dots, trajectory_series, volcano_points, EnrichmentDot,
    TrajectorySeries, VolcanoPoint,
};
pub use render::{Layout, Panel, Renderer};
