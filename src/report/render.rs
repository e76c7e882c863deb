//! SVG rendering of volcano, enrichment and trajectory panels.

use crate::data::Direction;
use crate::error::{FameError, Result};
use crate::report::points::{EnrichmentDot, TrajectorySeries, VolcanoPoint};
use plotters::coord::Shift;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const GREY: RGBColor = RGBColor(170, 170, 170);
const UP: RGBColor = RGBColor(200, 40, 40);
const DOWN: RGBColor = RGBColor(40, 80, 200);

/// One chart of a figure.
#[derive(Debug, Clone)]
pub enum Panel {
    Volcano {
        title: String,
        points: Vec<VolcanoPoint>,
        alpha: f64,
        /// Vertical guides at `±lfc_threshold`.
        lfc_threshold: f64,
    },
    EnrichmentDots {
        title: String,
        dots: Vec<EnrichmentDot>,
    },
    Trajectories {
        series: TrajectorySeries,
    },
}

/// Grid of panels, filled row by row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub rows: usize,
    pub cols: usize,
}

impl Layout {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Smallest near-square grid holding `n` panels.
    pub fn for_panels(n: usize) -> Self {
        let cols = (n as f64).sqrt().ceil().max(1.0) as usize;
        let rows = n.div_ceil(cols).max(1);
        Self { rows, cols }
    }

    pub fn capacity(&self) -> usize {
        self.rows * self.cols
    }
}

/// Draws figures as SVG files. Inputs are never modified.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    pub panel_width: u32,
    pub panel_height: u32,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            panel_width: 640,
            panel_height: 480,
        }
    }
}

fn render_err<E: std::fmt::Display>(e: E) -> FameError {
    FameError::Render(e.to_string())
}

impl Renderer {
    /// Draw a single panel.
    pub fn render<P: AsRef<Path>>(&self, panel: &Panel, path: P) -> Result<()> {
        self.render_figure(Layout::new(1, 1), std::slice::from_ref(panel), path)
    }

    /// Draw `panels` into a `layout` grid.
    pub fn render_figure<P: AsRef<Path>>(
        &self,
        layout: Layout,
        panels: &[Panel],
        path: P,
    ) -> Result<()> {
        if layout.capacity() == 0 || panels.len() > layout.capacity() {
            return Err(FameError::InvalidParameter(format!(
                "{} panels do not fit a {}x{} layout",
                panels.len(),
                layout.rows,
                layout.cols
            )));
        }
        let path = path.as_ref();
        let size = (
            self.panel_width * layout.cols as u32,
            self.panel_height * layout.rows as u32,
        );
        let root = SVGBackend::new(path, size).into_drawing_area();
        root.fill(&WHITE).map_err(render_err)?;
        let areas = root.split_evenly((layout.rows, layout.cols));
        for (area, panel) in areas.iter().zip(panels) {
            match panel {
                Panel::Volcano {
                    title,
                    points,
                    alpha,
                    lfc_threshold,
                } => draw_volcano(area, title, points, *alpha, *lfc_threshold)?,
                Panel::EnrichmentDots { title, dots } => draw_dots(area, title, dots)?,
                Panel::Trajectories { series } => draw_trajectories(area, series)?,
            }
        }
        root.present().map_err(render_err)?;
        info!(path = %path.display(), panels = panels.len(), "figure written");
        Ok(())
    }
}

fn padded(lo: f64, hi: f64) -> (f64, f64) {
    if !(lo.is_finite() && hi.is_finite()) {
        return (0.0, 1.0);
    }
    let pad = ((hi - lo) * 0.05).max(0.1);
    (lo - pad, hi + pad)
}

fn draw_volcano<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    title: &str,
    points: &[VolcanoPoint],
    alpha: f64,
    lfc_threshold: f64,
) -> Result<()> {
    let x_max = points
        .iter()
        .map(|p| p.log2_fold_change.abs())
        .fold(lfc_threshold, f64::max);
    let cutoff = -alpha.log10();
    let y_max = points
        .iter()
        .map(|p| p.neg_log10_padj)
        .fold(cutoff, f64::max);
    let (x_lo, x_hi) = padded(-x_max, x_max);
    let (_, y_hi) = padded(0.0, y_max);

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_lo..x_hi, 0.0..y_hi)
        .map_err(render_err)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("log2 fold change")
        .y_desc("-log10(adjusted p)")
        .draw()
        .map_err(render_err)?;

    for (direction, color) in [
        (Direction::NotSignificant, GREY),
        (Direction::Down, DOWN),
        (Direction::Up, UP),
    ] {
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.direction == direction)
                    .map(|p| Circle::new((p.log2_fold_change, p.neg_log10_padj), 2, color.filled())),
            )
            .map_err(render_err)?
            .label(direction.name())
            .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
    }

    let guide = BLACK.mix(0.4).stroke_width(1);
    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(x_lo, cutoff), (x_hi, cutoff)],
            guide,
        )))
        .map_err(render_err)?;
    for x in [-lfc_threshold, lfc_threshold] {
        chart
            .draw_series(std::iter::once(PathElement::new(vec![(x, 0.0), (x, y_hi)], guide)))
            .map_err(render_err)?;
    }
    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(WHITE.mix(0.8))
        .draw()
        .map_err(render_err)?;
    Ok(())
}

/// Red for small adjusted p-values, blue for large, on a log scale.
fn padj_color(p_adjusted: f64) -> RGBColor {
    let t = (-p_adjusted.max(1e-10).log10() / 10.0).clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    RGBColor(mix(DOWN.0, UP.0), mix(DOWN.1, UP.1), mix(DOWN.2, UP.2))
}

fn draw_dots<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    title: &str,
    dots: &[EnrichmentDot],
) -> Result<()> {
    let n = dots.len().max(1);
    let x_max = dots.iter().map(|d| d.gene_ratio).fold(0.0, f64::max);
    let (_, x_hi) = padded(0.0, x_max);
    let max_count = dots.iter().map(|d| d.count).max().unwrap_or(1).max(1) as f64;
    let terms: Vec<String> = dots.iter().map(|d| d.term.clone()).collect();

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(220)
        .build_cartesian_2d(0.0..x_hi, -0.5..(n as f64 - 0.5))
        .map_err(render_err)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .y_labels(n)
        .y_label_formatter(&|y: &f64| {
            let idx = y.round();
            if (y - idx).abs() < 1e-6 && idx >= 0.0 {
                // Most significant term on top
                terms
                    .len()
                    .checked_sub(1 + idx as usize)
                    .and_then(|i| terms.get(i))
                    .cloned()
                    .unwrap_or_default()
            } else {
                String::new()
            }
        })
        .x_desc("gene ratio")
        .draw()
        .map_err(render_err)?;

    chart
        .draw_series(dots.iter().enumerate().map(|(i, d)| {
            let y = (dots.len() - 1 - i) as f64;
            let radius = 3.0 + 9.0 * d.count as f64 / max_count;
            Circle::new((d.gene_ratio, y), radius as u32, padj_color(d.p_adjusted).filled())
        }))
        .map_err(render_err)?;
    Ok(())
}

fn draw_trajectories<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    series: &TrajectorySeries,
) -> Result<()> {
    let n_groups = series.groups.len().max(1);
    let (y_lo, y_hi) = padded(
        series.genes.iter().flatten().copied().fold(f64::INFINITY, f64::min).min(-1.0),
        series.genes.iter().flatten().copied().fold(f64::NEG_INFINITY, f64::max).max(1.0),
    );
    let groups = &series.groups;

    let mut chart = ChartBuilder::on(area)
        .caption(series.title(), ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.2..(n_groups as f64 - 0.8), y_lo..y_hi)
        .map_err(render_err)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(n_groups)
        .x_label_formatter(&|x: &f64| {
            let idx = x.round();
            if (x - idx).abs() < 1e-6 && idx >= 0.0 {
                groups.get(idx as usize).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        })
        .y_desc("z-score")
        .draw()
        .map_err(render_err)?;

    for gene in &series.genes {
        chart
            .draw_series(LineSeries::new(
                gene.iter().enumerate().map(|(i, &v)| (i as f64, v)),
                GREY.mix(0.4),
            ))
            .map_err(render_err)?;
    }
    chart
        .draw_series(LineSeries::new(
            series.mean.iter().enumerate().map(|(i, &v)| (i as f64, v)),
            UP.stroke_width(3),
        ))
        .map_err(render_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn volcano() -> Panel {
        Panel::Volcano {
            title: "menopause".into(),
            points: vec![
                VolcanoPoint {
                    gene_id: "g1".into(),
                    label: "ESR1".into(),
                    log2_fold_change: 2.0,
                    neg_log10_padj: 4.0,
                    direction: Direction::Up,
                },
                VolcanoPoint {
                    gene_id: "g2".into(),
                    label: "g2".into(),
                    log2_fold_change: -0.2,
                    neg_log10_padj: 0.1,
                    direction: Direction::NotSignificant,
                },
            ],
            alpha: 0.05,
            lfc_threshold: 1.0,
        }
    }

    #[test]
    fn test_layout_for_panels() {
        assert_eq!(Layout::for_panels(1), Layout::new(1, 1));
        assert_eq!(Layout::for_panels(3), Layout::new(2, 2));
        assert_eq!(Layout::for_panels(5), Layout::new(2, 3));
    }

    #[test]
    fn test_multi_panel_svg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("figure.svg");
        let panels = vec![
            volcano(),
            Panel::EnrichmentDots {
                title: "GO".into(),
                dots: vec![EnrichmentDot {
                    term: "inflammatory response".into(),
                    gene_ratio: 0.2,
                    count: 8,
                    p_adjusted: 1e-4,
                }],
            },
            Panel::Trajectories {
                series: TrajectorySeries {
                    cluster: 1,
                    groups: vec!["young".into(), "middle".into(), "old".into()],
                    mean: vec![-1.2, 0.0, 1.2],
                    genes: vec![vec![-1.0, -0.2, 1.2], vec![-1.3, 0.2, 1.1]],
                },
            },
        ];
        Renderer::default()
            .render_figure(Layout::new(1, 3), &panels, &path)
            .unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("menopause"));
    }

    #[test]
    fn test_too_many_panels() {
        let dir = tempdir().unwrap();
        let panels = vec![volcano(), volcano()];
        let err = Renderer::default()
            .render_figure(Layout::new(1, 1), &panels, dir.path().join("x.svg"))
            .unwrap_err();
        assert!(matches!(err, FameError::InvalidParameter(_)));
    }
}
