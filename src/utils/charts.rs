//! Plot side channel for adaptation runs
//!
//! SVG line charts of the per-step history and PNG preview grids of accepted
//! pseudo-labeled images. Nothing here feeds back into training.

use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};

use crate::dataset::ImageSet;
use crate::utils::error::{AdaptationError, Result};

/// Chart styling constants
const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

pub const COLOR_PRIMARY: &str = "#3498db";
pub const COLOR_SECONDARY: &str = "#2ecc71";
pub const COLOR_TERTIARY: &str = "#e74c3c";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// Upscale factor for preview tiles (28px digits are tiny)
const PREVIEW_SCALE: u32 = 4;
/// Pixels between preview tiles
const PREVIEW_GAP: u32 = 4;

/// A data point for a line chart
#[derive(Debug, Clone)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
    pub label: Option<String>,
}

/// A data series for charts
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<DataPoint>,
    pub color: String,
}

/// Generate a line chart SVG with a percentage Y axis
pub fn generate_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[DataSeries],
    output_path: &Path,
) -> std::io::Result<()> {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (x_min, x_max, _, y_max) = find_ranges(series);
    // A single step would otherwise collapse the x scale
    let x_span = if x_max > x_min { x_max - x_min } else { 1.0 };
    let y_min = 0.0;
    let y_max = 100.0_f64.max(y_max);

    let to_x = |x: f64| MARGIN_LEFT + ((x - x_min) / x_span) * plot_width;
    let to_y = |y: f64| MARGIN_TOP + plot_height - ((y - y_min) / (y_max - y_min)) * plot_height;

    let mut svg = String::new();

    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
        CHART_WIDTH, CHART_HEIGHT, CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2.0, COLOR_TEXT, escape_xml(title)
    ));

    // Grid lines
    for i in 0..=5 {
        let y = MARGIN_TOP + plot_height - (i as f64 / 5.0) * plot_height;
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);

        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT, y, MARGIN_LEFT + plot_width, y, COLOR_GRID
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{:.0}%</text>"#,
            MARGIN_LEFT - 10.0, y + 4.0, COLOR_TEXT, value
        ));
    }

    // Axes
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP + plot_height, MARGIN_LEFT + plot_width, MARGIN_TOP + plot_height, COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP, MARGIN_LEFT, MARGIN_TOP + plot_height, COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0, CHART_HEIGHT - 20.0, COLOR_TEXT, escape_xml(x_label)
    ));
    svg.push_str(&format!(
        r#"<text x="20" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        CHART_HEIGHT / 2.0, COLOR_TEXT, CHART_HEIGHT / 2.0, escape_xml(y_label)
    ));

    for series_data in series {
        if series_data.points.is_empty() {
            continue;
        }

        let mut path = String::new();
        for (i, point) in series_data.points.iter().enumerate() {
            let cmd = if i == 0 { "M" } else { " L" };
            path.push_str(&format!("{} {} {}", cmd, to_x(point.x), to_y(point.y)));
        }

        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
            path, series_data.color
        ));

        for point in &series_data.points {
            let (x, y) = (to_x(point.x), to_y(point.y));
            svg.push_str(&format!(
                r#"<circle cx="{}" cy="{}" r="4" fill="{}" stroke="white" stroke-width="2"/>"#,
                x, y, series_data.color
            ));

            if let Some(label) = &point.label {
                svg.push_str(&format!(
                    r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="10" fill="{}">{}</text>"#,
                    x, y - 12.0, COLOR_TEXT, escape_xml(label)
                ));
            }
        }
    }

    // X-axis tick labels from the first series
    if let Some(first) = series.first() {
        for point in &first.points {
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{:.0}</text>"#,
                to_x(point.x), MARGIN_TOP + plot_height + 20.0, COLOR_TEXT, point.x
            ));
        }
    }

    // Legend
    let mut legend_y = MARGIN_TOP + 10.0;
    for series_data in series {
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 160.0, legend_y, series_data.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 140.0, legend_y + 12.0, COLOR_TEXT, escape_xml(&series_data.name)
        ));
        legend_y += 25.0;
    }

    svg.push_str("</svg>");

    fs::write(output_path, svg)
}

/// Write a grid of images as a PNG, each tile rescaled to the full 0..255 range.
///
/// `indices` picks the images to show; the grid has `cols` columns.
pub fn save_preview_grid(
    images: &ImageSet,
    indices: &[usize],
    cols: usize,
    output_path: &Path,
) -> Result<()> {
    if indices.is_empty() || cols == 0 {
        return Ok(());
    }

    let (c, h, w) = (images.channels(), images.height(), images.width());
    let rows = (indices.len() + cols - 1) / cols;
    let tile_w = w as u32 * PREVIEW_SCALE;
    let tile_h = h as u32 * PREVIEW_SCALE;
    let width = cols as u32 * (tile_w + PREVIEW_GAP) + PREVIEW_GAP;
    let height = rows as u32 * (tile_h + PREVIEW_GAP) + PREVIEW_GAP;

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));

    for (slot, &idx) in indices.iter().enumerate() {
        let pixels = images.image(idx);
        let (lo, hi) = pixels
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let span = if hi > lo { hi - lo } else { 1.0 };

        let x0 = PREVIEW_GAP + (slot % cols) as u32 * (tile_w + PREVIEW_GAP);
        let y0 = PREVIEW_GAP + (slot / cols) as u32 * (tile_h + PREVIEW_GAP);

        for y in 0..h {
            for x in 0..w {
                let mut rgb = [0u8; 3];
                for (ch, out) in rgb.iter_mut().enumerate() {
                    // Grey images repeat their single channel
                    let plane = ch.min(c - 1);
                    let v = pixels[plane * h * w + y * w + x];
                    *out = (((v - lo) / span) * 255.0).round() as u8;
                }
                for dy in 0..PREVIEW_SCALE {
                    for dx in 0..PREVIEW_SCALE {
                        canvas.put_pixel(
                            x0 + x as u32 * PREVIEW_SCALE + dx,
                            y0 + y as u32 * PREVIEW_SCALE + dy,
                            Rgb(rgb),
                        );
                    }
                }
            }
        }
    }

    canvas
        .save(output_path)
        .map_err(|e| AdaptationError::Serialization(format!("Failed to write preview: {}", e)))
}

fn find_ranges(series: &[DataSeries]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for s in series {
        for p in &s.points {
            x_min = x_min.min(p.x);
            x_max = x_max.max(p.x);
            y_min = y_min.min(p.y);
            y_max = y_max.max(p.y);
        }
    }

    (x_min, x_max, y_min, y_max)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_line_chart_generation() {
        let series = vec![DataSeries {
            name: "Validation accuracy".to_string(),
            points: vec![
                DataPoint { x: 1.0, y: 56.2, label: None },
                DataPoint { x: 2.0, y: 61.8, label: Some("61.8%".to_string()) },
                DataPoint { x: 3.0, y: 65.8, label: None },
            ],
            color: COLOR_PRIMARY.to_string(),
        }];

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chart.svg");
        generate_line_chart("Adaptation", "Step", "Accuracy", &series, &path).unwrap();

        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Validation accuracy"));
    }

    #[test]
    fn test_single_point_chart() {
        let series = vec![DataSeries {
            name: "One".to_string(),
            points: vec![DataPoint { x: 1.0, y: 50.0, label: None }],
            color: COLOR_SECONDARY.to_string(),
        }];

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.svg");
        generate_line_chart("One step", "Step", "Accuracy", &series, &path).unwrap();
        assert!(!fs::read_to_string(&path).unwrap().contains("NaN"));
    }

    #[test]
    fn test_preview_grid() {
        let images = ImageSet::new(vec![0.5; 4 * 3 * 2 * 2], 4, 3, 2, 2).unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grid.png");

        save_preview_grid(&images, &[0, 1, 2, 3], 2, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b & c>"), "a&lt;b &amp; c&gt;");
    }
}
