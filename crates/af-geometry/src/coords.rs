//! Flat coordinate files and canvas-to-design coordinate mapping.

use std::fs;
use std::path::Path;

use af_core::Point2;

use crate::error::{GeometryError, GeometryResult};
use crate::pointset::PointSet;

/// Save points as `x<TAB>y` lines with six decimals.
pub fn save_points(path: &Path, points: &PointSet) -> GeometryResult<()> {
    let mut out = String::with_capacity(points.len() * 24);
    for p in points.points() {
        out.push_str(&format!("{:.6}\t{:.6}\n", p.x, p.y));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, out)?;
    Ok(())
}

/// Load points written by [`save_points`] or any two-column text file.
/// Columns may be separated by tabs, commas or spaces; blank lines and `#`
/// comments are skipped.
pub fn load_points(path: &Path) -> GeometryResult<PointSet> {
    let content = fs::read_to_string(path)?;
    parse_points(&content)
}

pub fn parse_points(content: &str) -> GeometryResult<PointSet> {
    let mut points = PointSet::default();
    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .collect();
        if fields.len() != 2 {
            return Err(GeometryError::Parse {
                line: lineno + 1,
                message: format!("expected 2 columns, found {}", fields.len()),
            });
        }
        let parse = |s: &str| {
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| GeometryError::Parse {
                    line: lineno + 1,
                    message: format!("'{s}' is not a finite number"),
                })
        };
        points.push(Point2::new(parse(fields[0])?, parse(fields[1])?));
    }
    Ok(points)
}

/// Maps pixel clicks on a canvas into the design coordinate range. Pixel y
/// grows downward, design y grows upward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasMapping {
    pub width_px: f64,
    pub height_px: f64,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Default for CanvasMapping {
    fn default() -> Self {
        Self {
            width_px: 600.0,
            height_px: 600.0,
            x_min: 0.0,
            x_max: 1.0,
            y_min: -0.5,
            y_max: 0.5,
        }
    }
}

impl CanvasMapping {
    pub fn to_design(&self, px: f64, py: f64) -> Point2 {
        Point2::new(
            self.x_min + (px / self.width_px) * (self.x_max - self.x_min),
            self.y_min + (1.0 - py / self.height_px) * (self.y_max - self.y_min),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_keeps_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("design").join("airfoil_coordinates.txt");
        let pts = PointSet::from_xy(&[(0.0, 0.0), (0.5, 0.1), (1.0, 0.0), (0.5, -0.05)]);
        save_points(&path, &pts).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next(), Some("0.000000\t0.000000"));
        assert_eq!(load_points(&path).unwrap(), pts);
    }

    #[test]
    fn loader_accepts_mixed_separators_and_comments() {
        let pts = parse_points("# x y\n0 0\n1.5,0.25\n\n 2\t-1 # tail\n").unwrap();
        assert_eq!(pts.len(), 3);
        assert_eq!(pts.points()[1], Point2::new(1.5, 0.25));
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let err = parse_points("0 0\n1 2 3\n").unwrap_err();
        assert!(matches!(err, GeometryError::Parse { line: 2, .. }));
        let err = parse_points("0 nan\n").unwrap_err();
        assert!(matches!(err, GeometryError::Parse { line: 1, .. }));
    }

    #[test]
    fn canvas_corners_map_to_design_range() {
        let map = CanvasMapping::default();
        assert_eq!(map.to_design(0.0, 0.0), Point2::new(0.0, 0.5));
        assert_eq!(map.to_design(600.0, 600.0), Point2::new(1.0, -0.5));
        assert_eq!(map.to_design(300.0, 300.0), Point2::new(0.5, 0.0));
    }
}
