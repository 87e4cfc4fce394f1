//! Ordered sketch points.

use af_core::Point2;
use serde::{Deserialize, Serialize};

/// Points closer than this are treated as the same click.
pub const COINCIDENT_TOL: f64 = 1e-9;

/// Clicked points in traversal order. The loop closes from the last point
/// back to the first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointSet {
    points: Vec<Point2>,
}

impl PointSet {
    pub fn new(points: Vec<Point2>) -> Self {
        Self { points }
    }

    pub fn from_xy(coords: &[(f64, f64)]) -> Self {
        Self::new(coords.iter().copied().map(Point2::from).collect())
    }

    pub fn push(&mut self, point: Point2) {
        self.points.push(point);
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    /// Copy with consecutive duplicates removed, including a final point that
    /// repeats the first one.
    pub fn deduplicated(&self) -> Vec<Point2> {
        let mut out: Vec<Point2> = Vec::with_capacity(self.points.len());
        for &p in &self.points {
            match out.last() {
                Some(&last) if last.distance(p) <= COINCIDENT_TOL => {}
                _ => out.push(p),
            }
        }
        while out.len() > 1 && out[0].distance(out[out.len() - 1]) <= COINCIDENT_TOL {
            out.pop();
        }
        out
    }

    /// Number of distinct positions, wherever they occur in the sequence.
    pub fn distinct_len(&self) -> usize {
        let mut seen: Vec<Point2> = Vec::new();
        for &p in &self.points {
            if !seen.iter().any(|q| q.distance(p) <= COINCIDENT_TOL) {
                seen.push(p);
            }
        }
        seen.len()
    }
}

impl FromIterator<Point2> for PointSet {
    fn from_iter<I: IntoIterator<Item = Point2>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
