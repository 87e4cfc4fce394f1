//! Curve builder: clicked points to a validated closed airfoil polyline.

use af_core::Point2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GeometryError, GeometryResult};
use crate::pointset::PointSet;
use crate::polygon;
use crate::spline::PeriodicSpline;

pub const DEFAULT_SAMPLES: usize = 500;
pub const MIN_SAMPLES: usize = 16;
pub const MAX_SAMPLES: usize = 5000;

/// Sampling and acceptance settings for [`build_with`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveOptions {
    /// Number of distinct samples along the closed curve.
    pub samples: usize,
    /// Smallest accepted enclosed area.
    pub min_area: f64,
}

impl Default for CurveOptions {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SAMPLES,
            min_area: 1e-6,
        }
    }
}

/// Outcome of the geometric sanity checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveValidity {
    pub self_intersection_free: bool,
    pub area: f64,
    pub min_area: f64,
}

impl CurveValidity {
    pub fn is_valid(&self) -> bool {
        self.self_intersection_free && self.area > 0.0 && self.area >= self.min_area
    }
}

/// Smoothed closed curve. The polyline is counter-clockwise and its last
/// point equals its first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirfoilCurve {
    polyline: Vec<Point2>,
    validity: CurveValidity,
}

impl AirfoilCurve {
    pub fn polyline(&self) -> &[Point2] {
        &self.polyline
    }

    /// Polyline without the closing duplicate.
    pub fn ring(&self) -> &[Point2] {
        &self.polyline[..self.polyline.len() - 1]
    }

    pub fn validity(&self) -> CurveValidity {
        self.validity
    }

    pub fn is_valid(&self) -> bool {
        self.validity.is_valid()
    }

    pub fn area(&self) -> f64 {
        self.validity.area
    }

    /// `(min, max)` corners of the bounding box.
    pub fn bounds(&self) -> (Point2, Point2) {
        let mut lo = Point2::new(f64::INFINITY, f64::INFINITY);
        let mut hi = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in &self.polyline {
            lo.x = lo.x.min(p.x);
            lo.y = lo.y.min(p.y);
            hi.x = hi.x.max(p.x);
            hi.y = hi.y.max(p.y);
        }
        (lo, hi)
    }

    /// Streamwise extent, used as the reference length.
    pub fn chord(&self) -> f64 {
        let (lo, hi) = self.bounds();
        hi.x - lo.x
    }

    /// Tab-separated `x y` lines with six decimals.
    pub fn to_coordinate_text(&self) -> String {
        let mut out = String::with_capacity(self.polyline.len() * 24);
        for p in &self.polyline {
            out.push_str(&format!("{:.6}\t{:.6}\n", p.x, p.y));
        }
        out
    }
}

/// Fit and sample the spline without rejecting invalid shapes. The returned
/// curve carries its validity so callers can still display it.
pub fn fit(points: &PointSet, options: &CurveOptions) -> GeometryResult<AirfoilCurve> {
    let distinct = points.distinct_len();
    if distinct < 3 {
        return Err(GeometryError::InsufficientPoints { found: distinct });
    }
    if let Some(bad) = points.points().iter().find(|p| !p.is_finite()) {
        return Err(GeometryError::invalid(format!(
            "non-finite point ({}, {})",
            bad.x, bad.y
        )));
    }
    if !(MIN_SAMPLES..=MAX_SAMPLES).contains(&options.samples) {
        return Err(GeometryError::invalid(format!(
            "sample count {} outside {}..={}",
            options.samples, MIN_SAMPLES, MAX_SAMPLES
        )));
    }

    let data = points.deduplicated();
    let spline = PeriodicSpline::interpolate(&data)?;
    let mut polyline = spline.sample_closed(options.samples);

    let mut area = polygon::signed_area(&polyline[..polyline.len() - 1]);
    if area < 0.0 {
        polyline.reverse();
        area = -area;
    }

    let self_intersection_free =
        polygon::find_self_intersection(&polyline[..polyline.len() - 1]).is_none();

    debug!(
        clicks = points.len(),
        samples = options.samples,
        area,
        self_intersection_free,
        "fitted airfoil curve"
    );

    Ok(AirfoilCurve {
        polyline,
        validity: CurveValidity {
            self_intersection_free,
            area,
            min_area: options.min_area,
        },
    })
}

/// Build with default options.
pub fn build(points: &PointSet) -> GeometryResult<AirfoilCurve> {
    build_with(points, &CurveOptions::default())
}

/// Fit, sample and validate.
pub fn build_with(points: &PointSet, options: &CurveOptions) -> GeometryResult<AirfoilCurve> {
    let curve = fit(points, options)?;
    let v = curve.validity();
    if v.area <= 0.0 || v.area < v.min_area {
        return Err(GeometryError::invalid(format!(
            "enclosed area {:.3e} is below the minimum {:.3e} (points collinear or degenerate)",
            v.area, v.min_area
        )));
    }
    if !v.self_intersection_free {
        return Err(GeometryError::invalid("the interpolated curve crosses itself"));
    }
    Ok(curve)
}
