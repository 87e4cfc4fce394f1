//! Geometry exporter: extrude a curve into a closed triangulated slab.

use af_core::{Point2, Point3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::curve::AirfoilCurve;
use crate::error::{GeometryError, GeometryResult};
use crate::polygon;
use crate::surface::TriSurface;

/// Rectangular flow domain in the sketch plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainBounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Default for DomainBounds {
    fn default() -> Self {
        Self {
            x_min: -5.0,
            x_max: 10.0,
            y_min: -5.0,
            y_max: 5.0,
        }
    }
}

impl DomainBounds {
    pub fn is_well_formed(&self) -> bool {
        [self.x_min, self.x_max, self.y_min, self.y_max]
            .iter()
            .all(|v| v.is_finite())
            && self.x_min < self.x_max
            && self.y_min < self.y_max
    }

    /// Strict containment.
    pub fn contains(&self, p: Point2) -> bool {
        p.x > self.x_min && p.x < self.x_max && p.y > self.y_min && p.y < self.y_max
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }
}

/// Extruded airfoil: a closed outward surface plus the extrusion settings
/// it was made with.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshAsset {
    surface: TriSurface,
    depth: f64,
    domain: DomainBounds,
}

impl MeshAsset {
    /// Wrap a surface, checking closure and orientation.
    pub fn new(surface: TriSurface, depth: f64, domain: DomainBounds) -> GeometryResult<Self> {
        surface.check_closed_outward()?;
        Ok(Self {
            surface,
            depth,
            domain,
        })
    }

    pub fn surface(&self) -> &TriSurface {
        &self.surface
    }

    pub fn vertices(&self) -> &[Point3] {
        self.surface.vertices()
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        self.surface.triangles()
    }

    pub fn depth(&self) -> f64 {
        self.depth
    }

    pub fn domain(&self) -> DomainBounds {
        self.domain
    }
}

/// Extrude `curve` along +z by `depth` inside `domain`.
pub fn export(curve: &AirfoilCurve, depth: f64, domain: DomainBounds) -> GeometryResult<MeshAsset> {
    if !(depth.is_finite() && depth > 0.0) {
        return Err(GeometryError::invalid(format!(
            "extrusion depth must be positive, got {depth}"
        )));
    }
    if !domain.is_well_formed() {
        return Err(GeometryError::invalid("domain bounds are empty or non-finite"));
    }
    if !curve.is_valid() {
        return Err(GeometryError::invalid("curve failed validation"));
    }
    if let Some(outside) = curve.ring().iter().find(|p| !domain.contains(**p)) {
        return Err(GeometryError::invalid(format!(
            "curve point ({:.4}, {:.4}) lies outside the domain",
            outside.x, outside.y
        )));
    }

    let ring = polygon::remove_collinear(curve.ring(), 1e-12);
    let caps = polygon::triangulate(&ring)?;
    let m = ring.len();

    let mut vertices = Vec::with_capacity(2 * m);
    vertices.extend(ring.iter().map(|p| Point3::new(p.x, p.y, 0.0)));
    vertices.extend(ring.iter().map(|p| Point3::new(p.x, p.y, depth)));

    let mut triangles = Vec::with_capacity(2 * caps.len() + 2 * m);
    for &[a, b, c] in &caps {
        // bottom faces -z, top faces +z
        triangles.push([a, c, b]);
        triangles.push([a + m, b + m, c + m]);
    }
    for i in 0..m {
        let j = (i + 1) % m;
        triangles.push([i, j, j + m]);
        triangles.push([i, j + m, i + m]);
    }

    debug!(
        ring = m,
        triangles = triangles.len(),
        depth,
        "extruded airfoil surface"
    );
    MeshAsset::new(TriSurface::new(vertices, triangles), depth, domain)
}
