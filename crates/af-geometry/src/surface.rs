//! Indexed triangle surfaces.

use std::collections::HashMap;

use af_core::Point3;

use crate::error::{GeometryError, GeometryResult};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriSurface {
    vertices: Vec<Point3>,
    triangles: Vec<[usize; 3]>,
}

impl TriSurface {
    pub fn new(vertices: Vec<Point3>, triangles: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            triangles,
        }
    }

    pub fn vertices(&self) -> &[Point3] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    fn corners(&self, t: &[usize; 3]) -> [Point3; 3] {
        t.map(|i| self.vertices[i])
    }

    /// Unit normal of each triangle following its winding.
    pub fn normals(&self) -> Vec<Point3> {
        self.triangles
            .iter()
            .map(|t| {
                let [a, b, c] = self.corners(t);
                (b - a)
                    .cross(c - a)
                    .normalize()
                    .unwrap_or(Point3::new(0.0, 0.0, 1.0))
            })
            .collect()
    }

    /// Divergence-theorem volume; positive when normals point outward.
    pub fn signed_volume(&self) -> f64 {
        self.triangles
            .iter()
            .map(|t| {
                let [a, b, c] = self.corners(t);
                a.dot(b.cross(c)) / 6.0
            })
            .sum()
    }

    /// Every edge must be used by exactly two triangles, once in each
    /// direction, which also makes the winding consistent.
    pub fn check_manifold(&self) -> GeometryResult<()> {
        if self.triangles.is_empty() {
            return Err(GeometryError::invalid("surface has no triangles"));
        }
        let mut directed: HashMap<(usize, usize), usize> = HashMap::new();
        for (ti, t) in self.triangles.iter().enumerate() {
            if t.iter().any(|&i| i >= self.vertices.len()) {
                return Err(GeometryError::invalid(format!(
                    "triangle {ti} references a missing vertex"
                )));
            }
            if t[0] == t[1] || t[1] == t[2] || t[0] == t[2] {
                return Err(GeometryError::invalid(format!("triangle {ti} is degenerate")));
            }
            for k in 0..3 {
                *directed.entry((t[k], t[(k + 1) % 3])).or_default() += 1;
            }
        }
        for (&(a, b), &count) in &directed {
            if count != 1 {
                return Err(GeometryError::invalid(format!(
                    "edge {a}->{b} is used {count} times in the same direction"
                )));
            }
            if directed.get(&(b, a)) != Some(&1) {
                return Err(GeometryError::invalid(format!(
                    "edge {a}-{b} is not shared by exactly two faces"
                )));
            }
        }
        Ok(())
    }

    /// Manifold and enclosing a positive volume.
    pub fn check_closed_outward(&self) -> GeometryResult<()> {
        self.check_manifold()?;
        let volume = self.signed_volume();
        if volume <= 0.0 {
            return Err(GeometryError::invalid(format!(
                "surface is inward oriented (signed volume {volume:.3e})"
            )));
        }
        Ok(())
    }
}
