//! Planar polygon helpers: area, simplicity, triangulation.
//!
//! Rings are passed open (last vertex is not a copy of the first) unless a
//! function says otherwise.

use af_core::Point2;
use rayon::prelude::*;

use crate::error::{GeometryError, GeometryResult};

/// Shoelace area, positive for counter-clockwise rings.
pub fn signed_area(ring: &[Point2]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for i in 0..n {
        twice += ring[i].cross(ring[(i + 1) % n]);
    }
    0.5 * twice
}

fn orient(a: Point2, b: Point2, c: Point2) -> f64 {
    (b - a).cross(c - a)
}

fn on_segment(a: Point2, b: Point2, p: Point2) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Closed-segment intersection test, including touching and collinear overlap.
pub fn segments_intersect(p1: Point2, p2: Point2, q1: Point2, q2: Point2) -> bool {
    if p1.x.max(p2.x) < q1.x.min(q2.x)
        || q1.x.max(q2.x) < p1.x.min(p2.x)
        || p1.y.max(p2.y) < q1.y.min(q2.y)
        || q1.y.max(q2.y) < p1.y.min(p2.y)
    {
        return false;
    }

    let d1 = orient(q1, q2, p1);
    let d2 = orient(q1, q2, p2);
    let d3 = orient(p1, p2, q1);
    let d4 = orient(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

/// First pair of non-adjacent edges of the closed ring that intersect.
pub fn find_self_intersection(ring: &[Point2]) -> Option<(usize, usize)> {
    let n = ring.len();
    if n < 4 {
        return None;
    }
    (0..n).into_par_iter().find_map_first(|i| {
        let a1 = ring[i];
        let a2 = ring[(i + 1) % n];
        ((i + 2)..n)
            .filter(|&j| !(i == 0 && j == n - 1))
            .find(|&j| segments_intersect(a1, a2, ring[j], ring[(j + 1) % n]))
            .map(|j| (i, j))
    })
}

/// Drop vertices lying on the straight line through their neighbours.
pub fn remove_collinear(ring: &[Point2], eps: f64) -> Vec<Point2> {
    let mut out: Vec<Point2> = ring.to_vec();
    let mut changed = true;
    while changed && out.len() > 3 {
        changed = false;
        let n = out.len();
        for i in 0..n {
            let prev = out[(i + n - 1) % n];
            let next = out[(i + 1) % n];
            let cur = out[i];
            let scale = (cur - prev).norm() * (next - cur).norm();
            if orient(prev, cur, next).abs() <= eps * scale {
                out.remove(i);
                changed = true;
                break;
            }
        }
    }
    out
}

fn point_in_triangle(p: Point2, a: Point2, b: Point2, c: Point2) -> bool {
    orient(a, b, p) >= 0.0 && orient(b, c, p) >= 0.0 && orient(c, a, p) >= 0.0
}

/// Ear-clipping triangulation of a simple counter-clockwise ring. Returned
/// triangles index into `ring` and are counter-clockwise.
pub fn triangulate(ring: &[Point2]) -> GeometryResult<Vec<[usize; 3]>> {
    let n = ring.len();
    if n < 3 {
        return Err(GeometryError::invalid("cannot triangulate fewer than 3 vertices"));
    }

    let mut remaining: Vec<usize> = (0..n).collect();
    let mut triangles = Vec::with_capacity(n - 2);

    while remaining.len() > 3 {
        let m = remaining.len();
        let ear = (0..m).find(|&k| {
            let ia = remaining[(k + m - 1) % m];
            let ib = remaining[k];
            let ic = remaining[(k + 1) % m];
            let (a, b, c) = (ring[ia], ring[ib], ring[ic]);
            if orient(a, b, c) <= 0.0 {
                return false;
            }
            remaining.iter().all(|&other| {
                other == ia
                    || other == ib
                    || other == ic
                    || !point_in_triangle(ring[other], a, b, c)
            })
        });

        let k = ear.ok_or_else(|| {
            GeometryError::invalid(format!(
                "ear clipping stalled with {} vertices left",
                remaining.len()
            ))
        })?;
        let ia = remaining[(k + m - 1) % m];
        let ib = remaining[k];
        let ic = remaining[(k + 1) % m];
        triangles.push([ia, ib, ic]);
        remaining.remove(k);
    }

    triangles.push([remaining[0], remaining[1], remaining[2]]);
    Ok(triangles)
}
