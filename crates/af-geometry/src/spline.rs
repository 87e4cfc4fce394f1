//! Periodic uniform cubic B-spline interpolation.
//!
//! The curve passes through every data point `Q_k` at integer parameter `k`.
//! With uniform knots the interpolation condition is the cyclic system
//! `(P_{k-1} + 4 P_k + P_{k+1}) / 6 = Q_k`, which is strictly diagonally
//! dominant and therefore always solvable.

use af_core::Point2;
use nalgebra::DMatrix;

use crate::error::{GeometryError, GeometryResult};

pub const DEGREE: usize = 3;

#[derive(Debug, Clone)]
pub struct PeriodicSpline {
    control: Vec<Point2>,
}

impl PeriodicSpline {
    /// Fit a closed cubic spline through `data`. The loop closes from the last
    /// point back to the first; `data` must not repeat its first point.
    pub fn interpolate(data: &[Point2]) -> GeometryResult<Self> {
        let n = data.len();
        if n < DEGREE {
            return Err(GeometryError::InsufficientPoints { found: n });
        }

        let mut a = DMatrix::<f64>::zeros(n, n);
        for k in 0..n {
            a[(k, (k + n - 1) % n)] += 1.0 / 6.0;
            a[(k, k)] += 4.0 / 6.0;
            a[(k, (k + 1) % n)] += 1.0 / 6.0;
        }
        let mut rhs = DMatrix::<f64>::zeros(n, 2);
        for (k, q) in data.iter().enumerate() {
            rhs[(k, 0)] = q.x;
            rhs[(k, 1)] = q.y;
        }

        let solution = a
            .lu()
            .solve(&rhs)
            .ok_or_else(|| GeometryError::invalid("spline interpolation system is singular"))?;

        let control = (0..n)
            .map(|k| Point2::new(solution[(k, 0)], solution[(k, 1)]))
            .collect();
        Ok(Self { control })
    }

    /// Parameter period; the curve satisfies `C(t + period) = C(t)`.
    pub fn period(&self) -> f64 {
        self.control.len() as f64
    }

    pub fn eval(&self, t: f64) -> Point2 {
        let n = self.control.len();
        let t = t.rem_euclid(self.period());
        let seg = (t.floor() as usize).min(n - 1);
        let u = t - seg as f64;

        let p0 = self.control[(seg + n - 1) % n];
        let p1 = self.control[seg];
        let p2 = self.control[(seg + 1) % n];
        let p3 = self.control[(seg + 2) % n];

        let u2 = u * u;
        let u3 = u2 * u;
        let b0 = (1.0 - u).powi(3) / 6.0;
        let b1 = (3.0 * u3 - 6.0 * u2 + 4.0) / 6.0;
        let b2 = (-3.0 * u3 + 3.0 * u2 + 3.0 * u + 1.0) / 6.0;
        let b3 = u3 / 6.0;

        p0 * b0 + p1 * b1 + p2 * b2 + p3 * b3
    }

    /// `count` points evenly spaced in parameter, followed by a copy of the
    /// first one so the polyline is explicitly closed.
    pub fn sample_closed(&self, count: usize) -> Vec<Point2> {
        let step = self.period() / count as f64;
        let mut out: Vec<Point2> = (0..count).map(|j| self.eval(j as f64 * step)).collect();
        if let Some(&first) = out.first() {
            out.push(first);
        }
        out
    }
}
