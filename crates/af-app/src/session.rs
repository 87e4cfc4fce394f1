//! Sketch editing with linear undo/redo.

use std::path::Path;

use af_core::Point2;
use af_geometry::{AirfoilCurve, CanvasMapping, CurveOptions, PointSet};

use crate::error::AppResult;

/// The points being sketched plus their edit history. `history[cursor]` is
/// always the current state; index 0 is the empty sketch.
#[derive(Debug, Clone)]
pub struct DesignSession {
    history: Vec<PointSet>,
    cursor: usize,
    canvas: CanvasMapping,
}

impl Default for DesignSession {
    fn default() -> Self {
        Self::new(CanvasMapping::default())
    }
}

impl DesignSession {
    pub fn new(canvas: CanvasMapping) -> Self {
        Self {
            history: vec![PointSet::default()],
            cursor: 0,
            canvas,
        }
    }

    /// Start from existing points; the loaded state is one undo step away
    /// from the empty sketch.
    pub fn from_points(points: PointSet) -> Self {
        let mut session = Self::default();
        session.commit(points);
        session
    }

    pub fn points(&self) -> &PointSet {
        &self.history[self.cursor]
    }

    pub fn canvas(&self) -> &CanvasMapping {
        &self.canvas
    }

    fn commit(&mut self, next: PointSet) {
        if &next == self.points() {
            return;
        }
        self.history.truncate(self.cursor + 1);
        self.history.push(next);
        self.cursor = self.history.len() - 1;
    }

    pub fn add_point(&mut self, point: Point2) {
        let mut next = self.points().clone();
        next.push(point);
        self.commit(next);
    }

    /// Add a click given in canvas pixels.
    pub fn add_pixel(&mut self, px: f64, py: f64) {
        let point = self.canvas.to_design(px, py);
        self.add_point(point);
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.history.len()
    }

    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.cursor -= 1;
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.cursor += 1;
        true
    }

    /// Reset the design. The history is discarded too.
    pub fn clear(&mut self) {
        self.history = vec![PointSet::default()];
        self.cursor = 0;
    }

    pub fn curve(&self, options: &CurveOptions) -> AppResult<AirfoilCurve> {
        Ok(af_geometry::build_with(self.points(), options)?)
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        Ok(af_geometry::save_points(path, self.points())?)
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        Ok(Self::from_points(af_geometry::load_points(path)?))
    }
}
