//! af-core: shared foundation for the airfoil pipeline.
//!
//! Contains:
//! - numeric (Real + quantization)
//! - point (2D sketch points and 3D mesh vertices)
//! - units (uom SI types + Reynolds number)

pub mod numeric;
pub mod point;
pub mod units;

pub use numeric::*;
pub use point::{Point2, Point3};
