//! af-geometry: sketch points to a closed airfoil curve, and the curve to an
//! extruded STL solid for the external mesher.

pub mod coords;
pub mod curve;
pub mod error;
pub mod extrude;
pub mod pointset;
pub mod polygon;
pub mod spline;
pub mod stl;
pub mod surface;

pub use coords::{CanvasMapping, load_points, parse_points, save_points};
pub use curve::{AirfoilCurve, CurveOptions, CurveValidity, build, build_with, fit};
pub use error::{GeometryError, GeometryResult};
pub use extrude::{DomainBounds, MeshAsset, export};
pub use pointset::PointSet;
pub use stl::{StlFormat, read_stl, serialize};
pub use surface::TriSurface;
