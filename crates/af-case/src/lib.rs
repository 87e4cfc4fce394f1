//! af-case: simulation parameters and OpenFOAM case directory generation.

pub mod case;
pub mod dicts;
pub mod error;
pub mod params;
pub mod validate;

pub use case::{CASE_MANIFEST, CaseDirectory, CaseManifest, configure, configure_with, prepare_rerun};
pub use error::{CaseError, CaseResult};
pub use params::{Resolution, SimulationParameters, load_params_yaml, save_params_yaml};
pub use validate::ValidationError;
