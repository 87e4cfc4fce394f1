//! Simulation parameters.

use std::fmt;
use std::path::Path;

use af_core::units::{self, constants};
use af_geometry::DomainBounds;
use serde::{Deserialize, Serialize};

use crate::error::CaseResult;
use crate::validate::{ValidationError, validate_parameters};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Coarse,
    #[default]
    Medium,
    Fine,
}

impl Resolution {
    /// Background block mesh cell size in metres.
    pub fn background_cell_size(self) -> f64 {
        match self {
            Resolution::Coarse => 0.1,
            Resolution::Medium => 0.05,
            Resolution::Fine => 0.025,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resolution::Coarse => "coarse",
            Resolution::Medium => "medium",
            Resolution::Fine => "fine",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coarse" => Ok(Resolution::Coarse),
            "medium" => Ok(Resolution::Medium),
            "fine" => Ok(Resolution::Fine),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}

/// Physical and numerical settings of one run. Missing YAML fields take the
/// default value (air at 20 °C, 1 m/s inlet, medium mesh).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParameters {
    pub velocity_mps: f64,
    pub density_kg_m3: f64,
    pub kinematic_viscosity_m2_s: f64,
    pub resolution: Resolution,
    pub refinement_level: u32,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub extrusion_depth: f64,
    pub domain: DomainBounds,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            velocity_mps: 1.0,
            density_kg_m3: constants::AIR_DENSITY_KG_M3,
            kinematic_viscosity_m2_s: constants::AIR_KINEMATIC_VISCOSITY_M2_S,
            resolution: Resolution::Medium,
            refinement_level: 3,
            tolerance: 1e-5,
            max_iterations: 2000,
            extrusion_depth: 0.1,
            domain: DomainBounds::default(),
        }
    }
}

impl SimulationParameters {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_parameters(self)
    }

    /// Reynolds number for the given chord length.
    pub fn reynolds_number(&self, chord: f64) -> f64 {
        units::reynolds_number(
            units::mps(self.velocity_mps),
            units::m(chord),
            units::m2ps(self.kinematic_viscosity_m2_s),
        )
    }
}

pub fn load_params_yaml(path: &Path) -> CaseResult<SimulationParameters> {
    let content = std::fs::read_to_string(path)?;
    let params: SimulationParameters = serde_yaml::from_str(&content)?;
    params.validate()?;
    Ok(params)
}

pub fn save_params_yaml(path: &Path, params: &SimulationParameters) -> CaseResult<()> {
    params.validate()?;
    let content = serde_yaml::to_string(params)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reynolds_number_for_unit_chord() {
        let params = SimulationParameters::default();
        let re = params.reynolds_number(1.0);
        assert!((re - 1.0 / 1.516e-5).abs() < 1e-6 * re);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let params: SimulationParameters =
            serde_yaml::from_str("velocity_mps: 12.5\nresolution: fine\n").unwrap();
        assert_eq!(params.velocity_mps, 12.5);
        assert_eq!(params.resolution, Resolution::Fine);
        assert_eq!(params.max_iterations, SimulationParameters::default().max_iterations);
    }

    #[test]
    fn yaml_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.yaml");
        let params = SimulationParameters {
            velocity_mps: 30.0,
            resolution: Resolution::Coarse,
            ..Default::default()
        };
        save_params_yaml(&path, &params).unwrap();
        assert_eq!(load_params_yaml(&path).unwrap(), params);
    }

    #[test]
    fn invalid_yaml_values_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.yaml");
        std::fs::write(&path, "velocity_mps: 500\n").unwrap();
        assert!(matches!(
            load_params_yaml(&path),
            Err(crate::CaseError::InvalidParameters(_))
        ));
    }

    #[test]
    fn resolution_cell_sizes_shrink() {
        assert!(
            Resolution::Fine.background_cell_size() < Resolution::Medium.background_cell_size()
        );
        assert_eq!("COARSE".parse::<Resolution>(), Ok(Resolution::Coarse));
    }
}
