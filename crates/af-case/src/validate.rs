//! Parameter validation.

use crate::params::SimulationParameters;

pub const MAX_VELOCITY_MPS: f64 = 340.0;
pub const MAX_DENSITY_KG_M3: f64 = 2000.0;
pub const MAX_KINEMATIC_VISCOSITY_M2_S: f64 = 1.0;
pub const MAX_ITERATIONS: u32 = 100_000;
pub const MAX_REFINEMENT_LEVEL: u32 = 8;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Open interval `(lo, hi)` when `hi_inclusive` is false, `(lo, hi]` otherwise.
fn check_range(
    field: &str,
    value: f64,
    lo: f64,
    hi: f64,
    hi_inclusive: bool,
) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(invalid(field, value, "must be finite"));
    }
    let above = if hi_inclusive { value > hi } else { value >= hi };
    if value <= lo || above {
        let bracket = if hi_inclusive { ']' } else { ')' };
        return Err(invalid(
            field,
            value,
            &format!("must be in ({lo}, {hi}{bracket}"),
        ));
    }
    Ok(())
}

pub fn validate_parameters(params: &SimulationParameters) -> Result<(), ValidationError> {
    check_range(
        "velocity_mps",
        params.velocity_mps,
        0.0,
        MAX_VELOCITY_MPS,
        false,
    )?;
    check_range(
        "density_kg_m3",
        params.density_kg_m3,
        0.0,
        MAX_DENSITY_KG_M3,
        true,
    )?;
    check_range(
        "kinematic_viscosity_m2_s",
        params.kinematic_viscosity_m2_s,
        0.0,
        MAX_KINEMATIC_VISCOSITY_M2_S,
        true,
    )?;
    check_range("tolerance", params.tolerance, 0.0, 1.0, false)?;

    if params.max_iterations == 0 || params.max_iterations > MAX_ITERATIONS {
        return Err(invalid(
            "max_iterations",
            params.max_iterations,
            &format!("must be in 1..={MAX_ITERATIONS}"),
        ));
    }
    if params.refinement_level > MAX_REFINEMENT_LEVEL {
        return Err(invalid(
            "refinement_level",
            params.refinement_level,
            &format!("must be in 0..={MAX_REFINEMENT_LEVEL}"),
        ));
    }
    if !(params.extrusion_depth.is_finite() && params.extrusion_depth > 0.0) {
        return Err(invalid(
            "extrusion_depth",
            params.extrusion_depth,
            "must be positive and finite",
        ));
    }

    let d = &params.domain;
    if !d.is_well_formed() {
        return Err(invalid(
            "domain",
            format!("[{}, {}] x [{}, {}]", d.x_min, d.x_max, d.y_min, d.y_max),
            "must be finite and non-empty",
        ));
    }
    Ok(())
}
