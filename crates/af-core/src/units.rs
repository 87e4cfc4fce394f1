// af-core/src/units.rs

use uom::si::f64::{
    DiffusionCoefficient as UomDiffusionCoefficient, Length as UomLength,
    Velocity as UomVelocity,
};

// Public canonical unit types (SI, f64)
pub type KinVisc = UomDiffusionCoefficient;
pub type Length = UomLength;
pub type Velocity = UomVelocity;

#[inline]
pub fn m(v: f64) -> Length {
    use uom::si::length::meter;
    Length::new::<meter>(v)
}

#[inline]
pub fn mps(v: f64) -> Velocity {
    use uom::si::velocity::meter_per_second;
    Velocity::new::<meter_per_second>(v)
}

#[inline]
pub fn m2ps(v: f64) -> KinVisc {
    use uom::si::diffusion_coefficient::square_meter_per_second;
    KinVisc::new::<square_meter_per_second>(v)
}

/// Reynolds number `U L / nu`.
pub fn reynolds_number(velocity: Velocity, length: Length, nu: KinVisc) -> f64 {
    (velocity * length / nu).value
}

pub mod constants {
    /// Air at 20 degC, sea level.
    pub const AIR_DENSITY_KG_M3: f64 = 1.204;
    pub const AIR_KINEMATIC_VISCOSITY_M2_S: f64 = 1.516e-5;
}
