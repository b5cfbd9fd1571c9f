//! Raw differential readings to flow velocities.
//!
//! Orifice meter: `V0 = Cd * sqrt(2 g h / (1 - A_ratio²))` with `h` the
//! measured differential head.
//! Pitot tube: `Vp = sqrt(2 Δp / rho)` with `Δp` the measured dynamic pressure.
//!
//! Sub-threshold noise in low-flow runs can push a radicand below zero. Such
//! radicands are clamped to zero and counted instead of failing the run.
//! Readings large enough to overflow a velocity are rejected.

use log::warn;

use crate::calibration::constants::PhysicalConstants;
use crate::calibration::error::ValidationError;
use crate::calibration::readings::{Reading, ReadingSet};

/// Velocities derived from one reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VelocitySample {
    /// 1-based position in the input series.
    pub index: usize,
    pub v0: f64,
    pub vp: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VelocitySet {
    pub samples: Vec<VelocitySample>,
    /// Number of radicands clamped to zero across both instruments.
    pub clamped: usize,
}

/// Square root with the radicand clamped at zero. Returns the root and
/// whether clamping happened.
fn clamped_sqrt(radicand: f64) -> (f64, bool) {
    if radicand < 0.0 {
        (0.0, true)
    } else {
        (radicand.sqrt(), false)
    }
}

fn orifice_velocity_inner(orifice_raw: f64, constants: &PhysicalConstants) -> (f64, bool) {
    let radicand = 2.0 * constants.g * orifice_raw / constants.approach_factor();
    let (root, clamped) = clamped_sqrt(radicand);
    (constants.cd_orifice * root, clamped)
}

fn pitot_velocity_inner(pitot_raw: f64, constants: &PhysicalConstants) -> (f64, bool) {
    clamped_sqrt(2.0 * pitot_raw / constants.rho)
}

pub fn orifice_velocity(orifice_raw: f64, constants: &PhysicalConstants) -> f64 {
    orifice_velocity_inner(orifice_raw, constants).0
}

pub fn pitot_velocity(pitot_raw: f64, constants: &PhysicalConstants) -> f64 {
    pitot_velocity_inner(pitot_raw, constants).0
}

/// Velocities for a single reading plus the number of clamped radicands (0..=2).
pub fn reading_velocities(
    index: usize,
    reading: &Reading,
    constants: &PhysicalConstants,
) -> (VelocitySample, usize) {
    let (v0, v0_clamped) = orifice_velocity_inner(reading.orifice_raw, constants);
    let (vp, vp_clamped) = pitot_velocity_inner(reading.pitot_raw, constants);
    let clamped = usize::from(v0_clamped) + usize::from(vp_clamped);
    (VelocitySample { index, v0, vp }, clamped)
}

pub fn compute_velocities(
    readings: &ReadingSet,
    constants: &PhysicalConstants,
) -> Result<VelocitySet, ValidationError> {
    let mut samples = Vec::with_capacity(readings.len());
    let mut clamped = 0;
    for (i, reading) in readings.iter().enumerate() {
        let (sample, n) = reading_velocities(i + 1, reading, constants);
        for (quantity, value) in [("V0", sample.v0), ("Vp", sample.vp)] {
            if !value.is_finite() {
                return Err(ValidationError::OutOfRange {
                    index: sample.index,
                    quantity,
                });
            }
        }
        if n > 0 {
            warn!(
                "reading #{}: clamped {n} negative radicand(s) to zero (orifice={}, pitot={})",
                i + 1,
                reading.orifice_raw,
                reading.pitot_raw
            );
        }
        clamped += n;
        samples.push(sample);
    }
    Ok(VelocitySet { samples, clamped })
}
