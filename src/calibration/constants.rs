use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calibration::error::ValidationError;

pub const DEFAULT_G: f64 = 9.81;
pub const DEFAULT_RHO: f64 = 1000.0;
pub const DEFAULT_CD_ORIFICE: f64 = 0.61;
pub const DEFAULT_A_RATIO: f64 = 0.5;

/// Physical constants for one pipeline run. Never mutated once built.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicalConstants {
    /// Gravitational acceleration (m/s²).
    pub g: f64,
    /// Fluid density (kg/m³).
    pub rho: f64,
    /// Orifice discharge coefficient.
    #[serde(rename = "Cd_orifice")]
    pub cd_orifice: f64,
    /// Orifice to pipe area ratio.
    #[serde(rename = "A_ratio")]
    pub a_ratio: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            g: DEFAULT_G,
            rho: DEFAULT_RHO,
            cd_orifice: DEFAULT_CD_ORIFICE,
            a_ratio: DEFAULT_A_RATIO,
        }
    }
}

impl PhysicalConstants {
    /// Defaults with the recognized keys of `overrides` applied on top.
    pub fn with_overrides(overrides: &BTreeMap<String, Value>) -> Result<Self, ValidationError> {
        let mut constants = Self::default();
        for (key, value) in overrides {
            let number = value
                .as_f64()
                .ok_or_else(|| ValidationError::InvalidConstant {
                    key: key.clone(),
                    reason: format!("{value} is not a number"),
                })?;
            match key.as_str() {
                "g" => constants.g = number,
                "rho" => constants.rho = number,
                "Cd_orifice" => constants.cd_orifice = number,
                "A_ratio" => constants.a_ratio = number,
                _ => return Err(ValidationError::UnknownConstant(key.clone())),
            }
        }
        constants.validate()?;
        Ok(constants)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check("g", self.g, |v| v > 0.0, "must be positive")?;
        check("rho", self.rho, |v| v > 0.0, "must be positive")?;
        check("Cd_orifice", self.cd_orifice, |v| v > 0.0, "must be positive")?;
        check(
            "A_ratio",
            self.a_ratio,
            |v| (0.0..1.0).contains(&v),
            "must lie in [0, 1)",
        )
    }

    /// `1 - A_ratio²`, the approach-velocity correction of the orifice relation.
    pub fn approach_factor(&self) -> f64 {
        1.0 - self.a_ratio * self.a_ratio
    }
}

fn check(
    key: &str,
    value: f64,
    valid: impl Fn(f64) -> bool,
    requirement: &str,
) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::InvalidConstant {
            key: key.to_owned(),
            reason: format!("{value} is not finite"),
        });
    }
    if !valid(value) {
        return Err(ValidationError::InvalidConstant {
            key: key.to_owned(),
            reason: format!("{value} {requirement}"),
        });
    }
    Ok(())
}
