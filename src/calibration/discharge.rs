use log::warn;
use serde::Serialize;

use crate::calibration::error::{CalibrationError, ValidationError};
use crate::calibration::physics::VelocitySample;

/// One reading that survived exclusion, with its coefficient.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CalibrationPoint {
    pub index: usize,
    pub v0: f64,
    pub vp: f64,
    pub cv: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CvStatistics {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1); zero for a single point.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DischargeEstimate {
    pub points: Vec<CalibrationPoint>,
    /// Input indices dropped because their Pitot velocity was zero.
    pub excluded: Vec<usize>,
    pub statistics: CvStatistics,
}

impl DischargeEstimate {
    pub fn mean_cv(&self) -> f64 {
        self.statistics.mean
    }
}

/// Computes `cv = V0 / Vp` per sample, excluding samples with `Vp == 0`.
///
/// A coefficient or statistic that leaves the finite range (a subnormal
/// Pitot velocity, for instance) fails with [`ValidationError::OutOfRange`]
/// or [`ValidationError::Overflow`].
pub fn estimate_discharge(
    samples: &[VelocitySample],
) -> Result<DischargeEstimate, CalibrationError> {
    let mut points = Vec::with_capacity(samples.len());
    let mut excluded = Vec::new();
    for sample in samples {
        if sample.vp == 0.0 {
            excluded.push(sample.index);
            continue;
        }
        let cv = sample.v0 / sample.vp;
        if !cv.is_finite() {
            return Err(ValidationError::OutOfRange {
                index: sample.index,
                quantity: "Cv",
            }
            .into());
        }
        points.push(CalibrationPoint {
            index: sample.index,
            v0: sample.v0,
            vp: sample.vp,
            cv,
        });
    }
    if !excluded.is_empty() {
        warn!(
            "excluded {} reading(s) with zero Pitot velocity: {:?}",
            excluded.len(),
            excluded
        );
    }
    let statistics = cv_statistics(&points).ok_or(CalibrationError::InsufficientData {
        excluded: excluded.len(),
    })?;
    if !statistics.std_dev.is_finite() {
        return Err(ValidationError::Overflow("Cv standard deviation").into());
    }
    Ok(DischargeEstimate {
        points,
        excluded,
        statistics,
    })
}

fn cv_statistics(points: &[CalibrationPoint]) -> Option<CvStatistics> {
    if points.is_empty() {
        return None;
    }
    let count = points.len();
    // Dividing first keeps the sum within range for finite coefficients.
    let mean = points.iter().map(|p| p.cv / count as f64).sum::<f64>();
    let std_dev = if count > 1 {
        let ss = points
            .iter()
            .map(|p| {
                let delta = p.cv - mean;
                delta * delta
            })
            .sum::<f64>();
        (ss / (count - 1) as f64).sqrt()
    } else {
        0.0
    };
    let min = points.iter().map(|p| p.cv).fold(f64::INFINITY, f64::min);
    let max = points.iter().map(|p| p.cv).fold(f64::NEG_INFINITY, f64::max);
    Some(CvStatistics {
        count,
        mean,
        std_dev,
        min,
        max,
    })
}
