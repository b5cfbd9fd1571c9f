use ndarray::Array1;
use serde::Serialize;

use crate::calibration::discharge::CalibrationPoint;
use crate::calibration::error::CalibrationError;

/// Least-squares line `V0 = slope * Vp + intercept`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub equation_text: String,
    pub points: usize,
}

impl ModelFit {
    pub fn predict(&self, vp: f64) -> f64 {
        self.slope * vp + self.intercept
    }
}

/// Closed-form ordinary least squares with `x = Vp`, `y = V0`.
///
/// A set with no spread in `Vp` (one point included) has no defined slope and
/// fails with [`CalibrationError::DegenerateFit`], as does a fit whose sums
/// overflow.
pub fn fit_linear(points: &[CalibrationPoint]) -> Result<ModelFit, CalibrationError> {
    let degenerate = CalibrationError::DegenerateFit {
        points: points.len(),
    };
    let x: Array1<f64> = points.iter().map(|p| p.vp).collect();
    let y: Array1<f64> = points.iter().map(|p| p.v0).collect();
    if !has_spread(&x) {
        return Err(degenerate);
    }
    let (Some(x_mean), Some(y_mean)) = (x.mean(), y.mean()) else {
        return Err(degenerate);
    };
    let dx = &x - x_mean;
    let dy = &y - y_mean;
    let sxx = dx.dot(&dx);
    if sxx <= 0.0 {
        return Err(degenerate);
    }
    let slope = dx.dot(&dy) / sxx;
    let intercept = y_mean - slope * x_mean;

    let residuals = &y - &(&x * slope + intercept);
    let ss_res = residuals.dot(&residuals);
    let ss_tot = dy.dot(&dy);
    // Constant V0 is fitted exactly by the flat line.
    let r_squared = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };
    if !(slope.is_finite() && intercept.is_finite() && r_squared.is_finite()) {
        return Err(degenerate);
    }

    Ok(ModelFit {
        slope,
        intercept,
        r_squared,
        equation_text: equation_text(slope, intercept),
        points: points.len(),
    })
}

fn has_spread(x: &Array1<f64>) -> bool {
    if x.is_empty() {
        return false;
    }
    let min = x.iter().copied().fold(f64::INFINITY, f64::min);
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let scale = min.abs().max(max.abs());
    max - min > 4.0 * f64::EPSILON * scale
}

/// `V0 = {slope}·Vp ± {|intercept|}` at four decimals.
pub fn equation_text(slope: f64, intercept: f64) -> String {
    let sign = if intercept < 0.0 && fixed4(intercept.abs()) != "0.0000" {
        '-'
    } else {
        '+'
    };
    format!("V0 = {}·Vp {sign} {}", fixed4(slope), fixed4(intercept.abs()))
}

fn fixed4(value: f64) -> String {
    let text = format!("{value:.4}");
    if text == "-0.0000" {
        "0.0000".to_owned()
    } else {
        text
    }
}
