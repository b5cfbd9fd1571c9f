//! JSON request and response documents exchanged with the web layer.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calibration::constants::PhysicalConstants;
use crate::calibration::error::{CalibrationError, ValidationError};
use crate::calibration::pipeline::{CalibrationPipeline, ExperimentReport};
use crate::calibration::plot::{AxisLabels, ChartRenderer};
use crate::calibration::readings::validate_readings;
use crate::calibration::report::ReportBuilder;

/// Readings stay as raw JSON so malformed elements are reported by the
/// validator with their index instead of failing deserialization.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExperimentRequest {
    #[serde(default)]
    pub orifice_readings: Vec<Value>,
    #[serde(default)]
    pub pitot_readings: Vec<Value>,
    #[serde(default)]
    pub graph_params: Option<Vec<String>>,
    #[serde(default)]
    pub constants: Option<BTreeMap<String, Value>>,
}

impl ExperimentRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(body).map_err(|e| ValidationError::MalformedRequest(e.to_string()))
    }

    pub fn labels(&self) -> Result<AxisLabels, ValidationError> {
        match &self.graph_params {
            Some(params) => AxisLabels::from_params(params),
            None => Ok(AxisLabels::default()),
        }
    }

    pub fn physical_constants(&self) -> Result<PhysicalConstants, ValidationError> {
        match &self.constants {
            Some(overrides) => PhysicalConstants::with_overrides(overrides),
            None => Ok(PhysicalConstants::default()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub index: usize,
    pub v0: f64,
    pub vp: f64,
    pub cv: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseDiagnostics {
    pub excluded_count: usize,
    pub excluded_indices: Vec<usize>,
    pub clamped_count: usize,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub cv_std_dev: f64,
    pub constants: PhysicalConstants,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResponse {
    pub success: bool,
    pub results: Vec<ResultRow>,
    pub mean_cv: f64,
    pub model_calculation: String,
    pub graph_base64: String,
    pub pdf_base64: String,
    pub diagnostics: ResponseDiagnostics,
}

impl From<&ExperimentReport> for ExperimentResponse {
    fn from(report: &ExperimentReport) -> Self {
        Self {
            success: true,
            results: report
                .points
                .iter()
                .map(|p| ResultRow {
                    index: p.index,
                    v0: p.v0,
                    vp: p.vp,
                    cv: p.cv,
                })
                .collect(),
            mean_cv: report.mean_cv,
            model_calculation: report.fit.equation_text.clone(),
            graph_base64: STANDARD.encode(&report.graph_bytes),
            pdf_base64: STANDARD.encode(&report.report_bytes),
            diagnostics: ResponseDiagnostics {
                excluded_count: report.diagnostics.excluded_indices.len(),
                excluded_indices: report.diagnostics.excluded_indices.clone(),
                clamped_count: report.diagnostics.clamped_radicands,
                slope: report.fit.slope,
                intercept: report.fit.intercept,
                r_squared: report.fit.r_squared,
                cv_std_dev: report.statistics.std_dev,
                constants: report.constants,
            },
        }
    }
}

impl ExperimentResponse {
    pub fn decode_graph(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.graph_base64)
    }

    pub fn decode_pdf(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.pdf_base64)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub kind: String,
}

impl From<&CalibrationError> for ErrorResponse {
    fn from(err: &CalibrationError) -> Self {
        Self {
            success: false,
            error: err.to_string(),
            kind: err.kind().to_owned(),
        }
    }
}

/// Runs one request end to end. Readings are checked before labels and
/// constants, so a request with several problems reports the readings first.
pub fn process_request<R: ChartRenderer, B: ReportBuilder>(
    pipeline: &CalibrationPipeline<R, B>,
    request: &ExperimentRequest,
    generated_at: DateTime<Utc>,
) -> Result<ExperimentResponse, CalibrationError> {
    let readings = validate_readings(&request.orifice_readings, &request.pitot_readings)?
        .to_reading_set()?;
    let labels = request.labels()?;
    let constants = request.physical_constants()?;
    let report = pipeline.run(&readings, &constants, &labels, generated_at)?;
    Ok(ExperimentResponse::from(&report))
}

/// Parses a request body and returns either response document.
pub fn handle_json<R: ChartRenderer, B: ReportBuilder>(
    pipeline: &CalibrationPipeline<R, B>,
    body: &[u8],
    generated_at: DateTime<Utc>,
) -> Result<ExperimentResponse, ErrorResponse> {
    ExperimentRequest::from_json(body)
        .map_err(CalibrationError::from)
        .and_then(|request| process_request(pipeline, &request, generated_at))
        .map_err(|err| ErrorResponse::from(&err))
}
