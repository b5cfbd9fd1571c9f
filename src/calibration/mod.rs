// src/calibration/mod.rs
pub mod api;
pub mod constants;
pub mod discharge;
pub mod error;
pub mod physics;
pub mod pipeline;
pub mod plot;
pub mod readings;
pub mod regression;
pub mod report;
// Re-export the types callers usually need.
pub use api::{handle_json, process_request, ErrorResponse, ExperimentRequest, ExperimentResponse};
pub use constants::PhysicalConstants;
pub use discharge::{estimate_discharge, CalibrationPoint, CvStatistics, DischargeEstimate};
pub use error::{CalibrationError, Series, ValidationError};
pub use physics::{
    compute_velocities, orifice_velocity, pitot_velocity, VelocitySample, VelocitySet,
};
pub use pipeline::{CalibrationPipeline, Diagnostics, ExperimentReport};
pub use plot::{render_calibration_png, AxisLabels, ChartRenderer, PlotStyle, PlottersRenderer};
pub use readings::{validate_readings, Reading, ReadingSet, ValidatedReadings};
pub use regression::{fit_linear, ModelFit};
pub use report::{PdfReportBuilder, ReportBuilder, ReportInput};
