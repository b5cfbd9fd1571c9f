use thiserror::Error;

/// Which of the two reading series a validation failure refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Series {
    Orifice,
    Pitot,
}

impl std::fmt::Display for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Series::Orifice => f.write_str("orifice"),
            Series::Pitot => f.write_str("pitot"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("no {0} readings provided")]
    EmptySeries(Series),
    #[error("mismatched number of orifice and pitot readings: {orifice} vs {pitot}")]
    LengthMismatch {
        orifice: usize,
        pitot: usize,
    },
    #[error("invalid {series} reading #{index}: {reason}")]
    MalformedReading {
        series: Series,
        index: usize,
        reason: String,
    },
    #[error("unknown constant `{0}`")]
    UnknownConstant(String),
    #[error("invalid value for constant `{key}`: {reason}")]
    InvalidConstant {
        key: String,
        reason: String,
    },
    #[error("graph_params must hold exactly two labels, got {0}")]
    LabelCount(usize),
    #[error("malformed request body: {0}")]
    MalformedRequest(String),
    #[error("reading #{index} is out of range: {quantity} is not finite")]
    OutOfRange {
        index: usize,
        quantity: &'static str,
    },
    #[error("readings are out of range: {0} is not finite")]
    Overflow(&'static str),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no usable readings: all {excluded} points have zero Pitot velocity")]
    InsufficientData { excluded: usize },
    #[error("cannot fit calibration line over {points} point(s): Pitot velocities have no spread")]
    DegenerateFit { points: usize },
    #[error("failed to render chart: {0}")]
    Render(String),
    #[error("failed to build report: {0}")]
    Report(String),
}

impl CalibrationError {
    /// Stable name used as the `kind` field of error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            CalibrationError::Validation(_) => "ValidationError",
            CalibrationError::InsufficientData { .. } => "InsufficientDataError",
            CalibrationError::DegenerateFit { .. } => "DegenerateFitError",
            CalibrationError::Render(_) => "RenderError",
            CalibrationError::Report(_) => "ReportError",
        }
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for CalibrationError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        CalibrationError::Render(format!("{value:?}"))
    }
}

impl From<image::ImageError> for CalibrationError {
    fn from(value: image::ImageError) -> Self {
        CalibrationError::Render(value.to_string())
    }
}

impl From<lopdf::Error> for CalibrationError {
    fn from(value: lopdf::Error) -> Self {
        CalibrationError::Report(value.to_string())
    }
}

/// `Document::save_to` reports write failures as plain I/O errors.
impl From<std::io::Error> for CalibrationError {
    fn from(value: std::io::Error) -> Self {
        CalibrationError::Report(value.to_string())
    }
}
