use chrono::{DateTime, Utc};
use log::{debug, info};
use serde_json::Value;

use crate::calibration::constants::PhysicalConstants;
use crate::calibration::discharge::{estimate_discharge, CalibrationPoint, CvStatistics};
use crate::calibration::error::CalibrationError;
use crate::calibration::physics::compute_velocities;
use crate::calibration::plot::{AxisLabels, ChartRenderer, PlottersRenderer};
use crate::calibration::readings::{validate_readings, ReadingSet};
use crate::calibration::regression::{fit_linear, ModelFit};
use crate::calibration::report::{PdfReportBuilder, ReportBuilder, ReportInput};

/// Tolerances applied during a run, surfaced to the caller.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    pub clamped_radicands: usize,
    pub excluded_indices: Vec<usize>,
}

/// Result of one pipeline run. The pipeline keeps nothing once it is returned.
#[derive(Clone, Debug)]
pub struct ExperimentReport {
    pub points: Vec<CalibrationPoint>,
    pub mean_cv: f64,
    pub statistics: CvStatistics,
    pub fit: ModelFit,
    pub diagnostics: Diagnostics,
    pub constants: PhysicalConstants,
    pub generated_at: DateTime<Utc>,
    /// PNG chart.
    pub graph_bytes: Vec<u8>,
    /// PDF report.
    pub report_bytes: Vec<u8>,
}

/// Linear data-reduction pipeline over an immutable renderer and report builder.
///
/// Holds no per-run state, so one instance can serve any number of
/// independent runs.
pub struct CalibrationPipeline<
    R: ChartRenderer = PlottersRenderer,
    B: ReportBuilder = PdfReportBuilder,
> {
    renderer: R,
    report_builder: B,
}

impl Default for CalibrationPipeline {
    fn default() -> Self {
        Self::new(PlottersRenderer::default(), PdfReportBuilder::default())
    }
}

impl<R: ChartRenderer, B: ReportBuilder> CalibrationPipeline<R, B> {
    pub fn new(renderer: R, report_builder: B) -> Self {
        Self {
            renderer,
            report_builder,
        }
    }

    /// Validates raw JSON readings and runs every stage.
    pub fn run_raw(
        &self,
        orifice: &[Value],
        pitot: &[Value],
        constants: &PhysicalConstants,
        labels: &AxisLabels,
        generated_at: DateTime<Utc>,
    ) -> Result<ExperimentReport, CalibrationError> {
        let validated = validate_readings(orifice, pitot)?;
        debug!("validated {} reading pairs", validated.len());
        let readings = validated.to_reading_set()?;
        self.run(&readings, constants, labels, generated_at)
    }

    /// Velocities, discharge estimate, fit, chart and report over an already
    /// validated reading set.
    pub fn run(
        &self,
        readings: &ReadingSet,
        constants: &PhysicalConstants,
        labels: &AxisLabels,
        generated_at: DateTime<Utc>,
    ) -> Result<ExperimentReport, CalibrationError> {
        constants.validate()?;
        let velocities = compute_velocities(readings, constants)?;
        debug!(
            "computed velocities for {} readings ({} clamped radicands)",
            velocities.samples.len(),
            velocities.clamped
        );

        let estimate = estimate_discharge(&velocities.samples)?;
        debug!(
            "mean Cv {:.6} over {} points, {} excluded",
            estimate.mean_cv(),
            estimate.points.len(),
            estimate.excluded.len()
        );

        let fit = fit_linear(&estimate.points)?;
        debug!("fitted {} (R² = {:.6})", fit.equation_text, fit.r_squared);

        let graph_bytes = self.renderer.render(&estimate.points, &fit, labels)?;
        debug!("rendered chart ({} bytes)", graph_bytes.len());

        let report_bytes = self.report_builder.build(&ReportInput {
            estimate: &estimate,
            fit: &fit,
            chart_png: &graph_bytes,
            clamped: velocities.clamped,
            generated_at,
        })?;
        debug!("assembled report ({} bytes)", report_bytes.len());

        info!(
            "calibration run: {} readings, mean Cv {:.4}, {}",
            readings.len(),
            estimate.mean_cv(),
            fit.equation_text
        );
        Ok(ExperimentReport {
            mean_cv: estimate.mean_cv(),
            statistics: estimate.statistics,
            diagnostics: Diagnostics {
                clamped_radicands: velocities.clamped,
                excluded_indices: estimate.excluded,
            },
            points: estimate.points,
            fit,
            constants: *constants,
            generated_at,
            graph_bytes,
            report_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::error::ValidationError;
    use crate::calibration::physics::{orifice_velocity, pitot_velocity};
    use crate::calibration::readings::Reading;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use std::cell::Cell;

    /// Records calls and returns fixed bytes.
    #[derive(Default)]
    struct StubRenderer {
        calls: Cell<usize>,
    }

    impl ChartRenderer for StubRenderer {
        fn render(
            &self,
            points: &[CalibrationPoint],
            fit: &ModelFit,
            labels: &AxisLabels,
        ) -> Result<Vec<u8>, CalibrationError> {
            self.calls.set(self.calls.get() + 1);
            let text = format!("{}|{}|{}|{}", points.len(), fit.equation_text, labels.y, labels.x);
            Ok(text.into_bytes())
        }
    }

    #[derive(Default)]
    struct StubReport {
        calls: Cell<usize>,
    }

    impl ReportBuilder for StubReport {
        fn build(&self, input: &ReportInput<'_>) -> Result<Vec<u8>, CalibrationError> {
            self.calls.set(self.calls.get() + 1);
            let mut bytes = b"REPORT:".to_vec();
            bytes.extend_from_slice(input.chart_png);
            Ok(bytes)
        }
    }

    struct FailingRenderer;

    impl ChartRenderer for FailingRenderer {
        fn render(
            &self,
            _: &[CalibrationPoint],
            _: &ModelFit,
            _: &AxisLabels,
        ) -> Result<Vec<u8>, CalibrationError> {
            Err(CalibrationError::Render("backend unavailable".into()))
        }
    }

    fn stub_pipeline() -> CalibrationPipeline<StubRenderer, StubReport> {
        CalibrationPipeline::new(StubRenderer::default(), StubReport::default())
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    fn noisy_readings(n: usize, seed: u64) -> ReadingSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let readings = (0..n)
            .map(|i| {
                let head = 0.05 + 0.02 * i as f64;
                let dp = 400.0 + 150.0 * i as f64;
                Reading::new(
                    head * rng.gen_range(0.95..1.05),
                    dp * rng.gen_range(0.95..1.05),
                )
            })
            .collect();
        ReadingSet::new(readings).unwrap()
    }

    fn run_stub(
        pipeline: &CalibrationPipeline<StubRenderer, StubReport>,
        readings: &ReadingSet,
    ) -> Result<ExperimentReport, CalibrationError> {
        pipeline.run(
            readings,
            &PhysicalConstants::default(),
            &AxisLabels::default(),
            fixed_time(),
        )
    }

    #[test]
    fn mean_cv_matches_recomputation() {
        let pipeline = stub_pipeline();
        for (n, seed) in [(5, 11), (50, 12)] {
            let readings = noisy_readings(n, seed);
            let report = run_stub(&pipeline, &readings).unwrap();
            assert_eq!(report.points.len() + report.diagnostics.excluded_indices.len(), n);
            let constants = PhysicalConstants::default();
            let cvs: Vec<f64> = readings
                .iter()
                .map(|r| {
                    orifice_velocity(r.orifice_raw, &constants)
                        / pitot_velocity(r.pitot_raw, &constants)
                })
                .collect();
            let expected = cvs.iter().sum::<f64>() / cvs.len() as f64;
            assert!((report.mean_cv - expected).abs() < 1e-9, "n = {n}");
        }
    }

    #[test]
    fn single_reading_estimates_then_fails_fit() {
        let constants = PhysicalConstants::default();
        let readings = ReadingSet::new(vec![Reading::new(4.0, 2.0)]).unwrap();
        let velocities = compute_velocities(&readings, &constants).unwrap();
        let estimate = estimate_discharge(&velocities.samples).unwrap();
        let v0 = 0.61 * (2.0 * 9.81 * 4.0 / (1.0 - 0.5_f64 * 0.5)).sqrt();
        let vp = (2.0 * 2.0 / 1000.0_f64).sqrt();
        assert!((estimate.points[0].cv - v0 / vp).abs() < 1e-9);
        assert_eq!(estimate.mean_cv(), estimate.points[0].cv);

        let pipeline = stub_pipeline();
        assert!(matches!(
            run_stub(&pipeline, &readings),
            Err(CalibrationError::DegenerateFit { points: 1 })
        ));
        assert_eq!(pipeline.renderer.calls.get(), 0);
        assert_eq!(pipeline.report_builder.calls.get(), 0);
    }

    #[test]
    fn equal_pitot_velocities_produce_no_artifacts() {
        let readings = ReadingSet::new(vec![
            Reading::new(0.1, 500.0),
            Reading::new(0.2, 500.0),
            Reading::new(0.3, 500.0),
        ])
        .unwrap();
        let pipeline = stub_pipeline();
        assert!(matches!(
            run_stub(&pipeline, &readings),
            Err(CalibrationError::DegenerateFit { points: 3 })
        ));
        assert_eq!(pipeline.renderer.calls.get(), 0);
        assert_eq!(pipeline.report_builder.calls.get(), 0);
    }

    #[test]
    fn all_zero_pitot_is_insufficient_data() {
        let readings =
            ReadingSet::new(vec![Reading::new(0.1, 0.0), Reading::new(0.2, -1.0)]).unwrap();
        let pipeline = stub_pipeline();
        match run_stub(&pipeline, &readings) {
            Err(CalibrationError::InsufficientData { excluded }) => assert_eq!(excluded, 2),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(pipeline.renderer.calls.get(), 0);
    }

    #[test]
    fn exclusions_and_clamps_are_reported() {
        let readings = ReadingSet::new(vec![
            Reading::new(0.10, 300.0),
            Reading::new(0.20, 0.0),
            Reading::new(-0.01, 700.0),
            Reading::new(0.40, 1200.0),
        ])
        .unwrap();
        let report = run_stub(&stub_pipeline(), &readings).unwrap();
        assert_eq!(report.diagnostics.excluded_indices, vec![2]);
        assert_eq!(report.diagnostics.clamped_radicands, 1);
        let indices: Vec<usize> = report.points.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 3, 4]);
        assert_eq!(report.points[1].v0, 0.0);
    }

    #[test]
    fn artifacts_flow_into_report() {
        let report = run_stub(&stub_pipeline(), &noisy_readings(6, 3)).unwrap();
        let expected_graph = format!("6|{}|V0|Vp", report.fit.equation_text).into_bytes();
        assert_eq!(report.graph_bytes, expected_graph);
        assert!(report.report_bytes.starts_with(b"REPORT:"));
        assert!(report.report_bytes.ends_with(&expected_graph));
    }

    #[test]
    fn mismatched_raw_lengths_fail_before_computation() {
        let pipeline = stub_pipeline();
        let orifice = vec![json!([1.0, 1.0]), json!([2.0, 2.0]), json!([3.0, 3.0])];
        let pitot = vec![json!([1.0, 1.0]), json!([2.0, 2.0])];
        let result = pipeline.run_raw(
            &orifice,
            &pitot,
            &PhysicalConstants::default(),
            &AxisLabels::default(),
            fixed_time(),
        );
        match result {
            Err(err @ CalibrationError::Validation(_)) => assert_eq!(err.kind(), "ValidationError"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(pipeline.renderer.calls.get(), 0);
    }

    #[test]
    fn render_failures_abort_the_run() {
        let pipeline = CalibrationPipeline::new(FailingRenderer, StubReport::default());
        let result = pipeline.run(
            &noisy_readings(4, 9),
            &PhysicalConstants::default(),
            &AxisLabels::default(),
            fixed_time(),
        );
        assert!(matches!(result, Err(CalibrationError::Render(_))));
        assert_eq!(pipeline.report_builder.calls.get(), 0);
    }

    #[test]
    fn invalid_constants_are_rejected() {
        let constants = PhysicalConstants {
            rho: 0.0,
            ..PhysicalConstants::default()
        };
        let result = stub_pipeline().run(
            &noisy_readings(3, 1),
            &constants,
            &AxisLabels::default(),
            fixed_time(),
        );
        assert!(matches!(result, Err(CalibrationError::Validation(_))));
    }

    #[test]
    fn default_pipeline_is_reproducible() {
        let pipeline = CalibrationPipeline::default();
        let readings = noisy_readings(8, 21);
        let run = || {
            pipeline
                .run(
                    &readings,
                    &PhysicalConstants::default(),
                    &AxisLabels::default(),
                    fixed_time(),
                )
                .unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.fit.equation_text, second.fit.equation_text);
        assert_eq!(first.points, second.points);
        assert_eq!(first.graph_bytes, second.graph_bytes);
        assert_eq!(first.report_bytes, second.report_bytes);
        assert!(first.report_bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn overflowing_readings_fail_fast_on_the_default_pipeline() {
        let pipeline = CalibrationPipeline::default();
        let orifice = vec![json!([1e308, 1e308]), json!([1e307, 1e307]), json!([1, 1])];
        let pitot = vec![json!([1, 1]), json!([2, 2]), json!([3, 3])];
        let result = pipeline.run_raw(
            &orifice,
            &pitot,
            &PhysicalConstants::default(),
            &AxisLabels::default(),
            fixed_time(),
        );
        match result {
            Err(CalibrationError::Validation(ValidationError::OutOfRange { index, quantity })) => {
                assert_eq!((index, quantity), (1, "V0"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn subnormal_pitot_reading_is_a_typed_error() {
        let readings = ReadingSet::new(vec![
            Reading::new(1e300, 1e-320),
            Reading::new(0.2, 600.0),
            Reading::new(0.3, 900.0),
        ])
        .unwrap();
        let pipeline = stub_pipeline();
        match run_stub(&pipeline, &readings) {
            Err(err @ CalibrationError::Validation(ValidationError::OutOfRange { .. })) => {
                assert_eq!(err.to_string(), "reading #1 is out of range: Cv is not finite");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(pipeline.renderer.calls.get(), 0);
    }

    #[test]
    fn large_finite_readings_keep_every_output_finite() {
        let readings = ReadingSet::new(vec![
            Reading::new(1e300, 400.0),
            Reading::new(1e299, 800.0),
            Reading::new(0.3, 1200.0),
        ])
        .unwrap();
        let report = run_stub(&stub_pipeline(), &readings).unwrap();
        assert!(report.mean_cv.is_finite());
        assert!(report.statistics.std_dev.is_finite());
        assert!(report.fit.slope.is_finite() && report.fit.intercept.is_finite());
        assert!(!report.fit.equation_text.contains("NaN"));
    }
}
