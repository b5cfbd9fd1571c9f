use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;

use crate::calibration::discharge::CalibrationPoint;
use crate::calibration::error::{CalibrationError, ValidationError};
use crate::calibration::regression::ModelFit;

/// Axis descriptions, taken from the request's `graph_params = [y, x]`.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisLabels {
    pub y: String,
    pub x: String,
}

impl Default for AxisLabels {
    fn default() -> Self {
        Self {
            y: "V0".into(),
            x: "Vp".into(),
        }
    }
}

impl AxisLabels {
    pub fn from_params(params: &[String]) -> Result<Self, ValidationError> {
        match params {
            [y, x] => Ok(Self {
                y: y.clone(),
                x: x.clone(),
            }),
            _ => Err(ValidationError::LabelCount(params.len())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub foreground: RGBColor,
    pub point_color: RGBColor,
    pub line_color: RGBColor,
    pub point_radius: u32,
    pub line_width: u32,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 600,
            background: WHITE,
            foreground: BLACK,
            point_color: BLUE,
            line_color: RED,
            point_radius: 4,
            line_width: 2,
        }
    }
}

/// Turns calibration points and their fit into an encoded image.
pub trait ChartRenderer {
    fn render(
        &self,
        points: &[CalibrationPoint],
        fit: &ModelFit,
        labels: &AxisLabels,
    ) -> Result<Vec<u8>, CalibrationError>;
}

/// PNG chart drawn with plotters into an in-memory bitmap.
#[derive(Clone, Debug, Default)]
pub struct PlottersRenderer {
    pub style: PlotStyle,
}

impl PlottersRenderer {
    pub fn new(style: PlotStyle) -> Self {
        Self { style }
    }
}

impl ChartRenderer for PlottersRenderer {
    fn render(
        &self,
        points: &[CalibrationPoint],
        fit: &ModelFit,
        labels: &AxisLabels,
    ) -> Result<Vec<u8>, CalibrationError> {
        render_calibration_png(points, fit, labels, &self.style)
    }
}

pub fn render_calibration_png(
    points: &[CalibrationPoint],
    fit: &ModelFit,
    labels: &AxisLabels,
    style: &PlotStyle,
) -> Result<Vec<u8>, CalibrationError> {
    if points.is_empty() {
        return Err(CalibrationError::Render("no calibration points to plot".into()));
    }
    let (vp_min, vp_max) = bounds(points.iter().map(|p| p.vp));
    let line = [(vp_min, fit.predict(vp_min)), (vp_max, fit.predict(vp_max))];
    let (v0_min, v0_max) =
        bounds(points.iter().map(|p| p.v0).chain(line.iter().map(|p| p.1)));
    let x_range = padded(vp_min, vp_max);
    let y_range = padded(v0_min, v0_max);
    let finite_data = points.iter().all(|p| p.vp.is_finite() && p.v0.is_finite())
        && line.iter().all(|&(x, y)| x.is_finite() && y.is_finite());
    if !(finite_data && drawable(x_range) && drawable(y_range)) {
        return Err(CalibrationError::Render(format!(
            "chart range is not finite (Vp {x_range:?}, V0 {y_range:?})"
        )));
    }

    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let text = style.foreground;
        let mut chart = ChartBuilder::on(&root)
            .margin(15)
            .caption(
                format!("{} vs {}", labels.y, labels.x),
                ("sans-serif", 22).into_font().color(&text),
            )
            .set_label_area_size(LabelAreaPosition::Left, 60)
            .set_label_area_size(LabelAreaPosition::Bottom, 50)
            .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)?;
        chart
            .configure_mesh()
            .x_desc(labels.x.as_str())
            .y_desc(labels.y.as_str())
            .axis_desc_style(("sans-serif", 16).into_font().color(&text))
            .label_style(("sans-serif", 13).into_font().color(&text))
            .x_label_formatter(&|v| format!("{v:.3}"))
            .y_label_formatter(&|v| format!("{v:.3}"))
            .light_line_style(&text.mix(0.08))
            .draw()?;

        let point_color = style.point_color;
        let radius = style.point_radius;
        chart
            .draw_series(
                points
                    .iter()
                    .map(|p| Circle::new((p.vp, p.v0), radius, point_color.filled())),
            )?
            .label("Measured")
            .legend(move |(x, y)| Circle::new((x + 10, y), radius, point_color.filled()));

        let line_color = style.line_color;
        let line_width = style.line_width;
        chart
            .draw_series(LineSeries::new(line, line_color.stroke_width(line_width)))?
            .label(fit.equation_text.as_str())
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], line_color.stroke_width(line_width))
            });

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .label_font(("sans-serif", 14).into_font().color(&text))
            .border_style(&text.mix(0.3))
            .background_style(&style.background.mix(0.9))
            .draw()?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// Widens `[lo, hi]` by 5% per side; a zero-width span gets a unit margin.
fn padded(lo: f64, hi: f64) -> (f64, f64) {
    let span = hi - lo;
    let pad = if span > 0.0 {
        span * 0.05
    } else {
        (hi.abs() * 0.05).max(1.0)
    };
    (lo - pad, hi + pad)
}

/// plotters cannot place ticks on a range whose ends or width are not finite.
fn drawable((lo, hi): (f64, f64)) -> bool {
    lo.is_finite() && hi.is_finite() && (hi - lo).is_finite()
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CalibrationError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| CalibrationError::Render("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
