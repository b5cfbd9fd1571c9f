//! PDF report for one calibration run.
//!
//! Layout on A4, top to bottom: title, generation time, summary block, the
//! chart scaled to the text width, then the results table. The table
//! continues on new pages (header repeated) when it runs past the bottom
//! margin. Text uses the builtin Helvetica faces with WinAnsi encoding.

use chrono::{DateTime, Utc};
use image::ImageFormat;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::calibration::discharge::DischargeEstimate;
use crate::calibration::error::CalibrationError;
use crate::calibration::regression::ModelFit;

/// Everything a report needs from one run.
#[derive(Clone, Copy, Debug)]
pub struct ReportInput<'a> {
    pub estimate: &'a DischargeEstimate,
    pub fit: &'a ModelFit,
    pub chart_png: &'a [u8],
    pub clamped: usize,
    pub generated_at: DateTime<Utc>,
}

pub trait ReportBuilder {
    fn build(&self, input: &ReportInput<'_>) -> Result<Vec<u8>, CalibrationError>;
}

#[derive(Clone, Debug)]
pub struct PdfReportBuilder {
    pub title: String,
    /// Page size in points.
    pub page_width: i64,
    pub page_height: i64,
    pub margin: i64,
}

impl Default for PdfReportBuilder {
    fn default() -> Self {
        Self {
            title: "LabMateAI - Pitot Tube Experiment Report".into(),
            page_width: 595,
            page_height: 842,
            margin: 56,
        }
    }
}

const REGULAR: &str = "F1";
const BOLD: &str = "F2";
const CHART: &str = "Im1";
const ROW_HEIGHT: i64 = 16;
const COLUMN_OFFSETS: [i64; 4] = [0, 60, 200, 340];
const TABLE_WIDTH: i64 = 480;
const DARK_BLUE: [f32; 3] = [0.0, 0.0, 0.545];
const BEIGE: [f32; 3] = [0.96, 0.96, 0.86];

impl ReportBuilder for PdfReportBuilder {
    fn build(&self, input: &ReportInput<'_>) -> Result<Vec<u8>, CalibrationError> {
        let chart = image::load_from_memory_with_format(input.chart_png, ImageFormat::Png)
            .map_err(|e| CalibrationError::Report(format!("cannot embed chart: {e}")))?
            .to_rgb8();
        let (chart_w, chart_h) = chart.dimensions();
        if chart_w == 0 || chart_h == 0 {
            return Err(CalibrationError::Report("chart image is empty".into()));
        }

        let mut layout = Layout::new(self);
        layout.text(BOLD, 18, &self.title, DARK_BLUE);
        layout.advance(8);
        layout.text(
            REGULAR,
            10,
            &format!(
                "Generated: {}",
                input.generated_at.format("%d-%m-%Y %H:%M:%S UTC")
            ),
            [0.0; 3],
        );
        layout.advance(12);
        self.summary(&mut layout, input);
        layout.advance(12);

        let draw_w = self.page_width - 2 * self.margin;
        let draw_h = draw_w * i64::from(chart_h) / i64::from(chart_w);
        layout.image(draw_w, draw_h);
        layout.advance(16);
        self.table(&mut layout, input.estimate);

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let regular_id = doc.add_object(font("Helvetica"));
        let bold_id = doc.add_object(font("Helvetica-Bold"));
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(chart_w),
                "Height" => i64::from(chart_h),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            chart.into_raw(),
        ));
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                REGULAR => regular_id,
                BOLD => bold_id,
            },
            "XObject" => dictionary! {
                CHART => image_id,
            },
        });

        let mut kids: Vec<Object> = Vec::with_capacity(layout.page_count());
        for operations in layout.finish() {
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }
        let count = kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), self.page_width.into(), self.page_height.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = info(&mut doc, &self.title, input.generated_at);
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        doc.compress();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;
        Ok(bytes)
    }
}

impl PdfReportBuilder {
    fn summary(&self, layout: &mut Layout, input: &ReportInput<'_>) {
        let stats = &input.estimate.statistics;
        layout.text(BOLD, 13, "Summary", [0.0; 3]);
        layout.advance(4);
        let lines = [
            "Formula: Cv = V0/Vp".to_owned(),
            format!(
                "Readings used: {} (excluded: {}, clamped radicands: {})",
                stats.count,
                input.estimate.excluded.len(),
                input.clamped
            ),
            format!("Mean Cv: {:.4}", stats.mean),
            format!("Cv standard deviation: {:.4}", stats.std_dev),
            format!("Cv range: {:.4} to {:.4}", stats.min, stats.max),
            format!("Model: {}", input.fit.equation_text),
            format!("R² = {:.4}", input.fit.r_squared),
        ];
        for line in &lines {
            layout.text(REGULAR, 10, line, [0.0; 3]);
            layout.advance(3);
        }
    }

    fn table(&self, layout: &mut Layout, estimate: &DischargeEstimate) {
        layout.text(BOLD, 13, "Results", [0.0; 3]);
        layout.advance(6);
        layout.ensure(2 * ROW_HEIGHT);
        layout.header_row();
        for point in &estimate.points {
            if layout.remaining() < ROW_HEIGHT {
                layout.new_page();
                layout.header_row();
            }
            layout.row(
                [
                    point.index.to_string(),
                    format!("{:.4}", point.v0),
                    format!("{:.4}", point.vp),
                    format!("{:.4}", point.cv),
                ],
                REGULAR,
                BEIGE,
                [0.0; 3],
            );
        }
    }
}

/// Top-down cursor that collects content operations per page.
struct Layout {
    pages: Vec<Vec<Operation>>,
    top: i64,
    left: i64,
    bottom: i64,
    y: i64,
}

impl Layout {
    fn new(builder: &PdfReportBuilder) -> Self {
        let top = builder.page_height - builder.margin;
        Self {
            pages: vec![Vec::new()],
            top,
            left: builder.margin,
            bottom: builder.margin,
            y: top,
        }
    }

    fn ops(&mut self) -> &mut Vec<Operation> {
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn remaining(&self) -> i64 {
        self.y - self.bottom
    }

    fn advance(&mut self, dy: i64) {
        self.y -= dy;
    }

    fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.y = self.top;
    }

    fn ensure(&mut self, height: i64) {
        if self.remaining() < height && self.y != self.top {
            self.new_page();
        }
    }

    fn text(&mut self, font: &str, size: i64, text: &str, color: [f32; 3]) {
        self.ensure(size);
        self.y -= size;
        let (x, y) = (self.left, self.y);
        put_text(self.ops(), font, size, x, y, text, color);
    }

    fn image(&mut self, width: i64, height: i64) {
        self.ensure(height);
        self.y -= height;
        let (x, y) = (self.left, self.y);
        self.ops().extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width.into(),
                    0.into(),
                    0.into(),
                    height.into(),
                    x.into(),
                    y.into(),
                ],
            ),
            Operation::new("Do", vec![CHART.into()]),
            Operation::new("Q", vec![]),
        ]);
    }

    fn header_row(&mut self) {
        self.row(
            [
                "#".to_owned(),
                "V0 (m/s)".to_owned(),
                "Vp (m/s)".to_owned(),
                "Cv".to_owned(),
            ],
            BOLD,
            DARK_BLUE,
            [1.0; 3],
        );
    }

    fn row(&mut self, cells: [String; 4], font: &str, fill: [f32; 3], text: [f32; 3]) {
        self.y -= ROW_HEIGHT;
        let (left, y) = (self.left, self.y);
        let ops = self.ops();
        ops.push(Operation::new("rg", rgb(fill)));
        ops.push(Operation::new("RG", rgb([0.0; 3])));
        ops.push(Operation::new("w", vec![Object::from(0.5_f32)]));
        ops.push(Operation::new(
            "re",
            vec![left.into(), y.into(), TABLE_WIDTH.into(), ROW_HEIGHT.into()],
        ));
        ops.push(Operation::new("B", vec![]));
        for (cell, offset) in cells.iter().zip(COLUMN_OFFSETS) {
            put_text(ops, font, 9, left + offset + 6, y + 5, cell, text);
        }
    }

    fn finish(self) -> Vec<Vec<Operation>> {
        self.pages
    }
}

fn put_text(
    ops: &mut Vec<Operation>,
    font: &str,
    size: i64,
    x: i64,
    y: i64,
    text: &str,
    color: [f32; 3],
) {
    ops.extend([
        Operation::new("BT", vec![]),
        Operation::new("rg", rgb(color)),
        Operation::new("Tf", vec![font.into(), size.into()]),
        Operation::new("Td", vec![x.into(), y.into()]),
        Operation::new("Tj", vec![Object::string_literal(win_ansi(text))]),
        Operation::new("ET", vec![]),
    ]);
}

fn rgb(color: [f32; 3]) -> Vec<Object> {
    color.iter().map(|&c| Object::from(c)).collect()
}

fn font(base: &str) -> lopdf::Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    }
}

fn info(doc: &mut Document, title: &str, generated_at: DateTime<Utc>) -> ObjectId {
    let stamp = generated_at.format("D:%Y%m%d%H%M%SZ").to_string();
    doc.add_object(dictionary! {
        "Title" => Object::string_literal(win_ansi(title)),
        "Producer" => Object::string_literal("flowcal"),
        "CreationDate" => Object::string_literal(stamp),
    })
}

/// Encodes text for the builtin fonts; characters outside WinAnsi become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '°' => 0xB0,
            '±' => 0xB1,
            '²' => 0xB2,
            '³' => 0xB3,
            'µ' => 0xB5,
            '·' => 0xB7,
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::discharge::{estimate_discharge, DischargeEstimate};
    use crate::calibration::physics::VelocitySample;
    use crate::calibration::regression::fit_linear;
    use chrono::TimeZone;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use std::io::Cursor;

    fn tiny_png() -> Vec<u8> {
        let img = ImageBuffer::from_pixel(6, 4, Rgb([200u8, 30, 30]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn estimate(n: usize) -> (DischargeEstimate, ModelFit) {
        let samples: Vec<VelocitySample> = (1..=n)
            .map(|i| VelocitySample {
                index: i,
                v0: 0.6 * i as f64 + 0.1,
                vp: i as f64,
            })
            .collect();
        let estimate = estimate_discharge(&samples).unwrap();
        let fit = fit_linear(&estimate.points).unwrap();
        (estimate, fit)
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    fn page_text(bytes: &[u8]) -> Vec<Vec<u8>> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|id| doc.get_page_content(*id).unwrap())
            .collect()
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn builds_pdf_with_summary_and_table() {
        let (estimate, fit) = estimate(5);
        let png = tiny_png();
        let input = ReportInput {
            estimate: &estimate,
            fit: &fit,
            chart_png: &png,
            clamped: 2,
            generated_at: fixed_time(),
        };
        let bytes = PdfReportBuilder::default().build(&input).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let pages = page_text(&bytes);
        assert_eq!(pages.len(), 1);
        let content = &pages[0];
        assert!(contains(content, b"Generated: 01-03-2024 12:30:00 UTC"));
        assert!(contains(content, b"clamped radicands: 2"));
        assert!(contains(content, format!("Mean Cv: {:.4}", estimate.mean_cv()).as_bytes()));
        assert!(contains(content, b"Model: V0 = "));
        assert!(contains(content, b"V0 (m/s)"));
        assert!(contains(content, b"Im1 Do"));
    }

    #[test]
    fn long_tables_continue_on_new_pages() {
        let (estimate, fit) = estimate(80);
        let png = tiny_png();
        let input = ReportInput {
            estimate: &estimate,
            fit: &fit,
            chart_png: &png,
            clamped: 0,
            generated_at: fixed_time(),
        };
        let bytes = PdfReportBuilder::default().build(&input).unwrap();
        let pages = page_text(&bytes);
        assert!(pages.len() >= 2);
        // header repeated on every continuation page
        assert!(pages.iter().all(|p| contains(p, b"Cv")));
        assert!(contains(pages.last().unwrap(), b"(80)"));
    }

    #[test]
    fn same_timestamp_gives_identical_bytes() {
        let (estimate, fit) = estimate(4);
        let png = tiny_png();
        let input = ReportInput {
            estimate: &estimate,
            fit: &fit,
            chart_png: &png,
            clamped: 0,
            generated_at: fixed_time(),
        };
        let builder = PdfReportBuilder::default();
        assert_eq!(builder.build(&input).unwrap(), builder.build(&input).unwrap());
    }

    #[test]
    fn undecodable_chart_is_a_report_error() {
        let (estimate, fit) = estimate(3);
        let input = ReportInput {
            estimate: &estimate,
            fit: &fit,
            chart_png: b"not a png",
            clamped: 0,
            generated_at: fixed_time(),
        };
        assert!(matches!(
            PdfReportBuilder::default().build(&input),
            Err(CalibrationError::Report(_))
        ));
    }

    #[test]
    fn win_ansi_maps_symbols() {
        assert_eq!(win_ansi("V0 = 1·Vp"), b"V0 = 1\xB7Vp".to_vec());
        assert_eq!(win_ansi("R²"), b"R\xB2".to_vec());
        assert_eq!(win_ansi("速"), b"?".to_vec());
    }
}
