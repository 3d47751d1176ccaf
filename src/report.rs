//! End-of-session summary: a text report and a pie-chart PNG.

use std::path::Path;

use chrono::Local;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use plotters::prelude::*;
use thiserror::Error;
use tracing::warn;

use crate::analyzer::Emotion;
use crate::session::SessionState;

/// Where the binary writes the chart on shutdown.
pub const CHART_FILE: &str = "emotion_report.png";

const CHART_WIDTH: u32 = 1000;
const CHART_HEIGHT: u32 = 600;

/// Slice palette, cycled when more labels appear than colors.
const PALETTE: [RGBColor; 6] = [
    RGBColor(0xff, 0x99, 0x99),
    RGBColor(0x66, 0xb3, 0xff),
    RGBColor(0x99, 0xff, 0x99),
    RGBColor(0xff, 0xcc, 0x99),
    RGBColor(0xff, 0x99, 0xcc),
    RGBColor(0xc2, 0xc2, 0xf0),
];

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("chart drawing failed: {0}")]
    Draw(String),
    #[error("png encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Always a text block, plus chart bytes when at least one frame was
/// analyzed and rendering succeeded.
#[derive(Debug)]
pub struct Report {
    pub text: String,
    pub chart_png: Option<Vec<u8>>,
}

/// Build the end-of-session report. A session with no analyzed frames
/// yields the no-data text; a chart failure degrades to a text-only report.
pub fn generate(session: &SessionState) -> Report {
    if session.frame_count() == 0 {
        return Report {
            text: "No emotion data was captured.\n".to_string(),
            chart_png: None,
        };
    }

    let text = format_text(session);
    let chart_png = match render_pie_chart(&session.percentages()) {
        Ok(png) => Some(png),
        Err(err) => {
            warn!("chart rendering failed, emitting a text-only report: {err}");
            None
        }
    };
    Report { text, chart_png }
}

/// Write the chart when one was produced. Returns whether anything was
/// written.
pub fn save_chart(report: &Report, path: &Path) -> std::io::Result<bool> {
    match &report.chart_png {
        Some(png) => {
            std::fs::write(path, png)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn format_text(session: &SessionState) -> String {
    let mut text = String::from("Emotion Analysis Report\n");
    text.push_str(&format!(
        "Generated: {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    text.push_str(&format!(
        "Duration: {:.2} seconds\n",
        session.elapsed().as_secs_f64()
    ));
    text.push_str(&format!("Frames analyzed: {}\n\n", session.frame_count()));
    text.push_str("Emotion breakdown:\n");
    for (emotion, share) in session.percentages() {
        text.push_str(&format!("{emotion}: {share:.2}%\n"));
    }
    text
}

/// Render the distribution as a pie chart and encode it as PNG bytes.
pub fn render_pie_chart(shares: &[(Emotion, f64)]) -> Result<Vec<u8>, ChartError> {
    let mut rgb = vec![0u8; (CHART_WIDTH * CHART_HEIGHT * 3) as usize];
    {
        let root =
            BitMapBackend::with_buffer(&mut rgb, (CHART_WIDTH, CHART_HEIGHT)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_error)?;
        let root = root
            .titled("Emotion Distribution", ("sans-serif", 30))
            .map_err(draw_error)?;

        let sizes: Vec<f64> = shares.iter().map(|(_, share)| *share).collect();
        let labels: Vec<String> = shares
            .iter()
            .map(|(emotion, _)| emotion.to_string())
            .collect();
        let colors: Vec<RGBColor> = (0..shares.len())
            .map(|i| PALETTE[i % PALETTE.len()])
            .collect();

        let center = (CHART_WIDTH as i32 / 2, CHART_HEIGHT as i32 / 2);
        let radius = 230.0;
        let mut pie = Pie::new(&center, &radius, &sizes, &colors, &labels);
        pie.start_angle(90.0);
        pie.label_style(("sans-serif", 20).into_font());
        pie.percentages(("sans-serif", 16).into_font().color(&BLACK));
        root.draw(&pie).map_err(draw_error)?;
        root.present().map_err(draw_error)?;
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(&rgb, CHART_WIDTH, CHART_HEIGHT, ExtendedColorType::Rgb8)?;
    Ok(png)
}

fn draw_error<E: std::fmt::Display>(err: E) -> ChartError {
    ChartError::Draw(err.to_string())
}
