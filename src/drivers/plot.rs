// src/drivers/plot.rs
use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;

use crate::decoder::TrajectoryPoint;
use crate::error::CoreError;

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub actual: RGBColor,
    pub predicted: RGBColor,
    /// Captions, axis labels and legends. Needs a system font.
    pub text: bool,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 600,
            height: 600,
            background: RGBColor(10, 10, 15),
            actual: CYAN,
            predicted: MAGENTA,
            text: true,
        }
    }
}

impl PlotStyle {
    fn label_area(&self) -> u32 {
        if self.text {
            40
        } else {
            0
        }
    }
}

/// Actual vs predicted cursor path.
pub fn render_trajectory_png(
    points: &[TrajectoryPoint],
    style: &PlotStyle,
) -> Result<Vec<u8>, CoreError> {
    if points.is_empty() {
        return Err(CoreError::Render("trajectory has no points".into()));
    }
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut builder = ChartBuilder::on(&root);
        builder
            .margin(10)
            .set_label_area_size(LabelAreaPosition::Left, style.label_area())
            .set_label_area_size(LabelAreaPosition::Bottom, style.label_area());
        if style.text {
            builder.caption("Decoded trajectory", ("sans-serif", 20).into_font().color(&WHITE));
        }
        let mut chart = builder.build_cartesian_2d(-1.3f64..1.3f64, -1.3f64..1.3f64)?;
        if style.text {
            chart
                .configure_mesh()
                .light_line_style(&WHITE.mix(0.1))
                .draw()?;
        }

        let actual = points.iter().map(|p| p.actual);
        let predicted = points.iter().map(|p| p.predicted);
        let actual_color = style.actual;
        let predicted_color = style.predicted;
        let actual_series = chart.draw_series(LineSeries::new(actual, &actual_color))?;
        if style.text {
            actual_series
                .label("actual")
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &actual_color));
        }
        let predicted_series = chart.draw_series(LineSeries::new(predicted, &predicted_color))?;
        if style.text {
            predicted_series
                .label("predicted")
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 20, y)], &predicted_color)
                });
            chart
                .configure_series_labels()
                .border_style(&WHITE.mix(0.2))
                .background_style(&style.background)
                .draw()?;
        }
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

/// One attention head as a heat map, row `i` at the top.
pub fn render_attention_png(head: &[Vec<f64>], style: &PlotStyle) -> Result<Vec<u8>, CoreError> {
    let size = head.len();
    if size == 0 || head.iter().any(|row| row.len() != size) {
        return Err(CoreError::Render("attention head must be a non-empty square".into()));
    }
    let peak = head
        .iter()
        .flat_map(|row| row.iter().copied())
        .fold(0.0f64, f64::max)
        .max(1e-9);
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut builder = ChartBuilder::on(&root);
        builder.margin(10);
        if style.text {
            builder.caption("Attention", ("sans-serif", 20).into_font().color(&WHITE));
        }
        let n = size as f64;
        let mut chart = builder.build_cartesian_2d(0f64..n, 0f64..n)?;
        chart.draw_series(head.iter().enumerate().flat_map(|(i, row)| {
            row.iter().enumerate().map(move |(j, w)| {
                let t = (w / peak).clamp(0.0, 1.0);
                let shade = RGBColor((40.0 + 215.0 * t) as u8, (20.0 + 120.0 * t) as u8, 60);
                let top = n - i as f64;
                Rectangle::new([(j as f64, top - 1.0), (j as f64 + 1.0, top)], shade.filled())
            })
        }))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CoreError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| CoreError::Render("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn quiet() -> PlotStyle {
        PlotStyle {
            width: 120,
            height: 120,
            text: false,
            ..PlotStyle::default()
        }
    }

    #[test]
    fn trajectory_renders_to_png() {
        let points: Vec<TrajectoryPoint> = (0..20)
            .map(|i| {
                let a = i as f64 * 0.3;
                TrajectoryPoint {
                    actual: (a.cos(), a.sin()),
                    predicted: (a.cos() * 0.9, a.sin() * 0.9),
                    velocity_actual: (0.0, 0.0),
                    velocity_predicted: (0.0, 0.0),
                    timestamp_ms: i * 100,
                    target: None,
                }
            })
            .collect();
        let png = render_trajectory_png(&points, &quiet()).unwrap();
        assert_eq!(png[..8], PNG_MAGIC);
    }

    #[test]
    fn attention_renders_and_rejects_ragged_input() {
        let head = vec![vec![0.25; 4]; 4];
        let png = render_attention_png(&head, &quiet()).unwrap();
        assert_eq!(png[..8], PNG_MAGIC);
        let ragged = vec![vec![0.5, 0.5], vec![1.0]];
        assert!(matches!(
            render_attention_png(&ragged, &quiet()),
            Err(CoreError::Render(_))
        ));
        assert!(render_trajectory_png(&[], &quiet()).is_err());
    }
}
