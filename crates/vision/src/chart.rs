//! Rasterizes telemetry series into a chart image for the display sink.
//!
//! Text rendering is intentionally absent; the chart carries a frame,
//! gridlines, and one polyline per enabled series with a cycling palette.
//! Axis labelling belongs to the pluggable visualization layer.

use crate::overlay::{draw_line, Color};
use world::{Image, Line};

const PALETTE: [Color; 6] = [
    Color(86, 156, 214),
    Color(220, 170, 60),
    Color(120, 200, 120),
    Color(210, 100, 180),
    Color(120, 210, 210),
    Color(230, 110, 80),
];

/// Dimensions and margins of the rendered chart.
#[derive(Clone, Copy, Debug)]
pub struct ChartStyle {
    /// Output image width.
    pub width: u32,
    /// Output image height.
    pub height: u32,
    /// Margin around the plot area, pixels.
    pub margin: u32,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            margin: 16,
        }
    }
}

/// One series to plot: a name (reserved for future labelling) and its points.
pub struct ChartSeries<'a> {
    /// Series name.
    pub name: &'a str,
    /// `(t, value)` points in ascending `t` order.
    pub points: &'a [(f64, f64)],
}

/// Renders the chart; series index selects the palette color.
pub fn render_chart(series: &[ChartSeries<'_>], style: &ChartStyle) -> Image {
    let mut img = Image::new_u8(style.width, style.height, 3);
    fill(&mut img, Color::CHART_BG);

    let m = style.margin as i32;
    let w = style.width as i32;
    let h = style.height as i32;
    draw_frame(&mut img, m, w, h);

    // Shared bounds across series so curves are comparable.
    let mut t_min = f64::INFINITY;
    let mut t_max = f64::NEG_INFINITY;
    let mut v_min = f64::INFINITY;
    let mut v_max = f64::NEG_INFINITY;
    for s in series {
        for &(t, v) in s.points {
            t_min = t_min.min(t);
            t_max = t_max.max(t);
            v_min = v_min.min(v);
            v_max = v_max.max(v);
        }
    }
    if !t_min.is_finite() || series.iter().all(|s| s.points.len() < 2) {
        return img;
    }
    if (t_max - t_min).abs() < f64::EPSILON {
        t_max = t_min + 1.0;
    }
    if (v_max - v_min).abs() < f64::EPSILON {
        v_max = v_min + 1.0;
        v_min -= 1.0;
    }

    let plot_w = (w - 2 * m).max(1) as f64;
    let plot_h = (h - 2 * m).max(1) as f64;
    let to_px = |t: f64, v: f64| -> (i32, i32) {
        let x = m as f64 + (t - t_min) / (t_max - t_min) * plot_w;
        let y = (h - m) as f64 - (v - v_min) / (v_max - v_min) * plot_h;
        (x.round() as i32, y.round() as i32)
    };

    for (idx, s) in series.iter().enumerate() {
        let color = PALETTE[idx % PALETTE.len()];
        for pair in s.points.windows(2) {
            let (x1, y1) = to_px(pair[0].0, pair[0].1);
            let (x2, y2) = to_px(pair[1].0, pair[1].1);
            draw_line(&mut img, Line::new(x1, y1, x2, y2), color, 1);
        }
    }

    img
}

fn fill(img: &mut Image, color: Color) {
    for px in img.pixels.chunks_exact_mut(3) {
        px[0] = color.0;
        px[1] = color.1;
        px[2] = color.2;
    }
}

fn draw_frame(img: &mut Image, m: i32, w: i32, h: i32) {
    let axis = Color::CHART_AXIS;
    draw_line(img, Line::new(m, m, w - m, m), axis, 1);
    draw_line(img, Line::new(m, h - m, w - m, h - m), axis, 1);
    draw_line(img, Line::new(m, m, m, h - m), axis, 1);
    draw_line(img, Line::new(w - m, m, w - m, h - m), axis, 1);

    // Quarter gridlines.
    for q in 1..4 {
        let y = m + (h - 2 * m) * q / 4;
        draw_line(img, Line::new(m, y, w - m, y), axis, 1);
    }
}
