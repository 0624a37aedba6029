//! Drawing primitives for composing render output.

use world::{Image, Line};

/// An RGB color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    /// Acceptance-band pass.
    pub const GREEN: Color = Color(40, 200, 60);
    /// Acceptance-band fail.
    pub const RED: Color = Color(220, 50, 40);
    /// Cap line overlay.
    pub const YELLOW: Color = Color(230, 200, 40);
    /// Chart background.
    pub const CHART_BG: Color = Color(24, 24, 28);
    /// Chart axes and frame.
    pub const CHART_AXIS: Color = Color(90, 90, 100);

    fn bytes(self) -> [u8; 3] {
        [self.0, self.1, self.2]
    }
}

/// Draws a line segment (Bresenham) onto a 3-channel image; endpoints may lie
/// outside, out-of-bounds pixels are clipped.
pub fn draw_line(img: &mut Image, line: Line, color: Color, thickness: u32) {
    let px = color.bytes();
    let t = thickness.max(1) as i32;

    let (mut x, mut y) = (line.x1, line.y1);
    let dx = (line.x2 - line.x1).abs();
    let dy = -(line.y2 - line.y1).abs();
    let sx = if line.x1 < line.x2 { 1 } else { -1 };
    let sy = if line.y1 < line.y2 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        for off in 0..t {
            let yy = y + off - t / 2;
            if x >= 0 && yy >= 0 {
                img.put(x as u32, yy as u32, &px);
            }
        }
        if x == line.x2 && y == line.y2 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Draws an unfilled axis-aligned rectangle.
pub fn draw_rect(img: &mut Image, x: i32, y: i32, w: u32, h: u32, color: Color) {
    let x1 = x + w as i32 - 1;
    let y1 = y + h as i32 - 1;
    draw_line(img, Line::new(x, y, x1, y), color, 1);
    draw_line(img, Line::new(x, y1, x1, y1), color, 1);
    draw_line(img, Line::new(x, y, x, y1), color, 1);
    draw_line(img, Line::new(x1, y, x1, y1), color, 1);
}
