//! Near-horizontal line detection on grayscale crops.
//!
//! The reference kernel is a restricted probabilistic Hough transform: edge
//! pixels vote over a small fan of angles around horizontal, winning
//! (angle, intercept) bins are walked to find actual supported spans.  Crops
//! are small (a few hundred pixels on a side), which keeps the vote space
//! tiny.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use world::msg::LineBatch;
use world::{Image, Line};

/// Tuning for [`detect_horizontal_lines`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LineParams {
    /// Lower hysteresis threshold for edge strength.
    pub canny_t1: u8,
    /// Upper hysteresis threshold for edge strength.
    pub canny_t2: u8,
    /// Angle step of the vote fan, degrees.
    pub theta_step_deg: f64,
    /// Minimum votes for an (angle, intercept) bin to become a candidate.
    pub hough_threshold: u32,
    /// Minimum supported span in pixels.
    pub min_line_length: u32,
    /// Maximum unsupported gap inside a span.
    pub max_line_gap: u32,
    /// Lines must lie within this angle of horizontal, degrees.
    pub angle_tolerance_deg: f64,
    /// Width of the horizontal morphological close; 0 disables it.
    pub morph_close_size: u32,
}

impl Default for LineParams {
    fn default() -> Self {
        Self {
            canny_t1: 30,
            canny_t2: 90,
            theta_step_deg: 1.0,
            hough_threshold: 50,
            min_line_length: 50,
            max_line_gap: 20,
            angle_tolerance_deg: 5.0,
            morph_close_size: 10,
        }
    }
}

/// At most this many lines are reported per crop.
const MAX_LINES: usize = 32;

/// Detects near-horizontal line segments on a single-channel image.
///
/// Returns segments in crop-local coordinates, unordered; callers sort as
/// needed (the level analyzer sorts by ascending y to find the fill surface).
pub fn detect_horizontal_lines(gray: &Image, params: &LineParams) -> LineBatch {
    let mut lines = LineBatch::new();
    if gray.width < 3 || gray.height < 3 {
        return lines;
    }

    let mut edges = edge_map(gray, params);
    if params.morph_close_size > 0 {
        close_rows(&mut edges, gray.width, params.morph_close_size);
    }

    let w = gray.width as usize;
    let h = gray.height as usize;

    // Vote over a fan of angles around horizontal.
    let tol = params.angle_tolerance_deg.max(0.0);
    let step = params.theta_step_deg.max(0.05);
    let mut tangents = Vec::new();
    let mut angle = -tol;
    while angle <= tol + 1e-9 {
        tangents.push(angle.to_radians().tan());
        angle += step;
    }

    let mut votes: HashMap<(usize, i32), u32> = HashMap::new();
    for y in 0..h {
        for x in 0..w {
            if !edges[y * w + x] {
                continue;
            }
            for (ti, tan) in tangents.iter().enumerate() {
                let b = (y as f64 - x as f64 * tan).round() as i32;
                *votes.entry((ti, b)).or_insert(0) += 1;
            }
        }
    }

    let mut candidates: Vec<((usize, i32), u32)> = votes
        .into_iter()
        .filter(|&(_, n)| n >= params.hough_threshold.max(1))
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    for ((ti, b), _) in candidates {
        if lines.len() >= MAX_LINES {
            break;
        }
        let tan = tangents[ti];
        if let Some(line) = trace_span(&edges, w, h, b, tan, params) {
            suppress(&mut edges, w, h, &line);
            lines.push(line);
        }
    }

    lines
}

/// Vertical-gradient edge map with two-level hysteresis.
fn edge_map(gray: &Image, params: &LineParams) -> Vec<bool> {
    let w = gray.width as usize;
    let h = gray.height as usize;
    let lo = params.canny_t1.min(params.canny_t2) as i32;
    let hi = params.canny_t1.max(params.canny_t2) as i32;

    let mut strong = vec![false; w * h];
    let mut weak = vec![false; w * h];
    for y in 1..h - 1 {
        for x in 0..w {
            let g = (gray.get(x as u32, y as u32 + 1) as i32
                - gray.get(x as u32, y as u32 - 1) as i32)
                .abs();
            if g >= hi {
                strong[y * w + x] = true;
            } else if g >= lo {
                weak[y * w + x] = true;
            }
        }
    }

    // Promote weak pixels that touch a strong one.
    let mut edges = strong.clone();
    for y in 1..h - 1 {
        for x in 0..w {
            if !weak[y * w + x] {
                continue;
            }
            'scan: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let ny = y as i32 + dy;
                    let nx = x as i32 + dx;
                    if nx >= 0 && nx < w as i32 && ny >= 0 && ny < h as i32
                        && strong[ny as usize * w + nx as usize]
                    {
                        edges[y * w + x] = true;
                        break 'scan;
                    }
                }
            }
        }
    }
    edges
}

/// Fills sub-`size` gaps inside each row (dilate-then-erode along x).
fn close_rows(edges: &mut [bool], width: u32, size: u32) {
    let w = width as usize;
    let k = size as usize;
    for row in edges.chunks_mut(w) {
        let mut x = 0;
        while x < w {
            if row[x] {
                x += 1;
                continue;
            }
            let gap_start = x;
            while x < w && !row[x] {
                x += 1;
            }
            let bounded = gap_start > 0 && x < w;
            if bounded && x - gap_start < k {
                row[gap_start..x].fill(true);
            }
        }
    }
}

/// Walks the line `y = b + x·tan` and returns the longest supported span.
fn trace_span(
    edges: &[bool],
    w: usize,
    h: usize,
    b: i32,
    tan: f64,
    params: &LineParams,
) -> Option<Line> {
    let mut best: Option<(usize, usize)> = None;
    let mut start: Option<usize> = None;
    let mut last_hit = 0usize;
    let mut gap = 0usize;

    for x in 0..w {
        let y = (b as f64 + x as f64 * tan).round() as i32;
        let hit = (0..h as i32).contains(&y) && {
            // Tolerate one row of jitter around the ideal path.
            let y = y as usize;
            edges[y * w + x]
                || (y > 0 && edges[(y - 1) * w + x])
                || (y + 1 < h && edges[(y + 1) * w + x])
        };

        if hit {
            if start.is_none() {
                start = Some(x);
            }
            last_hit = x;
            gap = 0;
        } else if let Some(s) = start {
            gap += 1;
            if gap > params.max_line_gap as usize {
                consider(&mut best, s, last_hit);
                start = None;
                gap = 0;
            }
        }
    }
    if let Some(s) = start {
        consider(&mut best, s, last_hit);
    }

    let (x1, x2) = best?;
    if (x2 - x1) as u32 + 1 < params.min_line_length.max(2) {
        return None;
    }
    let y1 = (b as f64 + x1 as f64 * tan).round() as i32;
    let y2 = (b as f64 + x2 as f64 * tan).round() as i32;
    Some(Line::new(x1 as i32, y1, x2 as i32, y2))
}

fn consider(best: &mut Option<(usize, usize)>, start: usize, end: usize) {
    let longer = best.map_or(true, |(b0, b1)| end - start > b1 - b0);
    if longer {
        *best = Some((start, end));
    }
}

/// Clears edge pixels along an accepted line so weaker duplicates of the
/// same physical edge do not re-fire.
fn suppress(edges: &mut [bool], w: usize, h: usize, line: &Line) {
    let dx = (line.x2 - line.x1).max(1) as f64;
    let slope = (line.y2 - line.y1) as f64 / dx;
    for x in line.x1..=line.x2 {
        let y = (line.y1 as f64 + (x - line.x1) as f64 * slope).round() as i32;
        for dy in -1i32..=1 {
            let ny = y + dy;
            if x >= 0 && (x as usize) < w && ny >= 0 && (ny as usize) < h {
                edges[ny as usize * w + x as usize] = false;
            }
        }
    }
}
