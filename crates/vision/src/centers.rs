//! Bottle-center location on the top band of a frame.
//!
//! Bottles stand against a bright backlight, so their caps show up as dark
//! column runs in the upper part of the frame.  The reference locator builds
//! a column darkness profile over the band and clusters occupied columns into
//! runs; each sufficiently wide run is one bottle.

use serde::{Deserialize, Serialize};
use world::Image;

/// Locates object centers on a grayscale frame.
///
/// Implementations must return centers sorted by ascending x; the detector
/// takes the first four, left to right.
pub trait CenterLocator: Send + Sync {
    /// Returns `(cx, cy)` per detected object, sorted by `cx`.
    fn locate(&self, gray: &Image, band_height: u32) -> Vec<(u32, u32)>;
}

/// Tuning for [`ProfileCenterLocator`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CenterParams {
    /// Pixels darker than this count as object pixels.
    pub threshold: u8,
    /// Minimum run width in columns for a run to count as a bottle
    /// (the contour-area analogue of the profile method).
    pub min_run_width: u32,
    /// Columns may be separated by up to this many bright columns and still
    /// belong to the same run.
    pub max_gap: u32,
}

impl Default for CenterParams {
    fn default() -> Self {
        Self {
            threshold: 90,
            min_run_width: 40,
            max_gap: 8,
        }
    }
}

/// Column-profile center locator.
#[derive(Clone, Debug, Default)]
pub struct ProfileCenterLocator {
    /// Tuning parameters, updatable through the detector's control mailbox.
    pub params: CenterParams,
}

impl ProfileCenterLocator {
    /// Creates a locator with the given tuning.
    pub fn new(params: CenterParams) -> Self {
        Self { params }
    }
}

impl CenterLocator for ProfileCenterLocator {
    fn locate(&self, gray: &Image, band_height: u32) -> Vec<(u32, u32)> {
        let band = band_height.min(gray.height);
        if band == 0 || gray.width == 0 {
            return Vec::new();
        }

        // Column darkness profile over the band.
        let mut profile = vec![0u32; gray.width as usize];
        for y in 0..band {
            for x in 0..gray.width {
                if gray.get(x, y) < self.params.threshold {
                    profile[x as usize] += 1;
                }
            }
        }

        // A column is occupied when at least a quarter of the band is dark.
        let occupancy = (band / 4).max(1);
        let occupied: Vec<bool> = profile.iter().map(|&n| n >= occupancy).collect();

        let mut centers = Vec::new();
        let mut run_start: Option<u32> = None;
        let mut last_occupied = 0u32;
        let mut gap = 0u32;

        for x in 0..gray.width {
            if occupied[x as usize] {
                if run_start.is_none() {
                    run_start = Some(x);
                }
                last_occupied = x;
                gap = 0;
            } else if let Some(start) = run_start {
                gap += 1;
                if gap > self.params.max_gap {
                    push_run(&mut centers, start, last_occupied, band, &self.params);
                    run_start = None;
                    gap = 0;
                }
            }
        }
        if let Some(start) = run_start {
            push_run(&mut centers, start, last_occupied, band, &self.params);
        }

        centers
    }
}

fn push_run(
    centers: &mut Vec<(u32, u32)>,
    start: u32,
    end: u32,
    band: u32,
    params: &CenterParams,
) {
    let width = end.saturating_sub(start) + 1;
    if width >= params.min_run_width {
        centers.push(((start + end) / 2, band / 2));
    }
}
