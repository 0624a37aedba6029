//! Procedural bottle scene used as the local-device stand-in.
//!
//! Renders backlit bottles: a bright background, a mid-gray bottle body, a
//! dark cap band at the top, and a dark meniscus line at the fill height.
//! The geometry is chosen so the profile center locator and the horizontal
//! line kernel find exactly what a staged test expects.

use serde::{Deserialize, Serialize};
use world::Image;

const BACKGROUND: u8 = 210;
const BODY: u8 = 150;
const CAP: u8 = 25;
const LIQUID_LINE: u8 = 35;

/// Scene geometry; all heights in pixels from the frame top.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SceneParams {
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Number of bottles, evenly spaced; clamped to what fits.
    pub bottles: u32,
    /// Bottle body width.
    pub bottle_width: u32,
    /// Height of the dark cap band.
    pub cap_height: u32,
    /// Fill surface height measured from the frame top.
    pub fill_y: u32,
}

impl Default for SceneParams {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            bottles: 4,
            bottle_width: 120,
            cap_height: 50,
            fill_y: 360,
        }
    }
}

impl SceneParams {
    /// Center x of bottle `i` (0-based), as rendered.
    pub fn bottle_center(&self, i: u32) -> u32 {
        let pitch = self.width / (self.bottles.max(1) + 1);
        pitch * (i + 1)
    }
}

/// Renders one frame of the scene; `frame_index` is reserved for future
/// animation and currently keeps the scene static.
pub fn render_scene(params: &SceneParams, _frame_index: u64) -> Image {
    let mut img = Image::new_u8(params.width, params.height, 3);
    for px in img.pixels.chunks_exact_mut(3) {
        px.fill(BACKGROUND);
    }

    for i in 0..params.bottles {
        let cx = params.bottle_center(i);
        let half = params.bottle_width / 2;
        let x0 = cx.saturating_sub(half);
        let x1 = (cx + half).min(params.width);

        // Body.
        for y in 0..params.height {
            for x in x0..x1 {
                put_gray(&mut img, x, y, BODY);
            }
        }
        // Cap band.
        for y in 0..params.cap_height.min(params.height) {
            for x in x0..x1 {
                put_gray(&mut img, x, y, CAP);
            }
        }
        // Meniscus line, 4 px thick.
        for y in params.fill_y..(params.fill_y + 4).min(params.height) {
            for x in x0..x1 {
                put_gray(&mut img, x, y, LIQUID_LINE);
            }
        }
    }

    img
}

fn put_gray(img: &mut Image, x: u32, y: u32, v: u8) {
    img.put(x, y, &[v, v, v]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision::{to_gray, CenterLocator, GrayMethod, ProfileCenterLocator};

    #[test]
    fn bottle_centers_are_locatable() {
        let params = SceneParams::default();
        let frame = render_scene(&params, 0);
        let gray = to_gray(&frame, GrayMethod::Default);

        let locator = ProfileCenterLocator::default();
        let centers = locator.locate(&gray, params.cap_height + 20);
        assert_eq!(centers.len(), params.bottles as usize);

        for (i, (cx, _)) in centers.iter().enumerate() {
            let want = params.bottle_center(i as u32);
            let delta = cx.abs_diff(want);
            assert!(delta <= 6, "bottle {i}: located {cx}, rendered {want}");
        }
    }

    #[test]
    fn fewer_bottles_render_fewer_centers() {
        let params = SceneParams {
            bottles: 2,
            ..SceneParams::default()
        };
        let frame = render_scene(&params, 0);
        let gray = to_gray(&frame, GrayMethod::Default);
        let centers = ProfileCenterLocator::default().locate(&gray, 70);
        assert_eq!(centers.len(), 2);
    }

    #[test]
    fn zero_bottles_is_a_clean_background() {
        let params = SceneParams {
            bottles: 0,
            ..SceneParams::default()
        };
        let frame = render_scene(&params, 0);
        assert!(frame.pixels.iter().all(|&p| p == BACKGROUND));
    }
}
