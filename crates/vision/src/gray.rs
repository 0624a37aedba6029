//! Grayscale conversion.

use serde::{Deserialize, Serialize};
use world::Image;

/// How RGB channels are collapsed to a single luminance channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrayMethod {
    /// ITU-R BT.601 weights, the usual camera default.
    #[default]
    Default,
    /// Perceptual weights biased further toward green.
    Weighted,
    /// Plain channel average.
    Average,
}

/// Collapses a 3-channel `U8` image to one channel; 1-channel input is
/// returned as a copy.
pub fn to_gray(img: &Image, method: GrayMethod) -> Image {
    if img.channels == 1 {
        return img.clone();
    }

    let mut out = Image::new_u8(img.width, img.height, 1);
    let c = img.channels as usize;
    for (i, px) in img.pixels.chunks_exact(c).enumerate() {
        let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
        out.pixels[i] = match method {
            GrayMethod::Default => ((299 * r + 587 * g + 114 * b) / 1000) as u8,
            GrayMethod::Weighted => ((213 * r + 715 * g + 72 * b) / 1000) as u8,
            GrayMethod::Average => ((r + g + b) / 3) as u8,
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_passthrough_for_single_channel() {
        let mut img = Image::new_u8(3, 3, 1);
        img.pixels.fill(40);
        let gray = to_gray(&img, GrayMethod::Default);
        assert_eq!(gray, img);
    }

    #[test]
    fn methods_agree_on_neutral_gray() {
        let mut img = Image::new_u8(2, 2, 3);
        img.pixels.fill(100);
        for method in [GrayMethod::Default, GrayMethod::Weighted, GrayMethod::Average] {
            let gray = to_gray(&img, method);
            assert_eq!(gray.channels, 1);
            assert!(gray.pixels.iter().all(|p| (99..=101).contains(p)));
        }
    }

    #[test]
    fn default_weights_favor_green() {
        let mut img = Image::new_u8(1, 1, 3);
        img.pixels.copy_from_slice(&[0, 255, 0]);
        let g = to_gray(&img, GrayMethod::Default).pixels[0];
        img.pixels.copy_from_slice(&[0, 0, 255]);
        let b = to_gray(&img, GrayMethod::Default).pixels[0];
        assert!(g > b);
    }
}
