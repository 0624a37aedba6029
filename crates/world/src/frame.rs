//! Image buffers and the metadata record that identifies a captured frame.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Element type of an image buffer, with its one-byte wire code.
///
/// The code is stored in ring-slot headers so readers can reconstruct the
/// buffer without out-of-band schema knowledge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElemType {
    /// Unsigned 8-bit channel data (the camera native format).
    U8,
    /// 32-bit float channel data.
    F32,
}

impl ElemType {
    /// Size of a single element in bytes.
    pub const fn size(self) -> usize {
        match self {
            ElemType::U8 => 1,
            ElemType::F32 => 4,
        }
    }

    /// One-byte code written into ring-slot headers.
    pub const fn code(self) -> u8 {
        match self {
            ElemType::U8 => b'B',
            ElemType::F32 => b'f',
        }
    }

    /// Inverse of [`ElemType::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'B' => Some(ElemType::U8),
            b'f' => Some(ElemType::F32),
            _ => None,
        }
    }
}

/// An owned image buffer in row-major `(h, w, c)` layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channels per pixel (1 = gray, 3 = RGB).
    pub channels: u8,
    /// Element type of `pixels`.
    pub elem: ElemType,
    /// Raw pixel bytes, `height * width * channels * elem.size()` long.
    pub pixels: Vec<u8>,
}

impl Image {
    /// Creates a zero-filled `U8` image.
    pub fn new_u8(width: u32, height: u32, channels: u8) -> Self {
        let len = width as usize * height as usize * channels as usize;
        Self {
            width,
            height,
            channels,
            elem: ElemType::U8,
            pixels: vec![0u8; len],
        }
    }

    /// Wraps existing pixel bytes; `pixels.len()` must match the shape.
    pub fn from_pixels(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(
            pixels.len(),
            width as usize * height as usize * channels as usize,
            "pixel buffer does not match shape"
        );
        Self {
            width,
            height,
            channels,
            elem: ElemType::U8,
            pixels,
        }
    }

    /// Total byte length implied by the shape.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize * self.elem.size()
    }

    /// Byte offset of pixel `(x, y)`.
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels as usize * self.elem.size()
    }

    /// Reads the first channel of a `U8` pixel; out-of-bounds reads return 0.
    pub fn get(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.pixels[self.offset(x, y)]
    }

    /// Writes all channels of a `U8` pixel; out-of-bounds writes are ignored.
    pub fn put(&mut self, x: u32, y: u32, value: &[u8]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let off = self.offset(x, y);
        let c = self.channels as usize;
        self.pixels[off..off + c].copy_from_slice(&value[..c]);
    }

    /// Copies out the rectangle `(x, y, w, h)`, clamped to the image bounds.
    ///
    /// A rectangle entirely outside the image yields a 0×0 image.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Image {
        let x0 = x.min(self.width);
        let y0 = y.min(self.height);
        let x1 = x.saturating_add(w).min(self.width);
        let y1 = y.saturating_add(h).min(self.height);
        let cw = x1 - x0;
        let ch = y1 - y0;

        let c = self.channels as usize * self.elem.size();
        let mut pixels = Vec::with_capacity(cw as usize * ch as usize * c);
        for row in y0..y1 {
            let start = self.offset(x0, row);
            pixels.extend_from_slice(&self.pixels[start..start + cw as usize * c]);
        }

        Image {
            width: cw,
            height: ch,
            channels: self.channels,
            elem: self.elem,
            pixels,
        }
    }
}

/// Metadata published by Capture for every acquired frame.
///
/// The pixel payload itself lives in the shared image ring; this record is
/// what travels through the detector lane.
#[derive(Clone, Copy, Debug)]
pub struct FrameMeta {
    /// Strictly monotone per capture session.
    pub frame_id: u64,
    /// Slot index inside the `camera_data` ring holding the pixels.
    pub ring_slot: usize,
    /// Acquisition timestamp; end-to-end cycle time is measured from here.
    pub captured_at: Instant,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}
