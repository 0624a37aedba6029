//! Image codec seam for the stream protocol.
//!
//! Production deployments stream JPEG; that encoder is an external
//! collaborator, so the pipeline only depends on this trait.  [`RawCodec`]
//! is the reference implementation used by the synthetic remote camera and
//! the test suite.

use crate::CameraError;
use world::Image;

/// Encodes and decodes image payloads for `msg_type = 0` frames.
pub trait FrameCodec: Send {
    /// Encodes an image into payload bytes.
    fn encode(&self, image: &Image) -> Vec<u8>;
    /// Decodes payload bytes back into an image.
    fn decode(&self, bytes: &[u8]) -> Result<Image, CameraError>;
}

/// Uncompressed codec: `[u32 w][u32 h][u8 c]` little-endian, then pixels.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCodec;

const RAW_HEADER: usize = 9;

impl FrameCodec for RawCodec {
    fn encode(&self, image: &Image) -> Vec<u8> {
        let mut out = Vec::with_capacity(RAW_HEADER + image.pixels.len());
        out.extend_from_slice(&image.width.to_le_bytes());
        out.extend_from_slice(&image.height.to_le_bytes());
        out.push(image.channels);
        out.extend_from_slice(&image.pixels);
        out
    }

    fn decode(&self, bytes: &[u8]) -> Result<Image, CameraError> {
        if bytes.len() < RAW_HEADER {
            return Err(CameraError::Decode("payload shorter than header".into()));
        }
        let width = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let height = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let channels = bytes[8];

        let expected = width as usize * height as usize * channels as usize;
        let pixels = &bytes[RAW_HEADER..];
        if pixels.len() != expected {
            return Err(CameraError::Decode(format!(
                "expected {expected} pixel bytes, found {}",
                pixels.len()
            )));
        }
        Ok(Image::from_pixels(width, height, channels, pixels.to_vec()))
    }
}
