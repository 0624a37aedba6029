//! Display sink seam and the windowless implementations.

use crate::ppm::encode_ppm;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;
use world::Image;

/// Destination for composed frames and charts.
///
/// `show` must be cheap or internally buffered: the renderer treats a slow
/// sink as a reason to drop the composited image, never to stall the lane.
pub trait DisplaySink: Send + Sync {
    /// Presents `image` under the given window name.
    fn show(&self, image: &Image, window: &str);
}

/// Discards everything; the headless default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn show(&self, _image: &Image, _window: &str) {}
}

/// Keeps the most recent image per window plus a show counter; used by tests
/// to observe renderer output.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<HashMap<String, (u64, Image)>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest image shown under `window`, if any.
    pub fn latest(&self, window: &str) -> Option<Image> {
        self.inner.lock().get(window).map(|(_, img)| img.clone())
    }

    /// Number of `show` calls for `window`.
    pub fn shown(&self, window: &str) -> u64 {
        self.inner.lock().get(window).map_or(0, |(n, _)| *n)
    }
}

impl DisplaySink for MemorySink {
    fn show(&self, image: &Image, window: &str) {
        let mut inner = self.inner.lock();
        let entry = inner
            .entry(window.to_owned())
            .or_insert_with(|| (0, image.clone()));
        entry.0 += 1;
        entry.1 = image.clone();
    }
}

/// Writes every shown image as `<window>_<seq>.ppm` under a directory.
pub struct PpmDirSink {
    dir: PathBuf,
    seq: AtomicU64,
}

impl PpmDirSink {
    /// Creates the sink; the directory must already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }
}

impl DisplaySink for PpmDirSink {
    fn show(&self, image: &Image, window: &str) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("{window}_{seq:06}.ppm"));
        if let Err(err) = std::fs::write(&path, encode_ppm(image)) {
            warn!(path = %path.display(), %err, "failed to write frame");
        }
    }
}
