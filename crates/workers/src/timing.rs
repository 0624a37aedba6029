//! Small timing helpers shared by the workers.

use std::time::Instant;

/// Milliseconds elapsed since `start`.
pub fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Frame-rate estimator over a sliding window.
///
/// `update` counts one frame and reports the rate once per window; between
/// window boundaries it returns `None`.
#[derive(Debug)]
pub struct FrameFps {
    window: f64,
    frames: u64,
    window_start: Instant,
    last_fps: f64,
}

impl FrameFps {
    /// Creates an estimator with the given window in seconds.
    pub fn new(window_secs: f64) -> Self {
        Self {
            window: window_secs,
            frames: 0,
            window_start: Instant::now(),
            last_fps: 0.0,
        }
    }

    /// Counts a frame; returns the measured rate when the window closes.
    pub fn update(&mut self) -> Option<f64> {
        self.frames += 1;
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed >= self.window {
            self.last_fps = self.frames as f64 / elapsed;
            self.frames = 0;
            self.window_start = Instant::now();
            Some(self.last_fps)
        } else {
            None
        }
    }

    /// Most recent completed-window measurement.
    pub fn last(&self) -> f64 {
        self.last_fps
    }
}
