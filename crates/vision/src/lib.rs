//! Image-analysis kernels and presentation helpers for the inspection line.
//!
//! The pipeline treats these as pluggable collaborators: the detector worker
//! talks to a [`CenterLocator`], the slot analyzers call
//! [`detect_horizontal_lines`], and everything that wants pixels on a screen
//! goes through a [`DisplaySink`].  The reference implementations here are
//! deliberately self-contained (no native vision library) so the pipeline is
//! runnable and testable anywhere.

mod centers;
mod chart;
mod gray;
mod lines;
mod overlay;
mod ppm;
mod sink;

pub use centers::{CenterLocator, CenterParams, ProfileCenterLocator};
pub use chart::{render_chart, ChartSeries, ChartStyle};
pub use gray::{to_gray, GrayMethod};
pub use lines::{detect_horizontal_lines, LineParams};
pub use overlay::{draw_line, draw_rect, Color};
pub use ppm::{decode_ppm, encode_ppm, PpmError};
pub use sink::{DisplaySink, MemorySink, NullSink, PpmDirSink};
