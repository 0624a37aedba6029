//! Telemetry sample shape and the series naming scheme.

/// One `(series, t, value)` measurement emitted by a worker.
///
/// `t` is seconds since the pipeline epoch so chart axes stay small.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Series the sample belongs to.
    pub series: String,
    /// Seconds since the pipeline epoch.
    pub t: f64,
    /// Measured value (ms for latency series, Hz for `fps`, counts for drops).
    pub value: f64,
}

impl Sample {
    /// Creates a sample.
    pub fn new(series: impl Into<String>, t: f64, value: f64) -> Self {
        Self {
            series: series.into(),
            t,
            value,
        }
    }
}

/// Canonical series names used across the pipeline.
pub mod series {
    use crate::slot::SlotId;

    /// Capture frame rate over a one-second window.
    pub const FPS: &str = "fps";
    /// Capture loop processing time, ms.
    pub const PROCESS_CAPTURE: &str = "process_capture";
    /// Detector processing time, ms.
    pub const PROCESS_PROCESSING: &str = "process_processing";
    /// Capture→detector transfer latency, ms.
    pub const TIME_INPUT_PROCESSING: &str = "time_input_processing";
    /// Renderer compose time, ms.
    pub const PROCESS_RENDER: &str = "process_render";
    /// End-to-end capture→render latency, ms.
    pub const TIME_CYCLE: &str = "time_cycle";

    /// Slot analyzer processing time, ms.
    pub fn process_cap_level(slot: SlotId) -> String {
        format!("process_cap_level_{slot}")
    }

    /// Dispatch→dequeue latency for a slot, ms.
    pub fn time_input_cap_level(slot: SlotId) -> String {
        format!("time_input_cap_level_{slot}")
    }

    /// Drop counter for a lane or ring (`dropped_detector`, …).
    pub fn dropped(what: &str) -> String {
        format!("dropped_{what}")
    }

    /// Error counter per taxonomy category (`errors/analysis`, …).
    pub fn errors(category: &str) -> String {
        format!("errors/{category}")
    }

    /// Instantaneous queue depth of a lane.
    pub fn queue_depth(lane: &str) -> String {
        format!("queue_{lane}")
    }
}
