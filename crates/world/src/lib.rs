//! Canonical message and image types shared across the inspection pipeline.
//!
//! The `world` crate intentionally stays small.  It defines the shapes that
//! travel between workers — frames, fan-out work items, partial results,
//! renderer envelopes — along with the parameter map used by control
//! mailboxes, so every other crate compiles against stable definitions.

#![deny(missing_docs)]

/// Image buffers and per-frame metadata.
pub mod frame;
/// Fan-out/fan-in message shapes.
pub mod msg;
/// Control-mailbox parameter maps.
pub mod params;
/// Slot identifiers and slot sets.
pub mod slot;
/// Telemetry sample shape and series naming.
pub mod telemetry;

pub use crate::frame::{ElemType, FrameMeta, Image};
pub use crate::msg::{FrameEnvelope, Line, PartialResult, RenderMsg, WorkItem};
pub use crate::params::{ParamMap, ParamValue};
pub use crate::slot::{SlotId, SlotSet, MAX_SLOTS};
pub use crate::telemetry::{series, Sample};

use serde::{Deserialize, Serialize};

/// OS scheduling priority requested for a worker's threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Latency-sensitive workers (capture, renderer).
    High,
    /// Default priority.
    Normal,
    /// Background workers that may be starved under load.
    Low,
}

impl Priority {
    /// Unix niceness value applied best-effort at spawn time.
    pub fn niceness(self) -> i32 {
        match self {
            Priority::High => -10,
            Priority::Normal => 0,
            Priority::Low => 10,
        }
    }
}
