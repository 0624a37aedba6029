//! Message shapes for the 1→N fan-out and N→1 fan-in edges.

use crate::slot::{SlotId, SlotSet};
use smallvec::SmallVec;
use std::time::Instant;

/// A detected line segment in crop-local pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Line {
    /// Start x.
    pub x1: i32,
    /// Start y.
    pub y1: i32,
    /// End x.
    pub x2: i32,
    /// End y.
    pub y2: i32,
}

impl Line {
    /// Creates a line from its endpoints.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// The line translated by a crop origin into frame coordinates.
    pub fn translated(self, origin: (u32, u32)) -> Line {
        Line {
            x1: self.x1 + origin.0 as i32,
            y1: self.y1 + origin.1 as i32,
            x2: self.x2 + origin.0 as i32,
            y2: self.y2 + origin.1 as i32,
        }
    }

    /// Smaller of the two endpoint y values.
    pub fn top_y(self) -> i32 {
        self.y1.min(self.y2)
    }
}

/// Lines found in one crop; at most a handful per region in practice.
pub type LineBatch = SmallVec<[Line; 8]>;

/// One unit of fan-out work: a bottle's cap and level crops for one slot.
///
/// The crops themselves travel through the per-slot rings
/// `process_data_cap_<i>` / `process_data_level_<i>`; this record carries the
/// correlation key and crop origins.
#[derive(Clone, Copy, Debug)]
pub struct WorkItem {
    /// Frame the crops were cut from.
    pub frame_id: u64,
    /// Analyzer lane this item is bound for.
    pub slot: SlotId,
    /// Slot index in the cap crop ring.
    pub cap_ring_slot: usize,
    /// Slot index in the level crop ring.
    pub level_ring_slot: usize,
    /// Top-left corner of the cap crop in frame coordinates.
    pub cap_origin: (u32, u32),
    /// Top-left corner of the level crop in frame coordinates.
    pub level_origin: (u32, u32),
    /// When the detector enqueued this item.
    pub dispatched_at: Instant,
}

/// One slot's analysis output, keyed by `(frame_id, slot)`.
#[derive(Clone, Debug)]
pub struct PartialResult {
    /// Frame this partial belongs to.
    pub frame_id: u64,
    /// Analyzer lane that produced it.
    pub slot: SlotId,
    /// Horizontal lines found in the cap crop.
    pub cap_lines: LineBatch,
    /// Horizontal lines found in the level crop, sorted by ascending y.
    pub level_lines: LineBatch,
    /// Cap crop origin, echoed from the work item.
    pub cap_origin: (u32, u32),
    /// Level crop origin, echoed from the work item.
    pub level_origin: (u32, u32),
    /// Milliseconds the item spent in the slot queue before dequeue.
    pub queue_wait_ms: f64,
    /// Milliseconds from dequeue to enqueue of this result.
    pub process_ms: f64,
}

impl PartialResult {
    /// A result carrying no lines, used when analysis fails so that the
    /// renderer still receives its expected partial.
    pub fn empty(frame_id: u64, slot: SlotId) -> Self {
        Self {
            frame_id,
            slot,
            cap_lines: SmallVec::new(),
            level_lines: SmallVec::new(),
            cap_origin: (0, 0),
            level_origin: (0, 0),
            queue_wait_ms: 0.0,
            process_ms: 0.0,
        }
    }
}

/// Detector → renderer notice of which slot partials to wait for.
#[derive(Clone, Copy, Debug)]
pub struct FrameEnvelope {
    /// Frame the envelope describes.
    pub frame_id: u64,
    /// Slot index in the `process_data` ring holding the original frame.
    pub ring_slot: usize,
    /// Slots the renderer should expect partials from.
    pub expected: SlotSet,
    /// Capture timestamp, forwarded for the end-to-end cycle measurement.
    pub captured_at: Instant,
}

/// The renderer input lane multiplexes envelopes and partials.
#[derive(Clone, Debug)]
pub enum RenderMsg {
    /// Which slots to expect for a frame.
    Envelope(FrameEnvelope),
    /// One slot's finished analysis.
    Partial(PartialResult),
}

impl RenderMsg {
    /// The frame this message belongs to.
    pub fn frame_id(&self) -> u64 {
        match self {
            RenderMsg::Envelope(e) => e.frame_id,
            RenderMsg::Partial(p) => p.frame_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_translation() {
        let line = Line::new(1, 2, 10, 2);
        let moved = line.translated((100, 50));
        assert_eq!(moved, Line::new(101, 52, 110, 52));
        assert_eq!(moved.top_y(), 52);
    }

    #[test]
    fn render_msg_frame_id() {
        let envelope = RenderMsg::Envelope(FrameEnvelope {
            frame_id: 9,
            ring_slot: 0,
            expected: SlotSet::EMPTY,
            captured_at: Instant::now(),
        });
        assert_eq!(envelope.frame_id(), 9);

        let partial = RenderMsg::Partial(PartialResult::empty(4, SlotId::new(2).unwrap()));
        assert_eq!(partial.frame_id(), 4);
    }
}
