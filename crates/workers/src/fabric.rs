//! The queue fabric: every lane, ring, and mailbox the pipeline runs on.
//!
//! The fabric owns all shared plumbing; workers hold clones of the handles
//! they produce into and consume from.  Built once by the orchestrator —
//! failure here is fatal, everything after it is soft.

use std::sync::Arc;
use std::time::{Duration, Instant};
use transport::{
    ControlMailbox, FullPolicy, Lane, Offer, RingPool, RingSpec, StopSignal, TransportResult,
};
use world::{ElemType, FrameMeta, RenderMsg, Sample, SlotId, WorkItem};

/// Ring names as used by the workers.
pub mod rings {
    use world::SlotId;

    /// Raw frames straight from capture.
    pub const CAMERA: &str = "camera_data";
    /// Original frames republished for the renderer.
    pub const PROCESS: &str = "process_data";

    /// Cap crop ring for one analyzer slot.
    pub fn cap(slot: SlotId) -> String {
        format!("process_data_cap_{slot}")
    }

    /// Level crop ring for one analyzer slot.
    pub fn level(slot: SlotId) -> String {
        format!("process_data_level_{slot}")
    }
}

/// Capacities and shapes the fabric is built from.
#[derive(Clone, Copy, Debug)]
pub struct FabricConfig {
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Number of analyzer slots (1..=4).
    pub slot_count: usize,
    /// Cap crop size `(w, h)`.
    pub cap_crop: (u32, u32),
    /// Level crop size `(w, h)`.
    pub level_crop: (u32, u32),
    /// Detector input lane capacity.
    pub detector_capacity: usize,
    /// Per-slot input lane capacity.
    pub slot_capacity: usize,
    /// Renderer input lane capacity.
    pub renderer_capacity: usize,
    /// How long a renderer-lane producer may block before dropping.
    pub renderer_block: Duration,
    /// Telemetry sample lane capacity.
    pub telemetry_capacity: usize,
    /// Slots in the camera ring (capture → detector hand-off).
    pub camera_ring_slots: usize,
    /// Slots in the process ring (frames parked until the renderer drains
    /// their assembly, so this covers the frames in flight under the
    /// assembly deadline).
    pub process_ring_slots: usize,
    /// Slots in each crop ring; sized to the slot lane so a stalled analyzer
    /// keeps receiving work until its queue, not its ring, is the limit.
    pub crop_ring_slots: usize,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            slot_count: world::MAX_SLOTS,
            cap_crop: (210, 160),
            level_crop: (210, 240),
            detector_capacity: 30,
            slot_capacity: 30,
            renderer_capacity: 30,
            renderer_block: Duration::from_millis(10),
            telemetry_capacity: 1024,
            camera_ring_slots: 32,
            process_ring_slots: 32,
            crop_ring_slots: 30,
        }
    }
}

/// Cheap cloneable handle for emitting telemetry samples.
///
/// Timestamps are seconds since the fabric epoch; overflow evicts the oldest
/// samples, so producers never block on a slow aggregator.
#[derive(Clone)]
pub struct TelemetrySink {
    lane: Lane<Sample>,
    epoch: Instant,
}

impl TelemetrySink {
    /// Emits one sample stamped with the current time.
    pub fn emit(&self, series: impl Into<String>, value: f64) {
        let t = self.epoch.elapsed().as_secs_f64();
        // Evicted samples carry no resources; the offer result is moot.
        let _: Offer<Sample> = self.lane.offer(Sample::new(series, t, value));
    }

    /// The fabric epoch samples are measured against.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

/// All shared pipeline plumbing.
pub struct Fabric {
    /// Broadcast stop observed by every poll.
    pub stop: StopSignal,
    /// Pipeline epoch for telemetry timestamps.
    pub epoch: Instant,
    /// Named image rings.
    pub rings: Arc<RingPool>,
    /// Capture → detector lane.
    pub detector: Lane<FrameMeta>,
    /// Detector → analyzer lanes, one per slot, indexed by `SlotId::index`.
    pub slots: Vec<Lane<WorkItem>>,
    /// Multiplexed envelope/partial lane into the renderer.
    pub renderer: Lane<RenderMsg>,
    /// Telemetry sample lane; the telemetry worker is its only consumer.
    pub telemetry: Lane<Sample>,
    /// Control mailboxes, one per worker.
    pub capture_ctl: ControlMailbox,
    /// Detector control mailbox.
    pub detector_ctl: ControlMailbox,
    /// Analyzer control mailboxes, indexed by `SlotId::index`.
    pub analyzer_ctl: Vec<ControlMailbox>,
    /// Renderer control mailbox.
    pub renderer_ctl: ControlMailbox,
    /// Telemetry control mailbox.
    pub telemetry_ctl: ControlMailbox,
}

impl Fabric {
    /// Builds rings, lanes, and mailboxes from the config.
    pub fn build(config: &FabricConfig) -> TransportResult<Self> {
        let stop = StopSignal::new();
        let slot_count = config.slot_count.clamp(1, world::MAX_SLOTS);

        let frame_shape = (config.height, config.width, 3);
        let mut schema = vec![
            (
                rings::CAMERA.to_owned(),
                RingSpec {
                    capacity: config.camera_ring_slots,
                    max_images: 1,
                    max_shape: frame_shape,
                    elem: ElemType::U8,
                },
            ),
            (
                rings::PROCESS.to_owned(),
                RingSpec {
                    capacity: config.process_ring_slots,
                    max_images: 1,
                    max_shape: frame_shape,
                    elem: ElemType::U8,
                },
            ),
        ];
        for index in 0..slot_count {
            let slot = SlotId::from_index(index).expect("slot_count is clamped");
            let (cap_w, cap_h) = config.cap_crop;
            let (level_w, level_h) = config.level_crop;
            schema.push((
                rings::cap(slot),
                RingSpec {
                    capacity: config.crop_ring_slots,
                    max_images: 1,
                    max_shape: (cap_h, cap_w, 1),
                    elem: ElemType::U8,
                },
            ));
            schema.push((
                rings::level(slot),
                RingSpec {
                    capacity: config.crop_ring_slots,
                    max_images: 1,
                    max_shape: (level_h, level_w, 1),
                    elem: ElemType::U8,
                },
            ));
        }
        let rings = Arc::new(RingPool::build(schema)?);

        let slots = (0..slot_count)
            .map(|index| {
                Lane::new(
                    &format!("slot_{}", index + 1),
                    config.slot_capacity,
                    FullPolicy::DropOldest,
                    stop.clone(),
                )
            })
            .collect();

        Ok(Self {
            epoch: Instant::now(),
            rings,
            detector: Lane::new(
                "detector",
                config.detector_capacity,
                FullPolicy::DropOldest,
                stop.clone(),
            ),
            slots,
            renderer: Lane::new(
                "renderer",
                config.renderer_capacity,
                FullPolicy::BlockThenDrop(config.renderer_block),
                stop.clone(),
            ),
            telemetry: Lane::new(
                "telemetry",
                config.telemetry_capacity,
                FullPolicy::DropOldest,
                stop.clone(),
            ),
            capture_ctl: ControlMailbox::new(),
            detector_ctl: ControlMailbox::new(),
            analyzer_ctl: (0..slot_count).map(|_| ControlMailbox::new()).collect(),
            renderer_ctl: ControlMailbox::new(),
            telemetry_ctl: ControlMailbox::new(),
            stop,
        })
    }

    /// Number of analyzer slots the fabric was built with.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// A telemetry emitter stamped against the fabric epoch.
    pub fn telemetry_sink(&self) -> TelemetrySink {
        TelemetrySink {
            lane: self.telemetry.clone(),
            epoch: self.epoch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_all_rings_and_lanes() {
        let fabric = Fabric::build(&FabricConfig::default()).expect("build fabric");
        assert_eq!(fabric.slot_count(), 4);
        assert!(fabric.rings.spec(rings::CAMERA).is_ok());
        assert!(fabric.rings.spec(rings::PROCESS).is_ok());
        for index in 0..4 {
            let slot = SlotId::from_index(index).unwrap();
            assert!(fabric.rings.spec(&rings::cap(slot)).is_ok());
            assert!(fabric.rings.spec(&rings::level(slot)).is_ok());
        }
        assert_eq!(fabric.detector.capacity(), 30);
        assert_eq!(fabric.renderer.capacity(), 30);
    }

    #[test]
    fn slot_count_is_clamped() {
        let config = FabricConfig {
            slot_count: 9,
            ..FabricConfig::default()
        };
        let fabric = Fabric::build(&config).unwrap();
        assert_eq!(fabric.slot_count(), 4);
    }

    #[test]
    fn telemetry_sink_lands_in_lane() {
        let fabric = Fabric::build(&FabricConfig::default()).unwrap();
        let sink = fabric.telemetry_sink();
        sink.emit("fps", 30.0);
        sink.emit("fps", 31.0);

        let samples = fabric.telemetry.drain();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].series, "fps");
        assert!(samples[1].t >= samples[0].t);
    }
}
