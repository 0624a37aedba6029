//! Detector worker: the 1→N fan-out.
//!
//! One raw frame in; up to four (cap, level) crop pairs out through the
//! per-slot rings and lanes, plus an envelope telling the renderer exactly
//! which slot partials to wait for.

use crate::fabric::{rings, Fabric, TelemetrySink};
use crate::harness::{Harness, ParamCell, WorkerHandle};
use crate::timing::ms_since;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use transport::{Lane, Offer, PollError, RingPool};
use vision::{to_gray, CenterLocator, CenterParams, GrayMethod, ProfileCenterLocator};
use world::{
    series, FrameEnvelope, FrameMeta, ParamMap, Priority, RenderMsg, SlotId, SlotSet, WorkItem,
};

const RING_WAIT: Duration = Duration::from_millis(5);

/// Detector tuning; crop sizes may shrink at runtime but never exceed the
/// ring shapes declared at fabric build time.
#[derive(Clone, Copy, Debug)]
pub struct DetectorParams {
    /// Grayscale conversion method.
    pub gray_method: GrayMethod,
    /// Center-locator tuning (threshold, run width, gap).
    pub centers: CenterParams,
    /// Height of the top band scanned for bottle caps.
    pub band_height: u32,
    /// Cap crop size `(w, h)`.
    pub cap_crop: (u32, u32),
    /// Top edge of the cap crop band.
    pub cap_y: u32,
    /// Level crop size `(w, h)`.
    pub level_crop: (u32, u32),
    /// Top edge of the level crop band.
    pub level_y: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            gray_method: GrayMethod::Default,
            centers: CenterParams::default(),
            band_height: 200,
            cap_crop: (210, 160),
            cap_y: 0,
            level_crop: (210, 240),
            level_y: 280,
        }
    }
}

fn apply(params: &mut DetectorParams, map: &ParamMap) {
    if let Some(method) = map.get_str("gray_method") {
        match method {
            "default" => params.gray_method = GrayMethod::Default,
            "weighted" => params.gray_method = GrayMethod::Weighted,
            "average" => params.gray_method = GrayMethod::Average,
            other => debug!(other, "unrecognized gray_method ignored"),
        }
    }
    if let Some(v) = map.get_i64("threshold") {
        params.centers.threshold = v.clamp(0, 255) as u8;
    }
    if let Some(v) = map.get_i64("min_run_width") {
        params.centers.min_run_width = v.max(1) as u32;
    }
    if let Some(v) = map.get_i64("max_gap") {
        params.centers.max_gap = v.max(0) as u32;
    }
    if let Some(v) = map.get_i64("band_height") {
        params.band_height = v.max(1) as u32;
    }
    for (key, field) in [
        ("cap_crop_w", &mut params.cap_crop.0),
        ("cap_crop_h", &mut params.cap_crop.1),
        ("level_crop_w", &mut params.level_crop.0),
        ("level_crop_h", &mut params.level_crop.1),
        ("cap_y", &mut params.cap_y),
        ("level_y", &mut params.level_y),
    ] {
        if let Some(v) = map.get_i64(key) {
            *field = v.max(0) as u32;
        }
    }
}

/// Spawns the detector.
///
/// `locator` overrides the built-in profile locator; tests inject fixed
/// centers through it.  `None` uses [`ProfileCenterLocator`] driven by the
/// live `centers` parameters.
pub fn spawn_detector(
    fabric: &Fabric,
    initial: DetectorParams,
    locator: Option<Arc<dyn CenterLocator>>,
    priority: Priority,
) -> WorkerHandle {
    let params = ParamCell::new(initial);
    let control_params = params.clone();

    let pool = fabric.rings.clone();
    let input = fabric.detector.clone();
    let slot_lanes = fabric.slots.clone();
    let renderer = fabric.renderer.clone();
    let sink = fabric.telemetry_sink();
    let stop = fabric.stop.clone();

    Harness::new("detector", stop)
        .telemetry(sink.clone())
        .priority(priority)
        .task("fanout", move |ctx| {
            while !ctx.should_stop() {
                match input.poll(Duration::from_millis(100)) {
                    Ok(meta) => {
                        process_frame(
                            &pool,
                            &slot_lanes,
                            &renderer,
                            &sink,
                            &params.load(),
                            locator.as_deref(),
                            meta,
                        );
                    }
                    Err(PollError::Timeout) => {}
                    Err(_) => break,
                }
            }
        })
        .control_task(fabric.detector_ctl.clone(), move |map| {
            control_params.update(|p| apply(p, map));
        })
        .spawn()
}

fn process_frame(
    pool: &RingPool,
    slot_lanes: &[Lane<WorkItem>],
    renderer: &Lane<RenderMsg>,
    sink: &TelemetrySink,
    params: &DetectorParams,
    locator: Option<&dyn CenterLocator>,
    meta: FrameMeta,
) {
    let start = Instant::now();
    sink.emit(
        series::TIME_INPUT_PROCESSING,
        ms_since(meta.captured_at),
    );

    let frames = match pool.read(rings::CAMERA, meta.ring_slot, Some(1)) {
        Ok(frames) => frames,
        Err(err) => {
            warn!(frame = meta.frame_id, %err, "camera ring read failed");
            sink.emit(series::errors("invalid_shape"), 1.0);
            // Frees the slot if it was still published; no-op otherwise.
            pool.release(rings::CAMERA, meta.ring_slot);
            return;
        }
    };
    let Some(frame) = frames.into_iter().next() else {
        pool.release(rings::CAMERA, meta.ring_slot);
        return;
    };

    let gray = to_gray(&frame, params.gray_method);

    let default_locator = ProfileCenterLocator::new(params.centers);
    let locator = locator.unwrap_or(&default_locator);
    let band = params.band_height.min(gray.height);
    let centers = match catch_unwind(AssertUnwindSafe(|| locator.locate(&gray, band))) {
        Ok(centers) => centers,
        Err(_) => {
            warn!(frame = meta.frame_id, "center locator panicked");
            sink.emit(series::errors("analysis"), 1.0);
            Vec::new()
        }
    };
    if centers.len() > slot_lanes.len() {
        debug!(
            frame = meta.frame_id,
            found = centers.len(),
            kept = slot_lanes.len(),
            "extra centers ignored left-to-right"
        );
    }

    let mut expected = SlotSet::EMPTY;
    for (index, &(cx, _cy)) in centers.iter().take(slot_lanes.len()).enumerate() {
        let slot = SlotId::from_index(index).expect("bounded by slot lanes");
        if dispatch_slot(pool, &slot_lanes[index], sink, params, &gray, meta, slot, cx) {
            expected.insert(slot);
        }
    }

    // Park the original frame for the renderer and announce the fan-out.
    publish_envelope(pool, renderer, sink, meta, &frame, expected);

    pool.release(rings::CAMERA, meta.ring_slot);
    sink.emit(series::PROCESS_PROCESSING, ms_since(start));
}

/// Writes both crops and offers the work item; returns whether the renderer
/// should expect this slot.
#[allow(clippy::too_many_arguments)]
fn dispatch_slot(
    pool: &RingPool,
    lane: &Lane<WorkItem>,
    sink: &TelemetrySink,
    params: &DetectorParams,
    gray: &world::Image,
    meta: FrameMeta,
    slot: SlotId,
    cx: u32,
) -> bool {
    let cap_ring = rings::cap(slot);
    let level_ring = rings::level(slot);

    let (cap_w, cap_h) = params.cap_crop;
    let (level_w, level_h) = params.level_crop;
    let cap_x = cx.saturating_sub(cap_w / 2);
    let level_x = cx.saturating_sub(level_w / 2);

    let cap = gray.crop(cap_x, params.cap_y, cap_w, cap_h);
    let level = gray.crop(level_x, params.level_y, level_w, level_h);

    let Some(cap_slot) = acquire_and_write(pool, &cap_ring, &cap) else {
        sink.emit(series::dropped(&format!("slot_ring_{slot}")), 1.0);
        return false;
    };
    let Some(level_slot) = acquire_and_write(pool, &level_ring, &level) else {
        pool.release(&cap_ring, cap_slot);
        sink.emit(series::dropped(&format!("slot_ring_{slot}")), 1.0);
        return false;
    };

    let item = WorkItem {
        frame_id: meta.frame_id,
        slot,
        cap_ring_slot: cap_slot,
        level_ring_slot: level_slot,
        cap_origin: (cap_x, params.cap_y),
        level_origin: (level_x, params.level_y),
        dispatched_at: Instant::now(),
    };

    match lane.offer(item) {
        Offer::Accepted => true,
        Offer::DroppedOldest(evicted) => {
            for old in evicted {
                pool.release(&rings::cap(old.slot), old.cap_ring_slot);
                pool.release(&rings::level(old.slot), old.level_ring_slot);
            }
            sink.emit(series::dropped(lane.name()), lane.dropped() as f64);
            true
        }
        Offer::DroppedNew(item) => {
            pool.release(&cap_ring, item.cap_ring_slot);
            pool.release(&level_ring, item.level_ring_slot);
            sink.emit(series::dropped(lane.name()), lane.dropped() as f64);
            false
        }
    }
}

fn acquire_and_write(pool: &RingPool, ring: &str, image: &world::Image) -> Option<usize> {
    let slot = pool.acquire_free_timeout(ring, RING_WAIT).ok()??;
    match pool.write(ring, slot, std::slice::from_ref(image)) {
        Ok(()) => Some(slot),
        Err(err) => {
            warn!(ring, %err, "crop write failed");
            None
        }
    }
}

fn publish_envelope(
    pool: &RingPool,
    renderer: &Lane<RenderMsg>,
    sink: &TelemetrySink,
    meta: FrameMeta,
    frame: &world::Image,
    expected: SlotSet,
) {
    let process_slot = match pool.acquire_free_timeout(rings::PROCESS, RING_WAIT) {
        Ok(Some(slot)) => slot,
        _ => {
            sink.emit(series::dropped("process_ring"), 1.0);
            return;
        }
    };
    if let Err(err) = pool.write(rings::PROCESS, process_slot, std::slice::from_ref(frame)) {
        warn!(%err, "process ring write failed");
        sink.emit(series::errors("invalid_shape"), 1.0);
        return;
    }

    let envelope = RenderMsg::Envelope(FrameEnvelope {
        frame_id: meta.frame_id,
        ring_slot: process_slot,
        expected,
        captured_at: meta.captured_at,
    });
    match renderer.offer(envelope) {
        Offer::Accepted => {}
        Offer::DroppedNew(RenderMsg::Envelope(env)) => {
            // Nobody will ever drain this frame's assembly background.
            pool.release(rings::PROCESS, env.ring_slot);
            sink.emit(series::dropped("renderer"), renderer.dropped() as f64);
        }
        Offer::DroppedNew(_) | Offer::DroppedOldest(_) => {
            sink.emit(series::dropped("renderer"), renderer.dropped() as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::FabricConfig;
    use crate::harness::DEFAULT_GRACE;

    struct FixedCenters(Vec<(u32, u32)>);

    impl CenterLocator for FixedCenters {
        fn locate(&self, _gray: &world::Image, _band: u32) -> Vec<(u32, u32)> {
            self.0.clone()
        }
    }

    fn fabric() -> Fabric {
        Fabric::build(&FabricConfig {
            width: 640,
            height: 480,
            cap_crop: (80, 60),
            level_crop: (80, 100),
            ..FabricConfig::default()
        })
        .unwrap()
    }

    fn inject_frame(fabric: &Fabric, frame_id: u64) -> FrameMeta {
        let mut frame = world::Image::new_u8(640, 480, 3);
        frame.pixels.fill(200);
        let slot = fabric.rings.acquire_free(rings::CAMERA).unwrap().unwrap();
        fabric
            .rings
            .write(rings::CAMERA, slot, std::slice::from_ref(&frame))
            .unwrap();
        let meta = FrameMeta {
            frame_id,
            ring_slot: slot,
            captured_at: Instant::now(),
            width: 640,
            height: 480,
        };
        fabric.detector.offer(meta);
        meta
    }

    fn detector_params() -> DetectorParams {
        DetectorParams {
            cap_crop: (80, 60),
            cap_y: 0,
            level_crop: (80, 100),
            level_y: 200,
            ..DetectorParams::default()
        }
    }

    #[test]
    fn four_centers_fan_out_to_four_slots() {
        let fabric = fabric();
        let locator = Arc::new(FixedCenters(vec![(100, 50), (250, 50), (400, 50), (550, 50)]));
        let handle = spawn_detector(&fabric, detector_params(), Some(locator), Priority::Normal);

        inject_frame(&fabric, 1);

        let envelope = loop {
            match fabric.renderer.poll(Duration::from_secs(2)).expect("renderer msg") {
                RenderMsg::Envelope(env) => break env,
                RenderMsg::Partial(_) => {}
            }
        };
        assert_eq!(envelope.frame_id, 1);
        assert_eq!(envelope.expected, SlotSet::first_n(4));

        for (index, lane) in fabric.slots.iter().enumerate() {
            let item = lane.poll(Duration::from_secs(1)).expect("work item");
            assert_eq!(item.frame_id, 1);
            assert_eq!(item.slot.index(), index);

            let slot = item.slot;
            let caps = fabric
                .rings
                .read(&rings::cap(slot), item.cap_ring_slot, None)
                .expect("cap crop published");
            assert_eq!(caps[0].channels, 1);
            assert_eq!(caps[0].width, 80);
            fabric.rings.release(&rings::cap(slot), item.cap_ring_slot);

            let levels = fabric
                .rings
                .read(&rings::level(slot), item.level_ring_slot, None)
                .expect("level crop published");
            assert_eq!(levels[0].height, 100);
            fabric.rings.release(&rings::level(slot), item.level_ring_slot);
        }

        // The camera slot came back around.
        let state = fabric.rings.state(rings::CAMERA, 0).unwrap();
        assert_eq!(state, transport::SlotState::Free);

        fabric.stop.trigger();
        assert!(handle.stop(DEFAULT_GRACE));
    }

    #[test]
    fn zero_centers_still_produces_an_envelope() {
        let fabric = fabric();
        let locator = Arc::new(FixedCenters(Vec::new()));
        let handle = spawn_detector(&fabric, detector_params(), Some(locator), Priority::Normal);

        inject_frame(&fabric, 7);

        let msg = fabric.renderer.poll(Duration::from_secs(2)).unwrap();
        match msg {
            RenderMsg::Envelope(env) => {
                assert_eq!(env.frame_id, 7);
                assert!(env.expected.is_empty());
            }
            other => panic!("expected envelope, got {other:?}"),
        }
        for lane in &fabric.slots {
            assert!(lane.is_empty(), "no work items expected");
        }

        fabric.stop.trigger();
        assert!(handle.stop(DEFAULT_GRACE));
    }

    #[test]
    fn extra_centers_are_ignored_left_to_right() {
        let fabric = fabric();
        let locator = Arc::new(FixedCenters(vec![
            (50, 40),
            (150, 40),
            (250, 40),
            (350, 40),
            (450, 40),
            (550, 40),
        ]));
        let handle = spawn_detector(&fabric, detector_params(), Some(locator), Priority::Normal);

        inject_frame(&fabric, 2);

        let envelope = loop {
            match fabric.renderer.poll(Duration::from_secs(2)).unwrap() {
                RenderMsg::Envelope(env) => break env,
                RenderMsg::Partial(_) => {}
            }
        };
        assert_eq!(envelope.expected.len(), 4);

        // The leftmost four centers map onto slots 1..=4 in order.
        let first = fabric.slots[0].poll(Duration::from_secs(1)).unwrap();
        assert_eq!(first.cap_origin.0, 50 - 40);

        fabric.stop.trigger();
        assert!(handle.stop(DEFAULT_GRACE));
    }

    #[test]
    fn locator_panic_degrades_to_empty_envelope() {
        struct Panicking;
        impl CenterLocator for Panicking {
            fn locate(&self, _gray: &world::Image, _band: u32) -> Vec<(u32, u32)> {
                panic!("kernel exploded")
            }
        }

        let fabric = fabric();
        let handle = spawn_detector(
            &fabric,
            detector_params(),
            Some(Arc::new(Panicking)),
            Priority::Normal,
        );

        inject_frame(&fabric, 3);

        match fabric.renderer.poll(Duration::from_secs(2)).unwrap() {
            RenderMsg::Envelope(env) => assert!(env.expected.is_empty()),
            other => panic!("expected envelope, got {other:?}"),
        }

        fabric.stop.trigger();
        assert!(handle.stop(DEFAULT_GRACE));
    }
}
