//! Slot analyzer worker: horizontal-line detection on one bottle lane.

use crate::fabric::{rings, Fabric, TelemetrySink};
use crate::harness::{Harness, ParamCell, WorkerHandle};
use crate::timing::ms_since;
use smallvec::SmallVec;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::warn;
use transport::{Lane, Offer, PollError, RingPool};
use vision::{detect_horizontal_lines, LineParams};
use world::msg::LineBatch;
use world::{series, ParamMap, PartialResult, Priority, RenderMsg, SlotId, WorkItem};

/// Per-slot analysis tuning: one parameter set for each crop kind.
#[derive(Clone, Copy, Debug)]
pub struct AnalyzerParams {
    /// Line detection parameters for the cap crop.
    pub cap: LineParams,
    /// Line detection parameters for the level crop.
    pub level: LineParams,
}

impl Default for AnalyzerParams {
    fn default() -> Self {
        Self {
            cap: LineParams {
                canny_t1: 70,
                canny_t2: 30,
                theta_step_deg: 0.5,
                hough_threshold: 70,
                min_line_length: 10,
                max_line_gap: 50,
                angle_tolerance_deg: 30.0,
                morph_close_size: 2,
            },
            level: LineParams {
                canny_t1: 15,
                canny_t2: 20,
                theta_step_deg: 1.0,
                hough_threshold: 50,
                min_line_length: 100,
                max_line_gap: 50,
                angle_tolerance_deg: 3.0,
                morph_close_size: 0,
            },
        }
    }
}

fn apply(params: &mut AnalyzerParams, map: &ParamMap) {
    // Bare keys address both parameter sets; `cap_`/`level_` prefixes one.
    apply_line_params(&mut params.cap, map, "");
    apply_line_params(&mut params.level, map, "");
    apply_line_params(&mut params.cap, map, "cap_");
    apply_line_params(&mut params.level, map, "level_");
}

fn apply_line_params(params: &mut LineParams, map: &ParamMap, prefix: &str) {
    let key = |name: &str| format!("{prefix}{name}");
    if let Some(v) = map.get_i64(&key("canny_t1")) {
        params.canny_t1 = v.clamp(0, 255) as u8;
    }
    if let Some(v) = map.get_i64(&key("canny_t2")) {
        params.canny_t2 = v.clamp(0, 255) as u8;
    }
    if let Some(v) = map.get_f64(&key("theta_step")) {
        if v > 0.0 {
            params.theta_step_deg = v;
        }
    }
    if let Some(v) = map.get_i64(&key("hough_threshold")) {
        params.hough_threshold = v.max(1) as u32;
    }
    if let Some(v) = map.get_i64(&key("min_line_length")) {
        params.min_line_length = v.max(1) as u32;
    }
    if let Some(v) = map.get_i64(&key("max_line_gap")) {
        params.max_line_gap = v.max(0) as u32;
    }
    if let Some(v) = map.get_f64(&key("angle_tolerance_deg")) {
        params.angle_tolerance_deg = v.max(0.0);
    }
    if let Some(v) = map.get_i64(&key("morph_close_size")) {
        params.morph_close_size = v.max(0) as u32;
    }
}

/// Spawns one slot analyzer; the pipeline runs one per `SlotId`.
pub fn spawn_analyzer(
    fabric: &Fabric,
    slot: SlotId,
    initial: AnalyzerParams,
    priority: Priority,
) -> WorkerHandle {
    let params = ParamCell::new(initial);
    let control_params = params.clone();

    let pool = fabric.rings.clone();
    let input = fabric.slots[slot.index()].clone();
    let renderer = fabric.renderer.clone();
    let sink = fabric.telemetry_sink();
    let stop = fabric.stop.clone();
    let mailbox = fabric.analyzer_ctl[slot.index()].clone();

    Harness::new(&format!("analyzer_{slot}"), stop)
        .telemetry(sink.clone())
        .priority(priority)
        .task("analyze", move |ctx| {
            while !ctx.should_stop() {
                match input.poll(Duration::from_millis(100)) {
                    Ok(item) => {
                        let partial = analyze(&pool, &sink, &params.load(), slot, item);
                        forward(&renderer, &sink, partial);
                    }
                    Err(PollError::Timeout) => {}
                    Err(_) => break,
                }
            }
        })
        .control_task(mailbox, move |map| {
            control_params.update(|p| apply(p, map));
        })
        .spawn()
}

fn analyze(
    pool: &RingPool,
    sink: &TelemetrySink,
    params: &AnalyzerParams,
    slot: SlotId,
    item: WorkItem,
) -> PartialResult {
    let start = Instant::now();
    let queue_wait_ms = (start - item.dispatched_at).as_secs_f64() * 1000.0;
    sink.emit(series::time_input_cap_level(slot), queue_wait_ms);

    let cap_ring = rings::cap(slot);
    let level_ring = rings::level(slot);

    let cap_lines = read_and_detect(pool, sink, &cap_ring, item.cap_ring_slot, &params.cap);
    let mut level_lines =
        read_and_detect(pool, sink, &level_ring, item.level_ring_slot, &params.level);

    // The topmost level line is the fill surface.
    level_lines.sort_by_key(|line| line.top_y());

    let process_ms = ms_since(start);
    sink.emit(series::process_cap_level(slot), process_ms);

    PartialResult {
        frame_id: item.frame_id,
        slot,
        cap_lines,
        level_lines,
        cap_origin: item.cap_origin,
        level_origin: item.level_origin,
        queue_wait_ms,
        process_ms,
    }
}

/// Reads one crop and runs the kernel; any failure yields an empty batch so
/// the renderer still receives its partial.
fn read_and_detect(
    pool: &RingPool,
    sink: &TelemetrySink,
    ring: &str,
    ring_slot: usize,
    params: &LineParams,
) -> LineBatch {
    let crop = match pool.read(ring, ring_slot, Some(1)) {
        Ok(mut images) if !images.is_empty() => images.remove(0),
        Ok(_) => {
            pool.release(ring, ring_slot);
            return SmallVec::new();
        }
        Err(err) => {
            warn!(ring, ring_slot, %err, "crop read failed, emitting empty result");
            sink.emit(series::errors("analysis"), 1.0);
            return SmallVec::new();
        }
    };
    pool.release(ring, ring_slot);

    match catch_unwind(AssertUnwindSafe(|| detect_horizontal_lines(&crop, params))) {
        Ok(lines) => lines,
        Err(_) => {
            warn!(ring, "line kernel panicked");
            sink.emit(series::errors("analysis"), 1.0);
            SmallVec::new()
        }
    }
}

fn forward(renderer: &Lane<RenderMsg>, sink: &TelemetrySink, partial: PartialResult) {
    match renderer.offer(RenderMsg::Partial(partial)) {
        Offer::Accepted => {}
        _ => sink.emit(series::dropped("renderer"), renderer.dropped() as f64),
    }
}
