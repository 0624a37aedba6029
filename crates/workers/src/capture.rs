//! Capture worker: acquires frames, publishes them into the camera ring,
//! and feeds the detector lane.

use crate::fabric::{rings, Fabric};
use crate::harness::{Harness, ParamCell, WorkerHandle};
use crate::timing::{ms_since, FrameFps};
use camera::FrameSource;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use transport::Offer;
use world::{series, FrameMeta, ParamMap, Priority};

/// Cadence between reconnect attempts after a source disconnect.
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// How long capture waits for a free camera-ring slot before dropping the
/// frame; kept well under one frame period.
const RING_WAIT: Duration = Duration::from_millis(5);

/// Capture tuning; updated through the control mailbox.
#[derive(Clone, Copy, Debug)]
pub struct CaptureParams {
    /// Frames per second the pacing loop aims for.
    pub target_fps: f64,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self { target_fps: 50.0 }
    }
}

fn apply(params: &mut CaptureParams, map: &ParamMap) {
    if let Some(fps) = map.get_f64("target_fps") {
        if fps > 0.0 {
            params.target_fps = fps;
        }
    }
}

/// Spawns the capture worker.
///
/// The worker owns `source`; device-open failures surface before spawn (the
/// source is already constructed), network losses are retried forever at a
/// one-second cadence.
pub fn spawn_capture(
    fabric: &Fabric,
    mut source: Box<dyn FrameSource>,
    initial: CaptureParams,
    priority: Priority,
) -> WorkerHandle {
    let params = ParamCell::new(initial);
    let control_params = params.clone();

    let pool = fabric.rings.clone();
    let detector = fabric.detector.clone();
    let sink = fabric.telemetry_sink();
    let stop = fabric.stop.clone();

    info!(source = %source.describe(), "capture starting");

    Harness::new("capture", stop)
        .telemetry(sink.clone())
        .priority(priority)
        .task("acquire", move |ctx| {
            let mut fps = FrameFps::new(1.0);
            let mut frame_id: u64 = 0;

            while !ctx.should_stop() {
                let p = params.load();
                let period = Duration::from_secs_f64(1.0 / p.target_fps.max(0.1));
                let cycle_start = Instant::now();

                let image = match source.next_frame() {
                    Ok(Some(image)) => image,
                    Ok(None) => {
                        ctx.sleep_interruptible(Duration::from_millis(20));
                        continue;
                    }
                    Err(err) if err.is_disconnect() => {
                        warn!(%err, "source disconnected, retrying");
                        sink.emit(series::errors("source_disconnected"), 1.0);
                        ctx.sleep_interruptible(RECONNECT_PAUSE);
                        continue;
                    }
                    Err(err) => {
                        warn!(%err, "frame acquisition failed");
                        sink.emit(series::errors("source"), 1.0);
                        ctx.sleep_interruptible(Duration::from_millis(100));
                        continue;
                    }
                };

                let captured_at = Instant::now();
                let acquire = captured_at - cycle_start;
                if acquire > period * 2 {
                    warn!(?acquire, ?period, "frame acquisition exceeded 2x period");
                }

                frame_id += 1;
                publish(
                    &pool, &detector, &sink, &image, frame_id, captured_at,
                );

                if let Some(rate) = fps.update() {
                    sink.emit(series::FPS, rate);
                    sink.emit(series::queue_depth("detector"), detector.len() as f64);
                }
                sink.emit(series::PROCESS_CAPTURE, ms_since(cycle_start));

                let elapsed = cycle_start.elapsed();
                if elapsed < period {
                    ctx.sleep_interruptible(period - elapsed);
                }
            }
        })
        .control_task(fabric.capture_ctl.clone(), move |map| {
            control_params.update(|p| apply(p, map));
        })
        .spawn()
}

fn publish(
    pool: &transport::RingPool,
    detector: &transport::Lane<FrameMeta>,
    sink: &crate::fabric::TelemetrySink,
    image: &world::Image,
    frame_id: u64,
    captured_at: Instant,
) {
    let slot = match pool.acquire_free_timeout(rings::CAMERA, RING_WAIT) {
        Ok(Some(slot)) => slot,
        Ok(None) => {
            // Downstream still holds every slot; cadence wins, frame dies.
            sink.emit(series::dropped("capture_ring"), 1.0);
            return;
        }
        Err(err) => {
            warn!(%err, "camera ring unavailable");
            return;
        }
    };

    if let Err(err) = pool.write(rings::CAMERA, slot, std::slice::from_ref(image)) {
        warn!(%err, "camera ring write failed");
        sink.emit(series::errors("invalid_shape"), 1.0);
        return;
    }

    let meta = FrameMeta {
        frame_id,
        ring_slot: slot,
        captured_at,
        width: image.width,
        height: image.height,
    };
    match detector.offer(meta) {
        Offer::Accepted => {}
        Offer::DroppedOldest(evicted) => {
            for old in evicted {
                pool.release(rings::CAMERA, old.ring_slot);
            }
            sink.emit(series::dropped("detector"), detector.dropped() as f64);
        }
        Offer::DroppedNew(meta) => {
            pool.release(rings::CAMERA, meta.ring_slot);
            sink.emit(series::dropped("detector"), detector.dropped() as f64);
        }
    }
}
