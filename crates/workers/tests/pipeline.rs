//! End-to-end pipeline scenarios: fan-out, fan-in, backpressure, shutdown,
//! and parameter propagation.

use std::sync::Arc;
use std::time::{Duration, Instant};
use vision::{CenterLocator, MemorySink};
use workers::{
    rings, spawn_analyzer, spawn_capture, spawn_detector, spawn_renderer, spawn_telemetry,
    AnalyzerParams, CaptureParams, DetectorParams, Fabric, FabricConfig, PipelineConfig,
    PipelineManager, RendererParams, TelemetryParams, WorkerHandle, DEFAULT_GRACE,
    INSPECTION_WINDOW,
};
use world::{series, FrameMeta, Image, ParamMap, Priority, SlotId};

struct FixedCenters(Vec<(u32, u32)>);

impl CenterLocator for FixedCenters {
    fn locate(&self, _gray: &Image, _band: u32) -> Vec<(u32, u32)> {
        self.0.clone()
    }
}

fn bright_frame(w: u32, h: u32) -> Image {
    let mut frame = Image::new_u8(w, h, 3);
    frame.pixels.fill(205);
    frame
}

/// Writes a frame into the camera ring and offers its meta to the detector,
/// waiting for a free ring slot if needed.
fn inject_frame(fabric: &Fabric, frame: &Image, frame_id: u64) {
    let slot = fabric
        .rings
        .acquire_free_timeout(rings::CAMERA, Duration::from_secs(2))
        .unwrap()
        .expect("camera ring slot");
    fabric
        .rings
        .write(rings::CAMERA, slot, std::slice::from_ref(frame))
        .unwrap();
    fabric.detector.offer(FrameMeta {
        frame_id,
        ring_slot: slot,
        captured_at: Instant::now(),
        width: frame.width,
        height: frame.height,
    });
}

fn wait_until(timeout: Duration, f: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn stop_all(fabric: &Fabric, handles: Vec<WorkerHandle>) {
    fabric.stop.trigger();
    for handle in handles {
        assert!(handle.stop(DEFAULT_GRACE), "worker must stop in grace");
    }
}

/// One frame, four detections, one completed assembly.
#[test]
fn happy_path_four_slots() {
    let fabric = Fabric::build(&FabricConfig {
        width: 1920,
        height: 1080,
        camera_ring_slots: 2,
        process_ring_slots: 4,
        crop_ring_slots: 4,
        ..FabricConfig::default()
    })
    .unwrap();
    let sink = MemorySink::new();

    let mut handles = Vec::new();
    let (telemetry, store) = spawn_telemetry(
        &fabric,
        TelemetryParams::default(),
        Arc::new(sink.clone()),
        Priority::Low,
    );
    handles.push(telemetry);
    let (renderer, stats) = spawn_renderer(
        &fabric,
        RendererParams::default(),
        Arc::new(sink.clone()),
        Priority::Normal,
    );
    handles.push(renderer);
    for index in 0..4 {
        handles.push(spawn_analyzer(
            &fabric,
            SlotId::from_index(index).unwrap(),
            AnalyzerParams::default(),
            Priority::Normal,
        ));
    }
    handles.push(spawn_detector(
        &fabric,
        DetectorParams::default(),
        Some(Arc::new(FixedCenters(vec![
            (300, 100),
            (700, 100),
            (1100, 100),
            (1500, 100),
        ]))),
        Priority::Normal,
    ));

    let started = Instant::now();
    inject_frame(&fabric, &bright_frame(1920, 1080), 1);

    assert!(
        wait_until(Duration::from_secs(5), || {
            stats.completed.load(std::sync::atomic::Ordering::Relaxed) == 1
        }),
        "assembly must complete with all four partials"
    );
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "completion should be fast, took {:?}",
        started.elapsed()
    );
    assert_eq!(stats.partial.load(std::sync::atomic::Ordering::Relaxed), 0);
    assert_eq!(sink.shown(INSPECTION_WINDOW), 1);

    // The end-to-end cycle sample appears.
    assert!(
        wait_until(Duration::from_secs(2), || {
            !store.snapshot(series::TIME_CYCLE).is_empty()
        }),
        "time_cycle sample must be aggregated"
    );

    stop_all(&fabric, handles);
}

/// A uniform frame yields zero centers; the renderer still
/// displays the original, unmodified.
#[test]
fn zero_centers_displays_original() {
    let fabric = Fabric::build(&FabricConfig {
        width: 400,
        height: 300,
        ..FabricConfig::default()
    })
    .unwrap();
    let sink = MemorySink::new();

    let (renderer, stats) = spawn_renderer(
        &fabric,
        RendererParams::default(),
        Arc::new(sink.clone()),
        Priority::Normal,
    );
    // Real locator: a uniform frame has no dark column runs.
    let detector = spawn_detector(&fabric, DetectorParams::default(), None, Priority::Normal);

    let frame = bright_frame(400, 300);
    inject_frame(&fabric, &frame, 1);

    assert!(wait_until(Duration::from_secs(3), || {
        stats.completed.load(std::sync::atomic::Ordering::Relaxed) == 1
    }));
    let shown = sink.latest(INSPECTION_WINDOW).expect("frame displayed");
    assert_eq!(shown, frame, "no overlays on a frame without detections");

    stop_all(&fabric, vec![renderer, detector]);
}

/// Slot 3 stalls; assemblies render partial at the deadline and
/// slot 3's late results are discarded without crashing.
#[test]
fn stalled_slot_renders_partial_then_discards_late_results() {
    let fabric = Fabric::build(&FabricConfig {
        width: 800,
        height: 400,
        cap_crop: (60, 40),
        level_crop: (60, 60),
        ..FabricConfig::default()
    })
    .unwrap();
    let sink = MemorySink::new();

    let mut handles = Vec::new();
    let (renderer, stats) = spawn_renderer(
        &fabric,
        RendererParams {
            deadline_ms: 100,
            ..RendererParams::default()
        },
        Arc::new(sink.clone()),
        Priority::Normal,
    );
    handles.push(renderer);

    let detector_params = DetectorParams {
        cap_crop: (60, 40),
        cap_y: 0,
        level_crop: (60, 60),
        level_y: 100,
        ..DetectorParams::default()
    };
    handles.push(spawn_detector(
        &fabric,
        detector_params,
        Some(Arc::new(FixedCenters(vec![
            (100, 50),
            (300, 50),
            (500, 50),
            (700, 50),
        ]))),
        Priority::Normal,
    ));

    // Slots 1, 2, 4 run; slot 3 is stalled (spawned later).
    for index in [0usize, 1, 3] {
        handles.push(spawn_analyzer(
            &fabric,
            SlotId::from_index(index).unwrap(),
            AnalyzerParams::default(),
            Priority::Normal,
        ));
    }

    let frame = bright_frame(800, 400);
    for frame_id in 10..20 {
        inject_frame(&fabric, &frame, frame_id);
    }

    let relaxed = std::sync::atomic::Ordering::Relaxed;
    assert!(
        wait_until(Duration::from_secs(5), || stats.partial.load(relaxed) == 10),
        "all ten assemblies drain as partial, got {}",
        stats.partial.load(relaxed)
    );
    assert_eq!(
        stats.partial_missing[2].load(relaxed),
        10,
        "slot 3 is the missing one every time"
    );

    // Slot 3 un-stalls: its queued work produces late partials, which the
    // renderer discards quietly.
    handles.push(spawn_analyzer(
        &fabric,
        SlotId::new(3).unwrap(),
        AnalyzerParams::default(),
        Priority::Normal,
    ));
    assert!(
        wait_until(Duration::from_secs(5), || stats.late_partials.load(relaxed) >= 10),
        "late partials must be discarded, saw {}",
        stats.late_partials.load(relaxed)
    );
    assert_eq!(stats.drained(), 10, "no assembly drains twice");

    stop_all(&fabric, handles);
}

/// Capture at 200 fps into a slow consumer; the detector lane evicts
/// oldest-first and the drop counter accounts for the overflow.
#[test]
fn backpressure_drops_oldest_at_cadence() {
    let fabric = Fabric::build(&FabricConfig {
        width: 320,
        height: 240,
        ..FabricConfig::default()
    })
    .unwrap();

    let capture = spawn_capture(
        &fabric,
        Box::new(camera::SyntheticSource::new(camera::SceneParams {
            width: 320,
            height: 240,
            bottles: 1,
            bottle_width: 60,
            cap_height: 30,
            fill_y: 120,
        })),
        CaptureParams { target_fps: 200.0 },
        Priority::Normal,
    );

    // A detector stand-in that takes 50 ms per frame.
    let lane = fabric.detector.clone();
    let pool = fabric.rings.clone();
    let slow_consumer = std::thread::spawn(move || {
        let started = Instant::now();
        let mut processed = 0u32;
        while started.elapsed() < Duration::from_secs(2) {
            if let Ok(meta) = lane.poll(Duration::from_millis(100)) {
                std::thread::sleep(Duration::from_millis(50));
                pool.release(rings::CAMERA, meta.ring_slot);
                processed += 1;
            }
        }
        processed
    });

    let processed = slow_consumer.join().unwrap();
    let dropped = fabric.detector.dropped();

    assert!(
        (20..=70).contains(&processed),
        "a 50ms consumer should process ~40 frames in 2s, got {processed}"
    );
    assert!(
        dropped > 100,
        "most of the ~400 produced frames must be dropped, counter={dropped}"
    );
    assert!(
        fabric.detector.len() <= fabric.detector.capacity(),
        "queue never exceeds its capacity"
    );

    fabric.stop.trigger();
    assert!(capture.stop(DEFAULT_GRACE));
}

/// Full pipeline shutdown joins everything inside grace + 100 ms.
#[test]
fn clean_shutdown_within_grace() {
    let config = PipelineConfig {
        width: 640,
        height: 360,
        target_fps: 60.0,
        ..PipelineConfig::default()
    };
    let manager = PipelineManager::start(&config, Arc::new(MemorySink::new())).unwrap();

    std::thread::sleep(Duration::from_secs(2));

    let started = Instant::now();
    let clean = manager.shutdown(Duration::from_secs(1));
    assert!(clean, "every worker joins in grace");
    assert!(
        started.elapsed() < Duration::from_millis(1100),
        "shutdown took {:?}",
        started.elapsed()
    );
}

/// A target_fps update converges within a control tick; unknown
/// keys have no effect.
#[test]
fn parameter_update_converges() {
    let fabric = Fabric::build(&FabricConfig {
        width: 320,
        height: 240,
        ..FabricConfig::default()
    })
    .unwrap();

    let capture = spawn_capture(
        &fabric,
        Box::new(camera::SyntheticSource::new(camera::SceneParams {
            width: 320,
            height: 240,
            bottles: 1,
            bottle_width: 60,
            cap_height: 30,
            fill_y: 120,
        })),
        CaptureParams { target_fps: 100.0 },
        Priority::Normal,
    );

    let measure = |window: Duration| -> f64 {
        let started = Instant::now();
        let mut count = 0u32;
        while started.elapsed() < window {
            if let Ok(meta) = fabric.detector.poll(Duration::from_millis(20)) {
                fabric.rings.release(rings::CAMERA, meta.ring_slot);
                count += 1;
            }
        }
        count as f64 / window.as_secs_f64()
    };

    fabric
        .capture_ctl
        .post(ParamMap::new().with("target_fps", 30.0));
    // Let the control tick land and the pacing settle.
    std::thread::sleep(Duration::from_millis(300));
    fabric
        .detector
        .drain()
        .iter()
        .for_each(|meta| fabric.rings.release(rings::CAMERA, meta.ring_slot));

    let rate = measure(Duration::from_secs(1));
    assert!(
        (25.0..=35.0).contains(&rate),
        "measured fps should converge near 30, got {rate:.1}"
    );

    // An unknown key changes nothing.
    fabric.capture_ctl.post(ParamMap::new().with("foo", 1i64));
    std::thread::sleep(Duration::from_millis(200));
    fabric
        .detector
        .drain()
        .iter()
        .for_each(|meta| fabric.rings.release(rings::CAMERA, meta.ring_slot));
    let rate = measure(Duration::from_secs(1));
    assert!(
        (25.0..=35.0).contains(&rate),
        "unknown key must not change pacing, got {rate:.1}"
    );

    fabric.stop.trigger();
    assert!(capture.stop(DEFAULT_GRACE));
}
