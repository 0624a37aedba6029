//! Pipeline orchestrator: builds the fabric, starts the enabled workers,
//! and owns shutdown.

use crate::analyzer::{spawn_analyzer, AnalyzerParams};
use crate::capture::{spawn_capture, CaptureParams};
use crate::detector::{spawn_detector, DetectorParams};
use crate::fabric::{Fabric, FabricConfig};
use crate::harness::WorkerHandle;
use crate::renderer::{spawn_renderer, RenderStats, RendererParams};
use crate::telemetry::{spawn_telemetry, TelemetryParams, TelemetryStore};
use anyhow::{Context, Result};
use camera::{
    FileSource, FrameSource, NetworkSource, RawCodec, SceneParams, StreamAnnounce,
    SyntheticSource,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vision::DisplaySink;
use world::{Priority, SlotId};

/// Which frame source capture runs on.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceKind {
    /// Procedural bottle scene (the default device stand-in).
    Synthetic,
    /// Replay a PPM file.
    File {
        /// Path to the image.
        path: String,
    },
    /// TCP stream server waiting for a remote camera.
    Net {
        /// Bind address, e.g. `0.0.0.0:5000`.
        addr: String,
    },
}

impl Default for SourceKind {
    fn default() -> Self {
        SourceKind::Synthetic
    }
}

/// Which workers the orchestrator starts.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSet {
    /// Start the capture worker.
    pub capture: bool,
    /// Start the detector.
    pub detector: bool,
    /// Start the slot analyzers.
    pub analyzers: bool,
    /// Start the renderer.
    pub renderer: bool,
    /// Start the telemetry aggregator.
    pub telemetry: bool,
}

impl Default for WorkerSet {
    fn default() -> Self {
        Self {
            capture: true,
            detector: true,
            analyzers: true,
            renderer: true,
            telemetry: true,
        }
    }
}

/// Per-worker OS priorities.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritySet {
    /// Capture priority.
    pub capture: Priority,
    /// Detector priority.
    pub detector: Priority,
    /// Analyzer priority.
    pub analyzer: Priority,
    /// Renderer priority.
    pub renderer: Priority,
    /// Telemetry priority.
    pub telemetry: Priority,
}

impl Default for PrioritySet {
    fn default() -> Self {
        Self {
            capture: Priority::High,
            detector: Priority::High,
            analyzer: Priority::Normal,
            renderer: Priority::High,
            telemetry: Priority::Low,
        }
    }
}

/// Static deployment configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Number of analyzer slots.
    pub slot_count: usize,
    /// Capture pacing target.
    pub target_fps: f64,
    /// Frame source.
    pub source: SourceKind,
    /// Renderer assembly deadline, ms.
    pub deadline_ms: u64,
    /// Acceptance band `(ymin, ymax)` for the fill surface.
    pub acceptance_band: (u32, u32),
    /// Renderer ordered-output mode.
    pub ordered: bool,
    /// Telemetry history bound.
    pub max_points: usize,
    /// Telemetry chart refresh, ms.
    pub refresh_ms: u64,
    /// Enabled workers.
    pub workers: WorkerSet,
    /// Worker priorities.
    pub priorities: PrioritySet,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            slot_count: world::MAX_SLOTS,
            target_fps: 50.0,
            source: SourceKind::default(),
            deadline_ms: 100,
            acceptance_band: (330, 400),
            ordered: false,
            max_points: 600,
            refresh_ms: 50,
            workers: WorkerSet::default(),
            priorities: PrioritySet::default(),
        }
    }
}

impl PipelineConfig {
    fn fabric_config(&self) -> FabricConfig {
        FabricConfig {
            width: self.width,
            height: self.height,
            slot_count: self.slot_count,
            ..FabricConfig::default()
        }
    }

    fn build_source(&self) -> Result<Box<dyn FrameSource>> {
        Ok(match &self.source {
            SourceKind::Synthetic => Box::new(SyntheticSource::new(SceneParams {
                width: self.width,
                height: self.height,
                ..SceneParams::default()
            })),
            SourceKind::File { path } => {
                Box::new(FileSource::open(path).with_context(|| format!("opening {path}"))?)
            }
            SourceKind::Net { addr } => Box::new(
                NetworkSource::bind(
                    addr.as_str(),
                    Box::new(RawCodec),
                    StreamAnnounce {
                        stream_id: 4,
                        width: self.width,
                        height: self.height,
                        quality: 95,
                        framerate: self.target_fps as u32,
                    },
                )
                .with_context(|| format!("binding stream server on {addr}"))?,
            ),
        })
    }
}

/// The running pipeline.
pub struct PipelineManager {
    fabric: Fabric,
    workers: Vec<WorkerHandle>,
    render_stats: Option<Arc<RenderStats>>,
    telemetry_store: Option<TelemetryStore>,
}

impl PipelineManager {
    /// Builds the fabric and starts every enabled worker.
    ///
    /// Ring or lane construction failure is fatal and surfaces here; the
    /// binary maps it to a non-zero exit.
    pub fn start(config: &PipelineConfig, sink: Arc<dyn DisplaySink>) -> Result<Self> {
        let fabric =
            Fabric::build(&config.fabric_config()).context("building rings and lanes")?;
        let mut workers = Vec::new();
        let mut render_stats = None;
        let mut telemetry_store = None;

        if config.workers.telemetry {
            let (handle, store) = spawn_telemetry(
                &fabric,
                TelemetryParams {
                    max_points: config.max_points,
                    refresh_ms: config.refresh_ms,
                },
                Arc::clone(&sink),
                config.priorities.telemetry,
            );
            workers.push(handle);
            telemetry_store = Some(store);
        }

        if config.workers.renderer {
            let (handle, stats) = spawn_renderer(
                &fabric,
                RendererParams {
                    deadline_ms: config.deadline_ms,
                    band_ymin: config.acceptance_band.0,
                    band_ymax: config.acceptance_band.1,
                    ordered: config.ordered,
                },
                Arc::clone(&sink),
                config.priorities.renderer,
            );
            workers.push(handle);
            render_stats = Some(stats);
        }

        if config.workers.analyzers {
            for index in 0..fabric.slot_count() {
                let slot = SlotId::from_index(index).expect("slot count clamped");
                workers.push(spawn_analyzer(
                    &fabric,
                    slot,
                    AnalyzerParams::default(),
                    config.priorities.analyzer,
                ));
            }
        }

        if config.workers.detector {
            workers.push(spawn_detector(
                &fabric,
                DetectorParams::default(),
                None,
                config.priorities.detector,
            ));
        }

        if config.workers.capture {
            let source = config.build_source().context("building frame source")?;
            workers.push(spawn_capture(
                &fabric,
                source,
                CaptureParams {
                    target_fps: config.target_fps,
                },
                config.priorities.capture,
            ));
        }

        info!(workers = workers.len(), "pipeline started");
        Ok(Self {
            fabric,
            workers,
            render_stats,
            telemetry_store,
        })
    }

    /// The shared fabric (mailboxes, lanes, stop signal).
    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    /// Renderer counters, when the renderer is running.
    pub fn render_stats(&self) -> Option<&Arc<RenderStats>> {
        self.render_stats.as_ref()
    }

    /// Telemetry store, when the aggregator is running.
    pub fn telemetry_store(&self) -> Option<&TelemetryStore> {
        self.telemetry_store.as_ref()
    }

    /// Blocks until the stop signal fires (from any thread or signal hook).
    pub fn wait(&self) {
        let rx = self.fabric.stop.subscribe();
        // The channel only ever signals by disconnecting.
        let _ = rx.recv();
    }

    /// Broadcasts stop, joins every worker within `grace`, force-releases
    /// ring slots, and logs the drop/partial summary.
    ///
    /// Returns `true` when every task stopped inside the grace window.
    pub fn shutdown(mut self, grace: Duration) -> bool {
        self.fabric.stop.trigger();

        // Wind down sinks-first is unnecessary: the stop bit reaches every
        // poll, so workers are told to stop before any join begins.
        for worker in &self.workers {
            worker.request_stop();
        }

        let mut clean = true;
        for worker in self.workers.drain(..) {
            let name = worker.name().to_owned();
            if !worker.stop(grace) {
                info!(worker = %name, "did not stop within grace");
                clean = false;
            }
        }

        self.fabric.rings.force_release_all();

        info!(
            detector_dropped = self.fabric.detector.dropped(),
            renderer_dropped = self.fabric.renderer.dropped(),
            "pipeline stopped"
        );
        for lane in &self.fabric.slots {
            if lane.dropped() > 0 {
                info!(lane = lane.name(), dropped = lane.dropped(), "slot lane drops");
            }
        }
        if let Some(stats) = &self.render_stats {
            info!(summary = %stats.summary(), "render summary");
        }
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use vision::MemorySink;

    fn quick_config() -> PipelineConfig {
        PipelineConfig {
            width: 640,
            height: 360,
            target_fps: 30.0,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = quick_config();
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.width, 640);
        assert_eq!(back.slot_count, 4);
        assert!(matches!(back.source, SourceKind::Synthetic));
    }

    #[test]
    fn partial_config_uses_defaults() {
        let back: PipelineConfig = serde_json::from_str(r#"{"target_fps": 10.0}"#).unwrap();
        assert_eq!(back.target_fps, 10.0);
        assert_eq!(back.width, 1280);
        assert!(back.workers.renderer);
    }

    #[test]
    fn start_run_shutdown_is_clean() {
        let sink = Arc::new(MemorySink::new());
        let manager = PipelineManager::start(&quick_config(), sink).expect("pipeline starts");

        std::thread::sleep(Duration::from_millis(400));

        let started = Instant::now();
        let clean = manager.shutdown(Duration::from_secs(1));
        let took = started.elapsed();

        assert!(clean, "all workers must stop in grace");
        assert!(
            took < Duration::from_millis(1100),
            "shutdown took {took:?}, budget is grace + 100ms"
        );
    }

    #[test]
    fn missing_file_source_fails_start() {
        let config = PipelineConfig {
            source: SourceKind::File {
                path: "/no/such/frame.ppm".to_owned(),
            },
            ..quick_config()
        };
        let sink = Arc::new(MemorySink::new());
        assert!(PipelineManager::start(&config, sink).is_err());
    }

    #[test]
    fn wait_returns_after_stop() {
        let sink = Arc::new(MemorySink::new());
        let config = PipelineConfig {
            workers: WorkerSet {
                capture: false,
                detector: false,
                analyzers: false,
                renderer: false,
                telemetry: true,
            },
            ..quick_config()
        };
        let manager = PipelineManager::start(&config, sink).unwrap();
        let stop = manager.fabric().stop.clone();

        let waiter = std::thread::spawn(move || {
            let started = Instant::now();
            // Trigger from another thread shortly after.
            std::thread::sleep(Duration::from_millis(50));
            stop.trigger();
            started.elapsed()
        });

        manager.wait();
        waiter.join().unwrap();
        assert!(manager.shutdown(Duration::from_secs(1)));
    }
}
