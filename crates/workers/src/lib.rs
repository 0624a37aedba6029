//! The five pipeline workers, their shared harness, and the orchestrator.
//!
//! Data flow: Capture → (frame ring + detector lane) → Detector →
//! (4 slot lanes) → Analyzer *i* → (renderer lane) → Renderer, with every
//! worker feeding the telemetry lane.  Control flows the other way through
//! per-worker mailboxes.  The [`manager::PipelineManager`] builds the fabric,
//! starts the enabled workers, and owns shutdown.

mod analyzer;
mod capture;
mod detector;
mod fabric;
mod harness;
pub mod manager;
mod renderer;
mod telemetry;
mod timing;

pub use analyzer::{spawn_analyzer, AnalyzerParams};
pub use capture::{spawn_capture, CaptureParams};
pub use detector::{spawn_detector, DetectorParams};
pub use fabric::{rings, Fabric, FabricConfig, TelemetrySink};
pub use harness::{Harness, ParamCell, TaskCtx, WorkerHandle, DEFAULT_GRACE};
pub use manager::{PipelineConfig, PipelineManager, PrioritySet, SourceKind, WorkerSet};
pub use renderer::{spawn_renderer, RenderStats, RendererParams, INSPECTION_WINDOW};
pub use telemetry::{spawn_telemetry, TelemetryParams, TelemetryStore, TELEMETRY_WINDOW};
pub use timing::{ms_since, FrameFps};
