//! Telemetry worker: aggregates samples from every worker and renders the
//! chart.

use crate::fabric::Fabric;
use crate::harness::{Harness, ParamCell, WorkerHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use transport::PollError;
use vision::{render_chart, ChartSeries, ChartStyle, DisplaySink};
use world::{ParamMap, Priority, Sample};

/// Window name the chart is shown under.
pub const TELEMETRY_WINDOW: &str = "telemetry";

/// Telemetry tuning.
#[derive(Clone, Copy, Debug)]
pub struct TelemetryParams {
    /// Bounded history per series.
    pub max_points: usize,
    /// Chart refresh interval, clamped to 10–100 ms.
    pub refresh_ms: u64,
}

impl Default for TelemetryParams {
    fn default() -> Self {
        Self {
            max_points: 600,
            refresh_ms: 50,
        }
    }
}

fn unit_for(series: &str) -> &'static str {
    if series == "fps" {
        "Hz"
    } else if series.starts_with("dropped_") || series.starts_with("errors/") {
        "count"
    } else if series.starts_with("queue_") {
        "items"
    } else {
        "ms"
    }
}

struct SeriesRing {
    points: Vec<(f64, f64)>,
    enabled: bool,
    unit: &'static str,
}

struct StoreInner {
    series: HashMap<String, SeriesRing>,
    max_points: usize,
}

/// Bounded per-series history; shared between the ingest and render tasks
/// and handed to tests for assertions.
#[derive(Clone)]
pub struct TelemetryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl TelemetryStore {
    fn new(max_points: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                series: HashMap::new(),
                max_points: max_points.max(2),
            })),
        }
    }

    fn append(&self, sample: Sample) {
        let mut inner = self.inner.lock();
        let max_points = inner.max_points;
        let ring = inner
            .series
            .entry(sample.series.clone())
            .or_insert_with(|| SeriesRing {
                points: Vec::new(),
                enabled: true,
                unit: unit_for(&sample.series),
            });
        ring.points.push((sample.t, sample.value));
        // Newest-wins eviction.
        if ring.points.len() > max_points {
            let excess = ring.points.len() - max_points;
            ring.points.drain(..excess);
        }
    }

    fn set_max_points(&self, max_points: usize) {
        self.inner.lock().max_points = max_points.max(2);
    }

    /// Toggles rendering for a series; a disabled series keeps ingesting.
    pub fn set_enabled(&self, series: &str, enabled: bool) {
        let mut inner = self.inner.lock();
        if let Some(ring) = inner.series.get_mut(series) {
            ring.enabled = enabled;
        } else {
            inner.series.insert(
                series.to_owned(),
                SeriesRing {
                    points: Vec::new(),
                    enabled,
                    unit: unit_for(series),
                },
            );
        }
    }

    /// Copy of a series' points.
    pub fn snapshot(&self, series: &str) -> Vec<(f64, f64)> {
        self.inner
            .lock()
            .series
            .get(series)
            .map(|ring| ring.points.clone())
            .unwrap_or_default()
    }

    /// Unit label of a series, if it has one.
    pub fn unit(&self, series: &str) -> Option<&'static str> {
        self.inner.lock().series.get(series).map(|ring| ring.unit)
    }

    /// Names of all series seen so far.
    pub fn series_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().series.keys().cloned().collect();
        names.sort();
        names
    }

    fn render(&self, sink: &dyn DisplaySink) {
        let chart = {
            let inner = self.inner.lock();
            let mut names: Vec<&String> = inner
                .series
                .iter()
                .filter(|(_, ring)| ring.enabled && ring.points.len() >= 2)
                .map(|(name, _)| name)
                .collect();
            names.sort();

            let series: Vec<ChartSeries<'_>> = names
                .iter()
                .map(|name| ChartSeries {
                    name: name.as_str(),
                    points: &inner.series[name.as_str()].points,
                })
                .collect();

            render_chart(&series, &ChartStyle::default())
        };
        sink.show(&chart, TELEMETRY_WINDOW);
    }
}

fn apply(params: &mut TelemetryParams, store: &TelemetryStore, map: &ParamMap) {
    if let Some(v) = map.get_i64("max_points") {
        params.max_points = v.max(2) as usize;
        store.set_max_points(params.max_points);
    }
    if let Some(v) = map.get_i64("refresh_ms") {
        params.refresh_ms = v.clamp(10, 100) as u64;
    }
    for (key, value) in map.iter() {
        if let Some(series) = key.strip_prefix("enabled:") {
            if let Some(enabled) = value.as_bool() {
                store.set_enabled(series, enabled);
            }
        }
    }
}

/// Spawns the telemetry worker; returns its handle and the shared store.
pub fn spawn_telemetry(
    fabric: &Fabric,
    initial: TelemetryParams,
    sink: Arc<dyn DisplaySink>,
    priority: Priority,
) -> (WorkerHandle, TelemetryStore) {
    let params = ParamCell::new(initial);
    let control_params = params.clone();
    let store = TelemetryStore::new(initial.max_points);
    let control_store = store.clone();

    let lane = fabric.telemetry.clone();
    let ingest_store = store.clone();
    let render_store = store.clone();
    let render_params = params.clone();

    let handle = Harness::new("telemetry", fabric.stop.clone())
        .priority(priority)
        .task("ingest", move |ctx| {
            while !ctx.should_stop() {
                match lane.poll(Duration::from_millis(100)) {
                    Ok(sample) => ingest_store.append(sample),
                    Err(PollError::Timeout) => {}
                    Err(_) => break,
                }
            }
        })
        .task("render", move |ctx| {
            while !ctx.should_stop() {
                render_store.render(sink.as_ref());
                let refresh = render_params.load().refresh_ms.clamp(10, 100);
                ctx.sleep_interruptible(Duration::from_millis(refresh));
            }
        })
        .control_task(fabric.telemetry_ctl.clone(), move |map| {
            let store = control_store.clone();
            control_params.update(|p| apply(p, &store, map));
        })
        .spawn();

    (handle, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::FabricConfig;
    use crate::harness::DEFAULT_GRACE;
    use std::time::Instant;
    use vision::MemorySink;

    #[test]
    fn store_bounds_history_newest_wins() {
        let store = TelemetryStore::new(5);
        for i in 0..20 {
            store.append(Sample::new("fps", i as f64, i as f64));
        }
        let points = store.snapshot("fps");
        assert_eq!(points.len(), 5);
        assert_eq!(points[0].1, 15.0);
        assert_eq!(points[4].1, 19.0);
    }

    #[test]
    fn disabled_series_still_ingests() {
        let store = TelemetryStore::new(10);
        store.set_enabled("fps", false);
        store.append(Sample::new("fps", 0.0, 1.0));
        store.append(Sample::new("fps", 1.0, 2.0));
        assert_eq!(store.snapshot("fps").len(), 2);
    }

    #[test]
    fn units_follow_naming_convention() {
        let store = TelemetryStore::new(10);
        store.append(Sample::new("fps", 0.0, 1.0));
        store.append(Sample::new("process_render", 0.0, 1.0));
        store.append(Sample::new("dropped_detector", 0.0, 1.0));
        assert_eq!(store.unit("fps"), Some("Hz"));
        assert_eq!(store.unit("process_render"), Some("ms"));
        assert_eq!(store.unit("dropped_detector"), Some("count"));
    }

    #[test]
    fn worker_ingests_and_renders() {
        let fabric = Fabric::build(&FabricConfig::default()).unwrap();
        let sink = MemorySink::new();
        let (handle, store) = spawn_telemetry(
            &fabric,
            TelemetryParams::default(),
            Arc::new(sink.clone()),
            Priority::Low,
        );

        let emitter = fabric.telemetry_sink();
        for i in 0..10 {
            emitter.emit("fps", 30.0 + i as f64);
        }

        let deadline = Instant::now() + Duration::from_secs(3);
        while (store.snapshot("fps").len() < 10 || sink.shown(TELEMETRY_WINDOW) == 0)
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(store.snapshot("fps").len(), 10);
        assert!(sink.shown(TELEMETRY_WINDOW) > 0, "chart must be rendered");

        // max_points update through the mailbox shrinks history.
        fabric
            .telemetry_ctl
            .post(ParamMap::new().with("max_points", 4i64));
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            emitter.emit("fps", 1.0);
            if store.snapshot("fps").len() <= 4 || Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(store.snapshot("fps").len() <= 4);

        fabric.stop.trigger();
        assert!(handle.stop(DEFAULT_GRACE));
    }
}
