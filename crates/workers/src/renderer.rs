//! Renderer worker: the N→1 fan-in.
//!
//! A single lane multiplexes detector envelopes and analyzer partials.  Each
//! frame gets a [`FrameAssembly`]; an assembly drains either when every
//! expected slot has reported or when its deadline expires, whichever comes
//! first.  Frames complete out of order by default; `ordered` mode buffers
//! composed output until lower frame ids have drained.

use crate::fabric::{rings, Fabric, TelemetrySink};
use crate::harness::{Harness, ParamCell, WorkerHandle};
use crate::timing::ms_since;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use transport::{PollError, RingPool};
use vision::{draw_line, Color, DisplaySink};
use world::{series, FrameEnvelope, Image, ParamMap, PartialResult, Priority, SlotSet, MAX_SLOTS};

/// Window name composed frames are shown under.
pub const INSPECTION_WINDOW: &str = "inspection";

/// Sweep cadence for expired assemblies.
const SWEEP_TICK: Duration = Duration::from_millis(10);

/// How many drained frame ids are remembered for late-partial rejection.
const DRAINED_MEMORY: usize = 512;

/// Renderer tuning.
#[derive(Clone, Copy, Debug)]
pub struct RendererParams {
    /// Assembly deadline in milliseconds.
    pub deadline_ms: u64,
    /// Acceptance band: lowest acceptable fill-surface y (frame coords).
    pub band_ymin: u32,
    /// Acceptance band: highest acceptable fill-surface y.
    pub band_ymax: u32,
    /// Emit frames in ascending frame-id order.
    pub ordered: bool,
}

impl Default for RendererParams {
    fn default() -> Self {
        Self {
            deadline_ms: 100,
            band_ymin: 330,
            band_ymax: 400,
            ordered: false,
        }
    }
}

fn apply(params: &mut RendererParams, map: &ParamMap) {
    if let Some(v) = map.get_i64("deadline_ms") {
        params.deadline_ms = v.max(1) as u64;
    }
    if let Some(v) = map.get_i64("acceptance_band_ymin") {
        params.band_ymin = v.max(0) as u32;
    }
    if let Some(v) = map.get_i64("acceptance_band_ymax") {
        params.band_ymax = v.max(0) as u32;
    }
    if let Some(v) = map.get_bool("ordered") {
        params.ordered = v;
    }
}

/// Renderer counters, shared with tests and the shutdown summary.
#[derive(Debug, Default)]
pub struct RenderStats {
    /// Assemblies drained with every expected partial present.
    pub completed: AtomicU64,
    /// Assemblies drained at deadline with partials missing.
    pub partial: AtomicU64,
    /// Per-slot count of missing partials in partial renders.
    pub partial_missing: [AtomicU64; MAX_SLOTS],
    /// Partials that arrived after their frame had drained.
    pub late_partials: AtomicU64,
    /// Assemblies whose original frame was no longer readable.
    pub poisoned: AtomicU64,
    /// Composited images dropped because the sink was too slow.
    pub sink_dropped: AtomicU64,
}

impl RenderStats {
    /// Total drained assemblies.
    pub fn drained(&self) -> u64 {
        self.completed.load(Ordering::Relaxed) + self.partial.load(Ordering::Relaxed)
    }

    /// One-line shutdown summary.
    pub fn summary(&self) -> String {
        let missing: Vec<u64> = self
            .partial_missing
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        format!(
            "completed={} partial={} missing_per_slot={:?} late={} poisoned={} sink_dropped={}",
            self.completed.load(Ordering::Relaxed),
            self.partial.load(Ordering::Relaxed),
            missing,
            self.late_partials.load(Ordering::Relaxed),
            self.poisoned.load(Ordering::Relaxed),
            self.sink_dropped.load(Ordering::Relaxed),
        )
    }
}

struct FrameAssembly {
    expected: Option<SlotSet>,
    received: SlotSet,
    partials: [Option<PartialResult>; MAX_SLOTS],
    ring_slot: Option<usize>,
    captured_at: Option<Instant>,
    deadline: Instant,
}

impl FrameAssembly {
    fn new(deadline: Instant) -> Self {
        Self {
            expected: None,
            received: SlotSet::EMPTY,
            partials: [None, None, None, None],
            ring_slot: None,
            captured_at: None,
            deadline,
        }
    }

    fn is_complete(&self) -> bool {
        self.expected
            .is_some_and(|expected| self.received.is_superset(expected))
    }
}

struct RenderState {
    assemblies: HashMap<u64, FrameAssembly>,
    drained_order: VecDeque<u64>,
    drained: HashSet<u64>,
    ordered_out: BTreeMap<u64, Image>,
    last_show_ms: f64,
}

impl RenderState {
    fn new() -> Self {
        Self {
            assemblies: HashMap::new(),
            drained_order: VecDeque::new(),
            drained: HashSet::new(),
            ordered_out: BTreeMap::new(),
            last_show_ms: 0.0,
        }
    }

    fn mark_drained(&mut self, frame_id: u64) {
        if self.drained.insert(frame_id) {
            self.drained_order.push_back(frame_id);
            while self.drained_order.len() > DRAINED_MEMORY {
                if let Some(old) = self.drained_order.pop_front() {
                    self.drained.remove(&old);
                }
            }
        }
    }
}

struct Renderer {
    pool: Arc<RingPool>,
    sink: Arc<dyn DisplaySink>,
    telemetry: TelemetrySink,
    stats: Arc<RenderStats>,
    params: ParamCell<RendererParams>,
    state: Mutex<RenderState>,
}

/// Spawns the renderer; returns its handle and the shared counters.
pub fn spawn_renderer(
    fabric: &Fabric,
    initial: RendererParams,
    sink: Arc<dyn DisplaySink>,
    priority: Priority,
) -> (WorkerHandle, Arc<RenderStats>) {
    let params = ParamCell::new(initial);
    let control_params = params.clone();
    let stats = Arc::new(RenderStats::default());

    let renderer = Arc::new(Renderer {
        pool: fabric.rings.clone(),
        sink,
        telemetry: fabric.telemetry_sink(),
        stats: Arc::clone(&stats),
        params,
        state: Mutex::new(RenderState::new()),
    });

    let input = fabric.renderer.clone();
    let fanin = Arc::clone(&renderer);
    let sweeper = Arc::clone(&renderer);

    let handle = Harness::new("renderer", fabric.stop.clone())
        .telemetry(fabric.telemetry_sink())
        .priority(priority)
        .task("fanin", move |ctx| {
            while !ctx.should_stop() {
                match input.poll(SWEEP_TICK) {
                    Ok(world::RenderMsg::Envelope(env)) => fanin.on_envelope(env),
                    Ok(world::RenderMsg::Partial(partial)) => fanin.on_partial(partial),
                    Err(PollError::Timeout) => {}
                    Err(_) => break,
                }
            }
        })
        .task("sweep", move |ctx| {
            while !ctx.should_stop() {
                sweeper.sweep();
                ctx.sleep_interruptible(SWEEP_TICK);
            }
            // Final sweep so shutdown leaves no assemblies behind.
            sweeper.drain_all();
        })
        .control_task(fabric.renderer_ctl.clone(), move |map| {
            control_params.update(|p| apply(p, map));
        })
        .spawn();

    (handle, stats)
}

impl Renderer {
    fn deadline_from_now(&self) -> Instant {
        Instant::now() + Duration::from_millis(self.params.load().deadline_ms)
    }

    fn on_envelope(&self, env: FrameEnvelope) {
        let mut state = self.state.lock();
        if state.drained.contains(&env.frame_id) {
            // The assembly already drained (its partials beat the envelope
            // and then expired); the parked frame must not leak.
            self.pool.release(rings::PROCESS, env.ring_slot);
            self.stats.late_partials.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let deadline = self.deadline_from_now();
        let assembly = state
            .assemblies
            .entry(env.frame_id)
            .or_insert_with(|| FrameAssembly::new(deadline));
        assembly.expected = Some(env.expected);
        assembly.ring_slot = Some(env.ring_slot);
        assembly.captured_at = Some(env.captured_at);
        assembly.deadline = deadline;

        self.try_complete(&mut state, env.frame_id);
    }

    fn on_partial(&self, partial: PartialResult) {
        let mut state = self.state.lock();
        if state.drained.contains(&partial.frame_id) {
            debug!(
                frame = partial.frame_id,
                slot = %partial.slot,
                "late partial discarded"
            );
            self.stats.late_partials.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let deadline = self.deadline_from_now();
        let frame_id = partial.frame_id;
        let assembly = state
            .assemblies
            .entry(frame_id)
            .or_insert_with(|| FrameAssembly::new(deadline));

        if assembly.received.contains(partial.slot) {
            warn!(frame = frame_id, slot = %partial.slot, "duplicate partial dropped");
            return;
        }
        assembly.received.insert(partial.slot);
        let slot_index = partial.slot.index();
        assembly.partials[slot_index] = Some(partial);

        self.try_complete(&mut state, frame_id);
    }

    fn try_complete(&self, state: &mut RenderState, frame_id: u64) {
        let complete = state
            .assemblies
            .get(&frame_id)
            .is_some_and(FrameAssembly::is_complete);
        if complete {
            let assembly = state.assemblies.remove(&frame_id).expect("checked above");
            self.drain(state, frame_id, assembly, false);
        }
    }

    /// Drains every assembly whose deadline has passed.
    fn sweep(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<u64> = state
            .assemblies
            .iter()
            .filter(|(_, a)| a.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for frame_id in expired {
            let assembly = state.assemblies.remove(&frame_id).expect("just listed");
            self.drain(&mut state, frame_id, assembly, true);
        }
        self.flush_ordered(&mut state);
    }

    /// Shutdown path: drain everything regardless of deadline.
    fn drain_all(&self) {
        let mut state = self.state.lock();
        let ids: Vec<u64> = state.assemblies.keys().copied().collect();
        for frame_id in ids {
            let assembly = state.assemblies.remove(&frame_id).expect("just listed");
            self.drain(&mut state, frame_id, assembly, true);
        }
        // Whatever ordered output is still buffered goes out now.
        let leftover: Vec<(u64, Image)> = std::mem::take(&mut state.ordered_out).into_iter().collect();
        for (_, image) in leftover {
            self.sink.show(&image, INSPECTION_WINDOW);
        }
    }

    fn drain(
        &self,
        state: &mut RenderState,
        frame_id: u64,
        assembly: FrameAssembly,
        expired: bool,
    ) {
        state.mark_drained(frame_id);

        // A complete assembly drains the moment its last partial lands, so an
        // expired drain is a partial render by definition.
        if expired {
            self.stats.partial.fetch_add(1, Ordering::Relaxed);
            let expected = assembly.expected.unwrap_or(SlotSet::EMPTY);
            for slot in expected.iter() {
                if !assembly.received.contains(slot) {
                    self.stats.partial_missing[slot.index()].fetch_add(1, Ordering::Relaxed);
                }
            }
        } else {
            self.stats.completed.fetch_add(1, Ordering::Relaxed);
        }

        let params = self.params.load();
        if let Some(ring_slot) = assembly.ring_slot {
            let compose_start = Instant::now();
            match self.pool.read(rings::PROCESS, ring_slot, Some(1)) {
                Ok(frames) if !frames.is_empty() => {
                    self.pool.release(rings::PROCESS, ring_slot);
                    if state.last_show_ms > params.deadline_ms as f64 {
                        // A sink slower than the deadline sheds frames, not
                        // telemetry.
                        self.stats.sink_dropped.fetch_add(1, Ordering::Relaxed);
                        state.last_show_ms = 0.0;
                    } else {
                        let mut image = frames.into_iter().next().expect("checked non-empty");
                        compose(&mut image, &assembly, &params);

                        if params.ordered {
                            state.ordered_out.insert(frame_id, image);
                        } else {
                            let show_start = Instant::now();
                            self.sink.show(&image, INSPECTION_WINDOW);
                            state.last_show_ms = ms_since(show_start);
                        }
                        self.telemetry
                            .emit(series::PROCESS_RENDER, ms_since(compose_start));
                    }
                }
                Ok(_) | Err(_) => {
                    // Frame vanished from under the assembly.
                    self.pool.release(rings::PROCESS, ring_slot);
                    self.stats.poisoned.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if let Some(captured_at) = assembly.captured_at {
            self.telemetry
                .emit(series::TIME_CYCLE, ms_since(captured_at));
        }

        self.flush_ordered(state);
    }

    /// Emits buffered ordered output whose frame id is no longer preceded by
    /// any live assembly.
    fn flush_ordered(&self, state: &mut RenderState) {
        loop {
            let Some((&frame_id, _)) = state.ordered_out.iter().next() else {
                return;
            };
            let blocked = state
                .assemblies
                .keys()
                .any(|&pending| pending < frame_id);
            if blocked {
                return;
            }
            let image = state.ordered_out.remove(&frame_id).expect("just peeked");
            let show_start = Instant::now();
            self.sink.show(&image, INSPECTION_WINDOW);
            state.last_show_ms = ms_since(show_start);
        }
    }
}

fn compose(image: &mut Image, assembly: &FrameAssembly, params: &RendererParams) {
    for partial in assembly.partials.iter().flatten() {
        for line in &partial.cap_lines {
            draw_line(image, line.translated(partial.cap_origin), Color::YELLOW, 2);
        }
        // Topmost level line is the fill surface; color-code by band.
        if let Some(surface) = partial.level_lines.first() {
            let frame_line = surface.translated(partial.level_origin);
            let y = frame_line.top_y();
            let ok = (params.band_ymin as i32..=params.band_ymax as i32).contains(&y);
            let color = if ok { Color::GREEN } else { Color::RED };
            draw_line(image, frame_line, color, 2);
        }
    }
}
