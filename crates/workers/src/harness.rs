//! Worker harness: named tasks, lifecycle, and the control thread.
//!
//! Every worker is a set of long-running OS threads sharing one local stop
//! flag.  The harness spawns them with names, converts panics into logged
//! telemetry instead of aborts, and joins them with a bounded grace period
//! on stop.

use crate::fabric::TelemetrySink;
use arc_swap::ArcSwap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use transport::{ControlMailbox, StopSignal};
use world::{ParamMap, Priority};

/// Default join grace period on stop.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(1);

/// How often the control task drains its mailbox.
const CONTROL_TICK: Duration = Duration::from_millis(50);

/// Stop context handed to every task body.
#[derive(Clone)]
pub struct TaskCtx {
    stop: StopSignal,
    local: Arc<AtomicBool>,
}

impl TaskCtx {
    /// True when the worker or the whole pipeline is stopping.
    pub fn should_stop(&self) -> bool {
        self.local.load(Ordering::Acquire) || self.stop.is_stopped()
    }

    /// Sleeps up to `d`, returning early (true) when stopping.
    pub fn sleep_interruptible(&self, d: Duration) -> bool {
        let deadline = Instant::now() + d;
        loop {
            if self.should_stop() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }
}

/// Lock-free parameter snapshot owned by one worker.
///
/// The control task replaces the snapshot; hot loops `load` it per iteration
/// without taking a lock.
pub struct ParamCell<P> {
    inner: Arc<ArcSwap<P>>,
}

impl<P> Clone for ParamCell<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> ParamCell<P> {
    /// Creates a cell holding `initial`.
    pub fn new(initial: P) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<P> {
        self.inner.load_full()
    }
}

impl<P: Clone> ParamCell<P> {
    /// Applies `merge` to a copy of the snapshot and publishes the result.
    pub fn update(&self, merge: impl FnOnce(&mut P)) {
        let mut next = (*self.inner.load_full()).clone();
        merge(&mut next);
        self.inner.store(Arc::new(next));
    }
}

type TaskBody = Box<dyn FnOnce(TaskCtx) + Send + 'static>;

/// Builder collecting a worker's tasks before spawn.
pub struct Harness {
    name: String,
    stop: StopSignal,
    local: Arc<AtomicBool>,
    telemetry: Option<TelemetrySink>,
    priority: Priority,
    tasks: Vec<(String, TaskBody)>,
}

impl Harness {
    /// Creates a harness for worker `name`.
    pub fn new(name: &str, stop: StopSignal) -> Self {
        Self {
            name: name.to_owned(),
            stop,
            local: Arc::new(AtomicBool::new(false)),
            telemetry: None,
            priority: Priority::Normal,
            tasks: Vec::new(),
        }
    }

    /// Routes task-panic counters to the telemetry lane.
    pub fn telemetry(mut self, sink: TelemetrySink) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// OS priority applied (best effort) by every task thread at startup.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Registers a long-running task.
    pub fn task(mut self, task_name: &str, body: impl FnOnce(TaskCtx) + Send + 'static) -> Self {
        self.tasks.push((task_name.to_owned(), Box::new(body)));
        self
    }

    /// Registers the standard control task: drains `mailbox` on a short tick
    /// and lets `apply` merge recognized keys into the worker's parameters.
    pub fn control_task(
        self,
        mailbox: ControlMailbox,
        apply: impl Fn(&ParamMap) + Send + 'static,
    ) -> Self {
        self.task("control", move |ctx| {
            while !ctx.should_stop() {
                if let Some(map) = mailbox.take() {
                    apply(&map);
                }
                ctx.sleep_interruptible(CONTROL_TICK);
            }
        })
    }

    /// Starts every registered task on a named thread.
    pub fn spawn(self) -> WorkerHandle {
        let mut handles = Vec::with_capacity(self.tasks.len());
        for (task_name, body) in self.tasks {
            let ctx = TaskCtx {
                stop: self.stop.clone(),
                local: Arc::clone(&self.local),
            };
            let thread_name = format!("{}/{}", self.name, task_name);
            let worker = self.name.clone();
            let telemetry = self.telemetry.clone();
            let niceness = self.priority.niceness();

            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    apply_niceness(niceness, &thread_name);
                    let result = catch_unwind(AssertUnwindSafe(|| body(ctx)));
                    match result {
                        Ok(()) => debug!(worker = %worker, task = %task_name, "task exited"),
                        Err(payload) => {
                            let reason = panic_message(&payload);
                            error!(worker = %worker, task = %task_name, reason, "task panicked");
                            if let Some(sink) = telemetry {
                                sink.emit(world::series::errors("task_panic"), 1.0);
                            }
                        }
                    }
                })
                .expect("spawn worker thread");
            handles.push(handle);
        }

        WorkerHandle {
            name: self.name,
            local: self.local,
            handles,
        }
    }
}

/// Running worker: the set of joined-on-stop task threads.
pub struct WorkerHandle {
    name: String,
    local: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Worker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests stop without joining.
    pub fn request_stop(&self) {
        self.local.store(true, Ordering::Release);
    }

    /// Sets the local stop flag and joins every task within `grace`.
    ///
    /// Returns `true` when all tasks terminated in time; stragglers are
    /// detached and logged.
    pub fn stop(mut self, grace: Duration) -> bool {
        self.request_stop();
        let deadline = Instant::now() + grace;
        let mut clean = true;

        for handle in self.handles.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                // Panics were already consumed by catch_unwind.
                let _ = handle.join();
            } else {
                warn!(
                    worker = %self.name,
                    "task did not stop within grace, detaching"
                );
                clean = false;
            }
        }
        clean
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

#[cfg(unix)]
fn apply_niceness(niceness: i32, thread_name: &str) {
    if niceness == 0 {
        return;
    }
    // SAFETY: plain libc call; PRIO_PROCESS with pid 0 targets the calling
    // thread on Linux.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, niceness) };
    if rc != 0 {
        debug!(thread = %thread_name, niceness, "setpriority not applied");
    }
}

#[cfg(not(unix))]
fn apply_niceness(_niceness: i32, _thread_name: &str) {}
