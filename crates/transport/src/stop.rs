//! Broadcast stop signal observed by every blocking wait in the pipeline.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Uninhabited payload type; the stop channel only ever signals by closing.
#[derive(Debug)]
pub enum Never {}

/// Process-wide stop signal.
///
/// Built on a zero-capacity channel whose sender is held until
/// [`StopSignal::trigger`]: dropping the sender makes every subscribed
/// receiver ready at once, waking all `select`-based waits.  `trigger` is
/// idempotent and safe to call from any thread.
#[derive(Clone)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
    holder: Arc<Mutex<Option<Sender<Never>>>>,
    rx: Receiver<Never>,
}

impl StopSignal {
    /// Creates an un-triggered signal.
    pub fn new() -> Self {
        let (tx, rx) = bounded::<Never>(0);
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            holder: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    /// Fires the signal, waking every subscriber. Subsequent calls are no-ops.
    pub fn trigger(&self) {
        self.stopped.store(true, Ordering::Release);
        // Dropping the held sender closes the channel for all receivers.
        self.holder.lock().take();
    }

    /// Whether the signal has fired.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// A receiver that becomes ready (disconnected) once the signal fires.
    pub fn subscribe(&self) -> Receiver<Never> {
        self.rx.clone()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
