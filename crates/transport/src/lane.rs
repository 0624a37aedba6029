//! Bounded lanes with explicit full-queue policies.
//!
//! Every pipeline edge is a `Lane`: a bounded channel plus the documented
//! behavior when the queue is full.  Frame-cadence edges evict the oldest
//! queued item so fresh frames win; the renderer edge briefly blocks before
//! dropping the new item.  All polling is cancellable by the broadcast
//! [`StopSignal`].

use crate::stop::StopSignal;
use crossbeam_channel::{bounded, select, Receiver, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shutdown must be observed within this bound, so no poll sleeps longer.
const MAX_POLL: Duration = Duration::from_secs(1);

/// Behavior when `offer` meets a full queue.
#[derive(Clone, Copy, Debug)]
pub enum FullPolicy {
    /// Evict the oldest queued item and enqueue the new one.
    DropOldest,
    /// Block up to the given duration, then drop the new item.
    BlockThenDrop(Duration),
}

/// Outcome of an `offer`.
///
/// Dropped items are handed back to the producer: queue payloads may carry
/// ring-slot references whose release is the producer's responsibility.
#[derive(Debug)]
pub enum Offer<T> {
    /// Enqueued without touching existing items.
    Accepted,
    /// Enqueued after evicting older items, returned here oldest-first.
    DroppedOldest(Vec<T>),
    /// The new item did not fit and is returned.
    DroppedNew(T),
}

impl<T> Offer<T> {
    /// Whether the offered item itself entered the queue.
    pub fn accepted(&self) -> bool {
        !matches!(self, Offer::DroppedNew(_))
    }
}

/// Why a `poll` returned without an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum PollError {
    /// No item arrived within the timeout.
    #[error("poll timed out")]
    Timeout,
    /// The global stop signal fired.
    #[error("shutting down")]
    ShuttingDown,
    /// Every producer handle is gone.
    #[error("lane closed")]
    Closed,
}

/// A bounded, policy-carrying pipeline edge.
///
/// Cloning yields another handle onto the same channel; lanes are
/// multi-producer and (by pipeline convention) single-consumer.
pub struct Lane<T> {
    name: Arc<str>,
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    policy: FullPolicy,
    dropped: Arc<AtomicU64>,
    stop: StopSignal,
}

impl<T> Clone for Lane<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
            policy: self.policy,
            dropped: Arc::clone(&self.dropped),
            stop: self.stop.clone(),
        }
    }
}

impl<T> Lane<T> {
    /// Creates a lane; `capacity` must be at least 1.
    pub fn new(name: &str, capacity: usize, policy: FullPolicy, stop: StopSignal) -> Self {
        assert!(capacity >= 1, "lane '{name}' needs capacity >= 1");
        let (tx, rx) = bounded(capacity);
        Self {
            name: Arc::from(name),
            tx,
            rx,
            capacity,
            policy,
            dropped: Arc::new(AtomicU64::new(0)),
            stop,
        }
    }

    /// Lane name, used in telemetry series.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Total items dropped by the full-queue policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Enqueues `item` according to the lane's policy. Never blocks longer
    /// than a `BlockThenDrop` budget.
    pub fn offer(&self, item: T) -> Offer<T> {
        match self.policy {
            FullPolicy::DropOldest => self.offer_drop_oldest(item),
            FullPolicy::BlockThenDrop(budget) => match self.tx.send_timeout(item, budget) {
                Ok(()) => Offer::Accepted,
                Err(SendTimeoutError::Timeout(item))
                | Err(SendTimeoutError::Disconnected(item)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    Offer::DroppedNew(item)
                }
            },
        }
    }

    fn offer_drop_oldest(&self, mut item: T) -> Offer<T> {
        let mut evicted = Vec::new();
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    return if evicted.is_empty() {
                        Offer::Accepted
                    } else {
                        Offer::DroppedOldest(evicted)
                    }
                }
                Err(TrySendError::Full(back)) => {
                    item = back;
                    if let Ok(old) = self.rx.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        evicted.push(old);
                    }
                }
                Err(TrySendError::Disconnected(back)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return Offer::DroppedNew(back);
                }
            }
        }
    }

    /// Waits up to `timeout` (clamped to 1 s) for the next item.
    ///
    /// Returns [`PollError::ShuttingDown`] promptly once the stop signal
    /// fires, regardless of the requested timeout.
    pub fn poll(&self, timeout: Duration) -> Result<T, PollError> {
        if self.stop.is_stopped() {
            return Err(PollError::ShuttingDown);
        }
        let timeout = timeout.min(MAX_POLL);
        let stop_rx = self.stop.subscribe();
        select! {
            recv(self.rx) -> msg => msg.map_err(|_| PollError::Closed),
            recv(stop_rx) -> _ => Err(PollError::ShuttingDown),
            default(timeout) => Err(PollError::Timeout),
        }
    }

    /// Takes whatever is queued right now without blocking.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn lane(capacity: usize, policy: FullPolicy) -> (Lane<u32>, StopSignal) {
        let stop = StopSignal::new();
        (Lane::new("test", capacity, policy, stop.clone()), stop)
    }

    #[test]
    fn fifo_within_capacity() {
        let (lane, _stop) = lane(4, FullPolicy::DropOldest);
        for i in 0..4 {
            assert!(matches!(lane.offer(i), Offer::Accepted));
        }
        for i in 0..4 {
            assert_eq!(lane.poll(Duration::from_millis(10)), Ok(i));
        }
        assert_eq!(
            lane.poll(Duration::from_millis(10)),
            Err(PollError::Timeout)
        );
    }

    #[test]
    fn drop_oldest_keeps_cadence_and_returns_evicted() {
        let (lane, _stop) = lane(3, FullPolicy::DropOldest);
        for i in 0..3 {
            lane.offer(i);
        }
        match lane.offer(3) {
            Offer::DroppedOldest(evicted) => assert_eq!(evicted, vec![0]),
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(lane.dropped(), 1);
        assert_eq!(lane.len(), 3);

        let drained = lane.drain();
        assert_eq!(drained, vec![1, 2, 3]);
    }

    #[test]
    fn block_then_drop_gives_up() {
        let (lane, _stop) = lane(1, FullPolicy::BlockThenDrop(Duration::from_millis(20)));
        assert!(matches!(lane.offer(1), Offer::Accepted));

        let started = Instant::now();
        match lane.offer(2) {
            Offer::DroppedNew(item) => assert_eq!(item, 2),
            other => panic!("expected the new item back, got {other:?}"),
        }
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(15), "should have blocked");
        assert_eq!(lane.dropped(), 1);

        // The original item survived.
        assert_eq!(lane.poll(Duration::from_millis(10)), Ok(1));
    }

    #[test]
    fn block_then_drop_succeeds_when_consumer_drains() {
        let (lane, _stop) = lane(1, FullPolicy::BlockThenDrop(Duration::from_millis(200)));
        lane.offer(1);

        let consumer = {
            let lane = lane.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                lane.poll(Duration::from_millis(100)).unwrap()
            })
        };

        assert!(lane.offer(2).accepted());
        assert_eq!(consumer.join().unwrap(), 1);
    }

    #[test]
    fn poll_wakes_on_stop() {
        let (lane, stop) = lane(1, FullPolicy::DropOldest);

        let poller = {
            let lane = lane.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let err = lane.poll(Duration::from_secs(1)).unwrap_err();
                (err, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        stop.trigger();

        let (err, waited) = poller.join().unwrap();
        assert_eq!(err, PollError::ShuttingDown);
        assert!(
            waited < Duration::from_millis(200),
            "stop must wake pollers promptly, waited {waited:?}"
        );
    }

    #[test]
    fn poll_after_stop_returns_immediately() {
        let (lane, stop) = lane(1, FullPolicy::DropOldest);
        lane.offer(7);
        stop.trigger();
        assert_eq!(
            lane.poll(Duration::from_secs(1)),
            Err(PollError::ShuttingDown)
        );
    }

    #[test]
    fn len_never_exceeds_capacity_under_stress() {
        let (lane, _stop) = lane(8, FullPolicy::DropOldest);
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let lane = lane.clone();
                thread::spawn(move || {
                    for i in 0..500u32 {
                        lane.offer(p * 1000 + i);
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            assert!(lane.len() <= lane.capacity());
            let _ = lane.poll(Duration::from_micros(100));
        }
        for handle in producers {
            handle.join().unwrap();
        }
        assert!(lane.len() <= lane.capacity());
    }
}
