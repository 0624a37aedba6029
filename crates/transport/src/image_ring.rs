//! Named shared image rings with a per-slot state machine.
//!
//! Layout per slot:
//!
//! ```text
//! +-------------+--------------------------------------------------------+
//! | u32 count   | per image: u32 h, u32 w, u32 c, u8 elem_code,          |
//! |             | pixel bytes, zero padding up to the declared max shape |
//! +-------------+--------------------------------------------------------+
//! ```
//!
//! Padding keeps successive image offsets deterministic regardless of the
//! actual shapes, so a reader can seek to image `i` without parsing `0..i`.
//! Frames are hundreds of KB at camera resolution; the ring lets the
//! detector, slot analyzers, and renderer share pixels by passing slot
//! indices through the lanes instead of copying buffers through them.
//!
//! Slot lifecycle: `Free → Writing → Ready → Reading(n) → Free`.  Exactly one
//! writer owns a slot between `Free` and `Ready`; any number of readers may
//! overlap afterwards, tracked by the reader count.  The state vector is
//! guarded by a mutex + condvar; pixel buffers are only touched while the
//! state machine grants access, which is what makes the interior mutability
//! below sound.

use crate::{TransportError, TransportResult};
use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;
use world::{ElemType, Image};

const COUNT_HEADER: usize = 4;
const IMAGE_HEADER: usize = 13;

/// Declared shape of one named ring.
#[derive(Clone, Copy, Debug)]
pub struct RingSpec {
    /// Number of slots.
    pub capacity: usize,
    /// Maximum images a single slot may hold.
    pub max_images: usize,
    /// Maximum image shape `(h, w, c)`.
    pub max_shape: (u32, u32, u32),
    /// Element type every image must match.
    pub elem: ElemType,
}

impl RingSpec {
    /// Byte size reserved per image (pixels at the maximum shape).
    pub fn image_bytes(&self) -> usize {
        let (h, w, c) = self.max_shape;
        h as usize * w as usize * c as usize * self.elem.size()
    }

    /// Total byte size of one slot buffer.
    pub fn slot_bytes(&self) -> usize {
        COUNT_HEADER + self.max_images * (IMAGE_HEADER + self.image_bytes())
    }

    fn validate(&self, ring: &str) -> TransportResult<()> {
        let (h, w, c) = self.max_shape;
        if self.capacity == 0 {
            return Err(TransportError::InvalidSpec {
                ring: ring.to_owned(),
                reason: "capacity must be at least 1",
            });
        }
        if self.max_images == 0 {
            return Err(TransportError::InvalidSpec {
                ring: ring.to_owned(),
                reason: "max_images must be at least 1",
            });
        }
        if h == 0 || w == 0 || c == 0 {
            return Err(TransportError::InvalidSpec {
                ring: ring.to_owned(),
                reason: "max_shape dimensions must be non-zero",
            });
        }
        Ok(())
    }
}

/// State of one ring slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Nobody owns the slot; a writer may claim it.
    Free,
    /// A writer is serializing images into the buffer.
    Writing,
    /// Images are published; no reader is attached yet.
    Ready,
    /// `n` readers currently hold the slot.
    Reading(u32),
}

struct SlotBuf(UnsafeCell<Vec<u8>>);

// SAFETY: the state machine in `Ring::states` grants buffer access — mutably
// only to the single thread that moved the slot to `Writing`, shared only
// while the slot is `Ready`/`Reading`. No access happens outside a grant.
unsafe impl Send for SlotBuf {}
// SAFETY: as above; shared reads never overlap the exclusive `Writing` phase.
unsafe impl Sync for SlotBuf {}

struct Ring {
    spec: RingSpec,
    states: Mutex<Vec<SlotState>>,
    freed: Condvar,
    bufs: Vec<SlotBuf>,
}

impl Ring {
    fn new(name: &str, spec: RingSpec) -> TransportResult<Self> {
        spec.validate(name)?;
        let bufs = (0..spec.capacity)
            .map(|_| SlotBuf(UnsafeCell::new(vec![0u8; spec.slot_bytes()])))
            .collect();
        Ok(Self {
            spec,
            states: Mutex::new(vec![SlotState::Free; spec.capacity]),
            freed: Condvar::new(),
            bufs,
        })
    }
}

/// The set of named rings shared by all workers.
///
/// Built once by the orchestrator from the declared schema and handed out
/// behind an `Arc`; every operation addresses `(ring name, slot index)`.
pub struct RingPool {
    rings: HashMap<String, Ring>,
}

impl RingPool {
    /// Builds every ring in the schema; any invalid spec fails the build.
    pub fn build<I, S>(schema: I) -> TransportResult<Self>
    where
        I: IntoIterator<Item = (S, RingSpec)>,
        S: Into<String>,
    {
        let mut rings = HashMap::new();
        for (name, spec) in schema {
            let name = name.into();
            let ring = Ring::new(&name, spec)?;
            rings.insert(name, ring);
        }
        Ok(Self { rings })
    }

    fn ring(&self, name: &str) -> TransportResult<&Ring> {
        self.rings
            .get(name)
            .ok_or_else(|| TransportError::UnknownRing(name.to_owned()))
    }

    /// Declared spec of a ring.
    pub fn spec(&self, name: &str) -> TransportResult<RingSpec> {
        Ok(self.ring(name)?.spec)
    }

    /// Current state of a slot (diagnostics and tests).
    pub fn state(&self, name: &str, slot: usize) -> TransportResult<SlotState> {
        let ring = self.ring(name)?;
        let states = ring.states.lock();
        states
            .get(slot)
            .copied()
            .ok_or_else(|| TransportError::SlotOutOfRange {
                ring: name.to_owned(),
                slot,
                capacity: ring.spec.capacity,
            })
    }

    /// Index of the first `Free` slot, or `None` when all are busy.
    pub fn acquire_free(&self, name: &str) -> TransportResult<Option<usize>> {
        let ring = self.ring(name)?;
        let states = ring.states.lock();
        Ok(states.iter().position(|s| *s == SlotState::Free))
    }

    /// Like [`RingPool::acquire_free`], but waits up to `timeout` for a slot
    /// to be released.
    pub fn acquire_free_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> TransportResult<Option<usize>> {
        let ring = self.ring(name)?;
        let deadline = Instant::now() + timeout;
        let mut states = ring.states.lock();
        loop {
            if let Some(idx) = states.iter().position(|s| *s == SlotState::Free) {
                return Ok(Some(idx));
            }
            if ring.freed.wait_until(&mut states, deadline).timed_out() {
                return Ok(None);
            }
        }
    }

    /// Serializes `images` into slot `slot`, moving it `Free → Ready`.
    ///
    /// Validation failures leave the slot `Free` with its count header
    /// zeroed, so a later reader can never observe a half-written batch.
    pub fn write(&self, name: &str, slot: usize, images: &[Image]) -> TransportResult<()> {
        let ring = self.ring(name)?;
        let spec = ring.spec;

        {
            let mut states = ring.states.lock();
            let state = *states
                .get(slot)
                .ok_or_else(|| TransportError::SlotOutOfRange {
                    ring: name.to_owned(),
                    slot,
                    capacity: spec.capacity,
                })?;
            if state != SlotState::Free {
                return Err(TransportError::SlotBusy {
                    ring: name.to_owned(),
                    slot,
                    state,
                    expected: "Free",
                });
            }
            states[slot] = SlotState::Writing;
        }

        // SAFETY: the slot is `Writing`, owned exclusively by this thread.
        let buf = unsafe { &mut *ring.bufs[slot].0.get() };

        match serialize_images(buf, images, &spec, name) {
            Ok(()) => {
                let mut states = ring.states.lock();
                states[slot] = SlotState::Ready;
                Ok(())
            }
            Err(err) => {
                buf[..COUNT_HEADER].fill(0);
                let mut states = ring.states.lock();
                states[slot] = SlotState::Free;
                ring.freed.notify_all();
                Err(err)
            }
        }
    }

    /// Copies out up to `n` images (all when `None`), attaching this caller
    /// as a reader. Every successful `read` must be paired with a
    /// [`RingPool::release`].
    pub fn read(&self, name: &str, slot: usize, n: Option<usize>) -> TransportResult<Vec<Image>> {
        let ring = self.ring(name)?;
        let spec = ring.spec;

        {
            let mut states = ring.states.lock();
            let state = *states
                .get(slot)
                .ok_or_else(|| TransportError::SlotOutOfRange {
                    ring: name.to_owned(),
                    slot,
                    capacity: spec.capacity,
                })?;
            match state {
                SlotState::Ready => states[slot] = SlotState::Reading(1),
                SlotState::Reading(readers) => states[slot] = SlotState::Reading(readers + 1),
                other => {
                    return Err(TransportError::SlotBusy {
                        ring: name.to_owned(),
                        slot,
                        state: other,
                        expected: "Ready or Reading",
                    })
                }
            }
        }

        // SAFETY: the slot is `Reading`; writers are excluded until the last
        // reader releases, so shared access to the bytes is sound.
        let buf = unsafe { &*ring.bufs[slot].0.get() };

        let result = deserialize_images(buf, &spec, n, name, slot);
        if result.is_err() {
            // The failed reader still holds a count; detach it.
            self.release(name, slot);
        }
        result
    }

    /// Detaches one reader from a slot; the last release frees it.
    ///
    /// Releasing a `Ready` slot frees it directly (a consumer may discard a
    /// published batch without reading it). Double release is a logged no-op.
    pub fn release(&self, name: &str, slot: usize) {
        let Ok(ring) = self.ring(name) else {
            warn!(ring = name, slot, "release on unknown ring ignored");
            return;
        };
        let mut states = ring.states.lock();
        let Some(state) = states.get(slot).copied() else {
            warn!(ring = name, slot, "release on out-of-range slot ignored");
            return;
        };
        match state {
            SlotState::Reading(1) | SlotState::Ready => {
                states[slot] = SlotState::Free;
                ring.freed.notify_all();
            }
            SlotState::Reading(readers) => {
                states[slot] = SlotState::Reading(readers - 1);
            }
            SlotState::Free => {
                warn!(ring = name, slot, "double release ignored");
            }
            SlotState::Writing => {
                warn!(ring = name, slot, "release during write ignored");
            }
        }
    }

    /// Forces every slot of every ring back to `Free` (shutdown cleanup).
    pub fn force_release_all(&self) {
        for (name, ring) in &self.rings {
            let mut states = ring.states.lock();
            for (idx, state) in states.iter_mut().enumerate() {
                if *state != SlotState::Free {
                    warn!(ring = name.as_str(), slot = idx, state = ?*state, "force-released");
                    *state = SlotState::Free;
                }
            }
            ring.freed.notify_all();
        }
    }
}

fn serialize_images(
    buf: &mut [u8],
    images: &[Image],
    spec: &RingSpec,
    ring: &str,
) -> TransportResult<()> {
    if images.len() > spec.max_images {
        return Err(TransportError::TooManyImages {
            ring: ring.to_owned(),
            count: images.len(),
            max: spec.max_images,
        });
    }

    let (max_h, max_w, max_c) = spec.max_shape;
    for img in images {
        let c = img.channels as u32;
        if img.height > max_h || img.width > max_w || c > max_c {
            return Err(TransportError::ShapeExceeded {
                ring: ring.to_owned(),
                got: (img.height, img.width, c),
                max: spec.max_shape,
            });
        }
        if img.elem != spec.elem {
            return Err(TransportError::ElemMismatch {
                ring: ring.to_owned(),
                got: img.elem,
                expected: spec.elem,
            });
        }
    }

    buf[..COUNT_HEADER].copy_from_slice(&(images.len() as u32).to_le_bytes());
    let stride = IMAGE_HEADER + spec.image_bytes();
    for (i, img) in images.iter().enumerate() {
        let base = COUNT_HEADER + i * stride;
        buf[base..base + 4].copy_from_slice(&img.height.to_le_bytes());
        buf[base + 4..base + 8].copy_from_slice(&img.width.to_le_bytes());
        buf[base + 8..base + 12].copy_from_slice(&(img.channels as u32).to_le_bytes());
        buf[base + 12] = img.elem.code();

        let data = &img.pixels;
        let pixels_at = base + IMAGE_HEADER;
        buf[pixels_at..pixels_at + data.len()].copy_from_slice(data);
        // Zero the tail so stale bytes from a previous batch never leak.
        buf[pixels_at + data.len()..base + stride].fill(0);
    }
    Ok(())
}

fn deserialize_images(
    buf: &[u8],
    spec: &RingSpec,
    n: Option<usize>,
    ring: &str,
    slot: usize,
) -> TransportResult<Vec<Image>> {
    let count = u32::from_le_bytes(buf[..COUNT_HEADER].try_into().unwrap()) as usize;
    if count > spec.max_images {
        return Err(TransportError::CorruptSlot {
            ring: ring.to_owned(),
            slot,
        });
    }
    let take = n.map_or(count, |n| n.min(count));

    let (max_h, max_w, max_c) = spec.max_shape;
    let stride = IMAGE_HEADER + spec.image_bytes();
    let mut images = Vec::with_capacity(take);
    for i in 0..take {
        let base = COUNT_HEADER + i * stride;
        let h = u32::from_le_bytes(buf[base..base + 4].try_into().unwrap());
        let w = u32::from_le_bytes(buf[base + 4..base + 8].try_into().unwrap());
        let c = u32::from_le_bytes(buf[base + 8..base + 12].try_into().unwrap());
        let elem = ElemType::from_code(buf[base + 12]);

        let corrupt = h > max_h || w > max_w || c > max_c || c == 0;
        let Some(elem) = elem.filter(|_| !corrupt) else {
            return Err(TransportError::CorruptSlot {
                ring: ring.to_owned(),
                slot,
            });
        };

        let len = h as usize * w as usize * c as usize * elem.size();
        let pixels_at = base + IMAGE_HEADER;
        images.push(Image {
            width: w,
            height: h,
            channels: c as u8,
            elem,
            pixels: buf[pixels_at..pixels_at + len].to_vec(),
        });
    }
    Ok(images)
}
