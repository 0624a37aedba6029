use thiserror::Error;

use crate::image_ring::SlotState;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures raised by the image ring and fabric construction.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no ring named '{0}'")]
    UnknownRing(String),

    #[error("ring '{ring}': slot {slot} out of range (capacity {capacity})")]
    SlotOutOfRange {
        ring: String,
        slot: usize,
        capacity: usize,
    },

    #[error("ring '{ring}': slot {slot} is {state:?}, expected {expected}")]
    SlotBusy {
        ring: String,
        slot: usize,
        state: SlotState,
        expected: &'static str,
    },

    #[error("ring '{ring}': {count} images exceed the declared maximum of {max}")]
    TooManyImages {
        ring: String,
        count: usize,
        max: usize,
    },

    #[error("ring '{ring}': image shape {got:?} exceeds declared maximum {max:?}")]
    ShapeExceeded {
        ring: String,
        got: (u32, u32, u32),
        max: (u32, u32, u32),
    },

    #[error("ring '{ring}': element type {got:?} does not match declared {expected:?}")]
    ElemMismatch {
        ring: String,
        got: world::ElemType,
        expected: world::ElemType,
    },

    #[error("invalid ring spec for '{ring}': {reason}")]
    InvalidSpec { ring: String, reason: &'static str },

    #[error("ring '{ring}': slot {slot} header is corrupt")]
    CorruptSlot { ring: String, slot: usize },
}
