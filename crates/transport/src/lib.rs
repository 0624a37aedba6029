//! Transport primitives connecting the pipeline workers.
//!
//! * [`RingPool`] – named shared image rings with a per-slot
//!   Free/Writing/Ready/Reading state machine, carrying pixel payloads so
//!   queues only move small handles.
//! * [`Lane`] – bounded channels with explicit full-queue policies and
//!   shutdown-aware polling.
//! * [`ControlMailbox`] – capacity-1 overwrite mailbox for parameter updates.
//! * [`StopSignal`] – broadcast stop bit observed by every `poll`.

mod control;
mod error;
mod image_ring;
mod lane;
mod stop;

pub use control::ControlMailbox;
pub use error::{TransportError, TransportResult};
pub use image_ring::{RingPool, RingSpec, SlotState};
pub use lane::{FullPolicy, Lane, Offer, PollError};
pub use stop::{Never, StopSignal};
