//! Frame acquisition: local sources and the network stream protocol.
//!
//! The capture worker only sees the [`FrameSource`] trait; behind it sit a
//! procedural scene generator (the device stand-in), a PPM file replayer, and
//! a TCP stream server speaking the 5-byte-header framing protocol.

mod codec;
mod error;
mod protocol;
mod scene;
mod source;

pub use codec::{FrameCodec, RawCodec};
pub use error::CameraError;
pub use protocol::{StreamClient, StreamMsg, StreamServer, IMAGE_TYPE, PARAMS_TYPE};
pub use scene::{render_scene, SceneParams};
pub use source::{FileSource, FrameSource, NetworkSource, StreamAnnounce, SyntheticSource};
