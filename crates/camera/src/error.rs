use thiserror::Error;

/// Failures raised by frame sources and the stream protocol.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer disconnected")]
    Disconnected,

    #[error("malformed stream message: {0}")]
    Protocol(&'static str),

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("unreadable frame file: {0}")]
    File(#[from] vision::PpmError),
}

impl CameraError {
    /// Whether the capture worker should treat this as a connection loss and
    /// re-enter its reconnect loop rather than log-and-continue.
    pub fn is_disconnect(&self) -> bool {
        match self {
            CameraError::Disconnected => true,
            CameraError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
