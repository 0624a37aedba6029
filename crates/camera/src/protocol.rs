//! Framed TCP transport for remote camera streaming.
//!
//! Wire format: a fixed 5-byte header `[u8 msg_type][u32 big-endian length]`
//! followed by `length` payload bytes.
//!
//! * type 0 — encoded image bytes (see [`crate::FrameCodec`]).
//! * type 1 — parameters: latin-1 text, comma-separated, `\r\n`-terminated.
//!
//! Either side closing the socket returns the server to its listening state.

use crate::CameraError;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Message type for image payloads.
pub const IMAGE_TYPE: u8 = 0;
/// Message type for parameter strings.
pub const PARAMS_TYPE: u8 = 1;

const HEADER_LEN: usize = 5;
const READ_TICK: Duration = Duration::from_secs(1);

/// How many consecutive read ticks a half-received message may stall before
/// the link counts as dead.
const MAX_STALL_TICKS: u32 = 5;

/// A decoded stream message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMsg {
    /// Encoded image bytes.
    Image(Vec<u8>),
    /// Parameter fields, already split on commas.
    Params(Vec<String>),
}

fn write_message(stream: &mut TcpStream, msg_type: u8, data: &[u8]) -> Result<(), CameraError> {
    let mut header = [0u8; HEADER_LEN];
    header[0] = msg_type;
    header[1..].copy_from_slice(&(data.len() as u32).to_be_bytes());
    stream.write_all(&header)?;
    stream.write_all(data)?;
    Ok(())
}

/// Reads exactly `buf.len()` bytes, tolerating read-timeout ticks.
///
/// `started` distinguishes "no message yet" (return `false`, caller may poll
/// again) from "stalled mid-message" (error after [`MAX_STALL_TICKS`]).
fn read_exact_ticking(
    stream: &mut TcpStream,
    buf: &mut [u8],
    mut started: bool,
) -> Result<bool, CameraError> {
    let mut filled = 0usize;
    let mut stalls = 0u32;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(CameraError::Disconnected),
            Ok(n) => {
                filled += n;
                started = true;
                stalls = 0;
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if !started {
                    return Ok(false);
                }
                stalls += 1;
                if stalls >= MAX_STALL_TICKS {
                    return Err(CameraError::Disconnected);
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}

fn read_message(stream: &mut TcpStream) -> Result<Option<StreamMsg>, CameraError> {
    let mut header = [0u8; HEADER_LEN];
    if !read_exact_ticking(stream, &mut header, false)? {
        return Ok(None);
    }

    let msg_type = header[0];
    let len = u32::from_be_bytes(header[1..].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; len];
    if !read_exact_ticking(stream, &mut payload, true)? {
        return Err(CameraError::Disconnected);
    }

    match msg_type {
        IMAGE_TYPE => Ok(Some(StreamMsg::Image(payload))),
        PARAMS_TYPE => {
            // Latin-1: every byte maps to the same code point.
            let text: String = payload.iter().map(|&b| b as char).collect();
            let fields = text
                .trim_end_matches("\r\n")
                .split(',')
                .map(str::to_owned)
                .collect();
            Ok(Some(StreamMsg::Params(fields)))
        }
        _ => Err(CameraError::Protocol("unknown message type")),
    }
}

fn encode_params(fields: &[String]) -> Vec<u8> {
    let mut text = fields.join(",");
    text.push_str("\r\n");
    // Latin-1 encode; fields are ASCII in practice.
    text.chars().map(|c| c as u8).collect()
}

/// Listening side: owned by the capture worker in network mode.
pub struct StreamServer {
    listener: TcpListener,
    conn: Option<TcpStream>,
    peer: Option<SocketAddr>,
}

impl StreamServer {
    /// Binds and starts listening; the accept loop is non-blocking so the
    /// caller can interleave stop checks.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, CameraError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            conn: None,
            peer: None,
        })
    }

    /// Local address the server listens on.
    pub fn local_addr(&self) -> Result<SocketAddr, CameraError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts a pending connection, if any. Returns the peer address on a
    /// fresh accept.
    pub fn accept(&mut self) -> Result<Option<SocketAddr>, CameraError> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_read_timeout(Some(READ_TICK))?;
                stream.set_nodelay(true).ok();
                debug!(%peer, "stream client connected");
                self.conn = Some(stream);
                self.peer = Some(peer);
                Ok(Some(peer))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether a client is currently attached.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Sends a parameter frame to the attached client.
    pub fn send_params(&mut self, fields: &[String]) -> Result<(), CameraError> {
        let conn = self.conn.as_mut().ok_or(CameraError::Disconnected)?;
        write_message(conn, PARAMS_TYPE, &encode_params(fields))
    }

    /// Receives the next message; `Ok(None)` when nothing arrived this tick.
    pub fn receive(&mut self) -> Result<Option<StreamMsg>, CameraError> {
        let conn = self.conn.as_mut().ok_or(CameraError::Disconnected)?;
        match read_message(conn) {
            Ok(msg) => Ok(msg),
            Err(err) => {
                if err.is_disconnect() {
                    self.drop_connection();
                }
                Err(err)
            }
        }
    }

    /// Drops the current client and returns to listening.
    pub fn drop_connection(&mut self) {
        if let Some(peer) = self.peer.take() {
            debug!(%peer, "stream client detached");
        }
        self.conn = None;
    }
}

/// Connecting side: the remote camera (and the loopback used by tests).
pub struct StreamClient {
    stream: TcpStream,
}

impl StreamClient {
    /// Connects to a stream server.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, CameraError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(READ_TICK))?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }

    /// Sends encoded image bytes.
    pub fn send_image(&mut self, encoded: &[u8]) -> Result<(), CameraError> {
        write_message(&mut self.stream, IMAGE_TYPE, encoded)
    }

    /// Sends a parameter frame.
    pub fn send_params(&mut self, fields: &[String]) -> Result<(), CameraError> {
        write_message(&mut self.stream, PARAMS_TYPE, &encode_params(fields))
    }

    /// Receives the next message; `Ok(None)` when nothing arrived this tick.
    pub fn receive(&mut self) -> Result<Option<StreamMsg>, CameraError> {
        read_message(&mut self.stream)
    }
}
