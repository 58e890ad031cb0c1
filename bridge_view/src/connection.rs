//! Client side of the wire: a non-blocking socket polled from the viewer's
//! timer, plus an in-memory transport for headless use and tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use neurobridge::schema::Message;
use neurobridge::wire::{encode_message, FrameBuffer, WireError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("backend closed the connection")]
    Disconnected,
    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),
}

/// What the session context needs from a connection.
pub trait Transport {
    fn send(&mut self, msg: &Message) -> Result<(), ClientError>;

    /// Drain whatever has arrived; never blocks.
    fn poll(&mut self) -> Result<Vec<Message>, ClientError>;
}

pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    frames: FrameBuffer,
    send_timeout: Duration,
    /// The backend hung up; frames read before that are still handed out.
    closed: bool,
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs, max_frame_bytes: usize) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        info!(%peer, "connected to backend");
        Ok(Self {
            stream,
            peer,
            frames: FrameBuffer::new(max_frame_bytes),
            send_timeout: Duration::from_secs(5),
            closed: false,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, msg: &Message) -> Result<(), ClientError> {
        let bytes = encode_message(msg)?;
        let started = Instant::now();
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(ClientError::Disconnected),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if started.elapsed() > self.send_timeout {
                        return Err(ClientError::SendTimeout(self.send_timeout));
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(schema = msg.schema(), bytes = bytes.len(), "sent");
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Message>, ClientError> {
        let mut buf = [0u8; 64 * 1024];
        while !self.closed {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    debug!(peer = %self.peer, "backend closed the connection");
                    self.closed = true;
                }
                Ok(n) => self.frames.extend(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut out = Vec::new();
        loop {
            let payload = match self.frames.next_frame() {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) => return Err(e.into()),
            };
            match Message::from_payload(&payload) {
                Ok(msg) => out.push(msg),
                Err(e) => warn!(peer = %self.peer, "dropped message from backend: {e}"),
            }
        }
        if out.is_empty() && self.closed {
            return Err(ClientError::Disconnected);
        }
        Ok(out)
    }
}

/// Loops messages through queues instead of a socket.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    pub sent: Vec<Message>,
    pub inbox: VecDeque<Message>,
    pub closed: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&mut self, msg: Message) {
        self.inbox.push_back(msg);
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, msg: &Message) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::Disconnected);
        }
        self.sent.push(msg.clone());
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Message>, ClientError> {
        if self.closed && self.inbox.is_empty() {
            return Err(ClientError::Disconnected);
        }
        Ok(self.inbox.drain(..).collect())
    }
}
