//! Connection identity and lifecycle
//!
//! A [`Connection`] owns one TCP stream for its whole life. It is shared as
//! `Arc<Connection>` between the owner (client or server registry), the
//! watcher thread, and any caller that is mid-send or mid-read. Closing only
//! shuts the stream down; the descriptor itself is released when the last
//! `Arc` goes away, so no in-flight operation can ever touch a recycled
//! descriptor.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use super::liveness::Pollable;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Read buffer size used when nothing is buffered yet
const READ_CHUNK: usize = 64 * 1024;

/// Unique identifier for a connection
///
/// Ids are minted from a process-wide counter and are never reused, so an id
/// retired by a disconnect can never name a different connection later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Mint a fresh id
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create from raw u64
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle state
///
/// Transitions only move forward: Connecting -> Connected -> Disconnected, or
/// directly Connecting -> Disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket available, not yet registered or watched
    Connecting = 0,
    /// Registered and watched
    Connected = 1,
    /// Closed; terminal
    Disconnected = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Connection information snapshot
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection id
    pub id: ConnectionId,
    /// Remote address, if the socket could report it
    pub peer_addr: Option<SocketAddr>,
    /// Lifecycle state at snapshot time
    pub state: ConnectionState,
    /// Time since the socket became available
    pub uptime: Duration,
}

/// One live byte-stream endpoint
#[derive(Debug)]
pub(crate) struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    state: AtomicU8,
    connected_at: Instant,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        Self {
            id,
            stream,
            peer_addr,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            connected_at: Instant::now(),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            peer_addr: self.peer_addr,
            state: self.state(),
            uptime: self.connected_at.elapsed(),
        }
    }

    /// Connecting -> Connected. Fails if the connection was closed meanwhile.
    pub(crate) fn mark_connected(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Connected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to Disconnected and shut the stream down in both directions
    ///
    /// Unread data is discarded and any owner blocked in `read` wakes up with
    /// end-of-stream. Returns false if the connection was already closed.
    pub(crate) fn close(&self) -> bool {
        let previous = self
            .state
            .swap(ConnectionState::Disconnected as u8, Ordering::AcqRel);
        if previous == ConnectionState::Disconnected as u8 {
            return false;
        }

        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            // Already reset by the peer; nothing left to tear down.
            trace!(conn_id = %self.id, error = %e, "Shutdown failed");
        }
        debug!(conn_id = %self.id, "Connection closed");
        true
    }

    /// Single write; returns how many bytes the transport accepted
    ///
    /// Write failures mean the connection is going away, which the watcher
    /// reports separately, so they collapse to 0 here.
    pub(crate) fn send(&self, buf: &[u8]) -> usize {
        if self.state() == ConnectionState::Disconnected {
            return 0;
        }

        loop {
            match (&self.stream).write(buf) {
                Ok(n) => {
                    debug!(conn_id = %self.id, bytes = n, requested = buf.len(), "Sent");
                    return n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(conn_id = %self.id, error = %e, "Send failed");
                    return 0;
                }
            }
        }
    }

    /// Single blocking read of at most `length` bytes
    pub(crate) fn read(&self, length: usize) -> Bytes {
        if length == 0 || self.state() == ConnectionState::Disconnected {
            return Bytes::new();
        }

        // `length` is only an upper bound; size the buffer by what is queued.
        let queued = self.stream.buffered_bytes().unwrap_or(0);
        let mut buf = BytesMut::zeroed(length.min(queued.max(READ_CHUNK)));
        loop {
            match (&self.stream).read(&mut buf[..]) {
                Ok(n) => {
                    debug!(conn_id = %self.id, bytes = n, requested = length, "Read");
                    buf.truncate(n);
                    return buf.freeze();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(conn_id = %self.id, error = %e, "Read failed");
                    return Bytes::new();
                }
            }
        }
    }
}

impl Pollable for Connection {
    fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        if self.state() == ConnectionState::Disconnected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.stream.poll_readable(timeout)
    }

    fn buffered_bytes(&self) -> io::Result<usize> {
        if self.state() == ConnectionState::Disconnected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.stream.buffered_bytes()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        trace!(conn_id = %self.id, "Socket released");
    }
}
