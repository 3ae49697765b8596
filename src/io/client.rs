//! TCP session client
//!
//! Owns exactly one outbound connection. Sending and reading block the calling
//! thread; liveness and inbound data are reported by a background watcher
//! through a [`ClientHandler`].

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, trace};

use crate::error::{Result, SessionError};

use super::config::SessionConfig;
use super::connection::{Connection, ConnectionId, ConnectionInfo, ConnectionState};
use super::handler::ClientHandler;
use super::liveness::is_alive;
use super::watcher::{spawn_watcher, Watch, WatchEvent};

/// TCP session client
///
/// `Client` is a cheap handle; clones share the same connection. When the last
/// handle is dropped the connection is closed.
///
/// # Examples
///
/// ```no_run
/// use tcp_session::io::{Client, ClientEvent};
/// use std::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel();
/// let client = Client::new(tx);
/// client.connect("127.0.0.1", 23333)?;
///
/// client.send(b"ping")?;
/// if let Ok(ClientEvent::Receive(n)) = rx.recv() {
///     let reply = client.read_data(n);
///     println!("{}", String::from_utf8_lossy(&reply));
/// }
/// client.disconnect();
/// # Ok::<(), tcp_session::SessionError>(())
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: SessionConfig,
    handler: Box<dyn ClientHandler>,
    connection: RwLock<Option<Arc<Connection>>>,
    used: AtomicBool,
}

impl Client {
    /// Create an unconnected client with the default configuration
    pub fn new<H: ClientHandler>(handler: H) -> Self {
        Self::with_config(handler, SessionConfig::default())
    }

    /// Create an unconnected client
    pub fn with_config<H: ClientHandler>(handler: H, config: SessionConfig) -> Self {
        Client {
            inner: Arc::new(ClientInner {
                config,
                handler: Box::new(handler),
                connection: RwLock::new(None),
                used: AtomicBool::new(false),
            }),
        }
    }

    /// Connect to `host:port` and start watching the connection
    ///
    /// A client represents a single connection: call this once per instance.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Connection`] - Resolution failed, the peer refused, or the attempt timed out
    /// - [`SessionError::AlreadyConnected`] - `connect` was already called on this client
    /// - [`SessionError::NotConnected`] - `disconnect` closed the connection before `connect` returned
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        if self.inner.used.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyConnected);
        }

        let addr = format!("{}:{}", host, port);
        info!(addr = %addr, "Connecting");

        let stream = open_stream(host, port, self.inner.config.connect_timeout).map_err(|source| {
            SessionError::Connection {
                addr: addr.clone(),
                source,
            }
        })?;

        let conn = Arc::new(Connection::new(ConnectionId::next(), stream));
        *self.inner.connection.write() = Some(Arc::clone(&conn));

        let watch = Watch::new(Arc::clone(&conn), &self.inner.config);
        let weak = Arc::downgrade(&self.inner);
        let watched = Arc::clone(&conn);
        let spawned = spawn_watcher(format!("client-watch-{}", conn.id()), watch, move |event| {
            handle_watch_event(&weak, &watched, event)
        });

        if let Err(source) = spawned {
            self.retire(&conn);
            return Err(SessionError::Connection { addr, source });
        }

        // A concurrent disconnect may already have closed it.
        if !conn.mark_connected() {
            debug!(conn_id = %conn.id(), "Disconnected while connecting");
            return Err(SessionError::NotConnected);
        }
        info!(
            conn_id = %conn.id(),
            peer_addr = ?conn.peer_addr(),
            "Connected"
        );
        Ok(())
    }

    /// Whether the connection currently passes the liveness check
    pub fn is_connected(&self) -> bool {
        self.current()
            .is_some_and(|conn| is_alive(&conn, self.inner.config.readable_timeout))
    }

    /// Lifecycle state of the connection, or None before `connect`
    pub fn state(&self) -> Option<ConnectionState> {
        if let Some(conn) = self.current() {
            return Some(conn.state());
        }
        self.inner
            .used
            .load(Ordering::Acquire)
            .then_some(ConnectionState::Disconnected)
    }

    /// Remote address of the live connection
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.current().and_then(|conn| conn.peer_addr())
    }

    /// Snapshot of the live connection
    pub fn info(&self) -> Option<ConnectionInfo> {
        self.current().map(|conn| conn.info())
    }

    /// Write `buf` with a single blocking write
    ///
    /// Returns how many bytes the transport accepted, which may be fewer than
    /// `buf.len()`; loop if every byte must go out. A connection that dies
    /// during the write yields `Ok(0)`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotConnected`] - The connection fails the liveness check
    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        match self.current() {
            Some(conn) if is_alive(&conn, self.inner.config.readable_timeout) => Ok(conn.send(buf)),
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Read up to `length` bytes with a single blocking read
    ///
    /// Returns an empty buffer when not connected.
    pub fn read_data(&self, length: usize) -> Bytes {
        match self.current() {
            Some(conn) if is_alive(&conn, self.inner.config.readable_timeout) => conn.read(length),
            _ => Bytes::new(),
        }
    }

    /// Close the connection, discarding unread data
    ///
    /// No-op when already disconnected.
    pub fn disconnect(&self) {
        let taken = self.inner.connection.write().take();
        if let Some(conn) = taken {
            if conn.close() {
                info!(conn_id = %conn.id(), "Disconnected by caller");
            }
        }
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.inner.connection.read().clone()
    }

    /// Close `conn` and clear the slot if it still holds it
    fn retire(&self, conn: &Arc<Connection>) {
        conn.close();
        let mut slot = self.inner.connection.write();
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, conn)) {
            *slot = None;
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut().take() {
            conn.close();
        }
    }
}

fn handle_watch_event(weak: &Weak<ClientInner>, conn: &Arc<Connection>, event: WatchEvent) {
    // Every handle is gone; closing makes the watcher finish on its next tick.
    let Some(inner) = weak.upgrade() else {
        conn.close();
        return;
    };
    let client = Client { inner };

    match event {
        WatchEvent::DataAvailable(n) => {
            trace!(conn_id = %conn.id(), available = n, "Data available");
            client.inner.handler.on_receive(&client, n);
        }
        WatchEvent::Disconnected => {
            client.retire(conn);
            info!(conn_id = %conn.id(), "Connection lost");
            client.inner.handler.on_disconnect(&client);
        }
    }
}

fn open_stream(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let mut last_err = None;

    for addr in (host, port).to_socket_addrs()? {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(addr = %addr, error = %e, "Connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "host resolved to no addresses")
    }))
}
