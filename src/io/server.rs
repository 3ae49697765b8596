//! TCP session server
//!
//! Accepts inbound connections on a polling accept thread, keeps them in a
//! concurrent registry keyed by [`ConnectionId`], and runs one watcher thread
//! per connection. Every new connection is greeted with [`GREETING`].

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, SessionError};

use super::config::SessionConfig;
use super::connection::{Connection, ConnectionId, ConnectionInfo};
use super::handler::ServerHandler;
use super::watcher::{spawn_watcher, Watch, WatchEvent};

/// Payload written to every newly accepted connection
pub const GREETING: &[u8] = b"Hello, I'm server!";

/// TCP session server
///
/// `Server` is a cheap handle; clones share the same listener and registry.
/// Dropping the last handle stops the server.
///
/// # Examples
///
/// ```no_run
/// use tcp_session::io::{Server, ServerEvent};
/// use std::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel();
/// let server = Server::new("0.0.0.0:23333", tx);
/// server.start()?;
///
/// for event in rx {
///     if let ServerEvent::Receive(id, n) = event {
///         let data = server.read_data(id, n);
///         server.send(id, &data)?;
///     }
/// }
/// # Ok::<(), tcp_session::SessionError>(())
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    addr: String,
    config: SessionConfig,
    handler: Box<dyn ServerHandler>,
    registry: DashMap<ConnectionId, Arc<Connection>>,
    /// Present while started. Registration happens under this lock, which is
    /// what keeps `stop` from missing a connection that is being admitted.
    listener: Mutex<Option<Listening>>,
    next_epoch: AtomicU64,
}

struct Listening {
    listener: TcpListener,
    /// Distinguishes the accept thread of this start from older ones
    epoch: u64,
}

impl Server {
    /// Create a stopped server that will bind `addr` (e.g. "0.0.0.0:23333")
    pub fn new<H: ServerHandler>(addr: impl Into<String>, handler: H) -> Self {
        Self::with_config(addr, handler, SessionConfig::default())
    }

    /// Create a stopped server
    pub fn with_config<H: ServerHandler>(
        addr: impl Into<String>,
        handler: H,
        config: SessionConfig,
    ) -> Self {
        Server {
            inner: Arc::new(ServerInner {
                addr: addr.into(),
                config,
                handler: Box::new(handler),
                registry: DashMap::new(),
                listener: Mutex::new(None),
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    /// Bind and start the accept thread
    ///
    /// Starting a started server does nothing.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Bind`] - Address in use, permission denied, or unresolvable
    /// - [`SessionError::Io`] - The listener could not be configured or the thread not spawned
    pub fn start(&self) -> Result<()> {
        let mut guard = self.inner.listener.lock();
        if guard.is_some() {
            debug!(addr = %self.inner.addr, "Server already started");
            return Ok(());
        }

        info!(addr = %self.inner.addr, "Binding server");
        let listener =
            TcpListener::bind(self.inner.addr.as_str()).map_err(|source| SessionError::Bind {
                addr: self.inner.addr.clone(),
                source,
            })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.poll_interval;
        thread::Builder::new()
            .name(format!("session-accept-{}", epoch))
            .spawn(move || accept_loop(weak, epoch, interval))?;

        *guard = Some(Listening { listener, epoch });
        info!(local_addr = %local_addr, "Server listening");
        Ok(())
    }

    /// Disconnect every registered connection and stop listening
    ///
    /// Connections accepted concurrently with `stop` are either included or
    /// closed without being registered. Stopping a stopped server does nothing.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Whether the server is listening
    pub fn is_started(&self) -> bool {
        self.inner.listener.lock().is_some()
    }

    /// Local address of the listener
    ///
    /// # Errors
    ///
    /// - [`SessionError::Io`] - The server is not started
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self.inner.listener.lock().as_ref() {
            Some(listening) => Ok(listening.listener.local_addr()?),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "server not started",
            )
            .into()),
        }
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Ids of all registered connections
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.registry.iter().map(|entry| *entry.key()).collect()
    }

    /// Snapshot of a registered connection
    pub fn connection_info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.lookup(id).map(|conn| conn.info())
    }

    /// Write `buf` to connection `id` with a single blocking write
    ///
    /// Returns how many bytes the transport accepted, which may be fewer than
    /// `buf.len()`. A connection that dies during the write yields `Ok(0)`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::UnknownConnection`] - `id` is not registered
    pub fn send(&self, id: ConnectionId, buf: &[u8]) -> Result<usize> {
        let conn = self
            .lookup(id)
            .ok_or(SessionError::UnknownConnection(id))?;
        Ok(conn.send(buf))
    }

    /// Read up to `length` bytes from connection `id` with a single blocking read
    ///
    /// Returns an empty buffer when `id` is not registered.
    pub fn read_data(&self, id: ConnectionId, length: usize) -> Bytes {
        match self.lookup(id) {
            Some(conn) => conn.read(length),
            None => Bytes::new(),
        }
    }

    /// Remove `id` from the registry and close it; no-op for unknown ids
    pub fn disconnect(&self, id: ConnectionId) {
        self.inner.disconnect(id);
    }

    fn lookup(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner
            .registry
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// One accept attempt; returns false once this accept thread is obsolete
    fn accept_tick(&self, epoch: u64) -> bool {
        let admitted = {
            let guard = self.inner.listener.lock();
            let listening = match guard.as_ref() {
                Some(listening) if listening.epoch == epoch => listening,
                _ => return false,
            };

            match listening.listener.accept() {
                Ok((stream, peer_addr)) => self.admit(stream, peer_addr),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    None
                }
            }
        };

        if let Some(id) = admitted {
            self.inner.handler.on_accept(self, id);
            self.greet(id);
        }
        true
    }

    /// Register an accepted stream and start its watcher
    ///
    /// Called with the listener lock held.
    fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) -> Option<ConnectionId> {
        // Accepted sockets must block for send/read_data.
        if let Err(e) = stream.set_nonblocking(false) {
            warn!(peer_addr = %peer_addr, error = %e, "Dropping accepted socket");
            return None;
        }

        let id = ConnectionId::next();
        let conn = Arc::new(Connection::new(id, stream));
        // Nothing can close it before it is published; a registered id is
        // always Connected.
        conn.mark_connected();

        match self.inner.registry.entry(id) {
            Entry::Occupied(_) => {
                warn!(conn_id = %id, "Connection id already registered; closing socket");
                conn.close();
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&conn));
            }
        }

        let watch = Watch::new(Arc::clone(&conn), &self.inner.config);
        let weak = Arc::downgrade(&self.inner);
        let watched = Arc::clone(&conn);
        let spawned = spawn_watcher(format!("session-watch-{}", id), watch, move |event| {
            handle_watch_event(&weak, &watched, event)
        });
        if let Err(e) = spawned {
            warn!(conn_id = %id, error = %e, "Failed to start watcher; closing socket");
            self.inner.registry.remove(&id);
            conn.close();
            return None;
        }

        info!(conn_id = %id, peer_addr = %peer_addr, "Client connected");
        Some(id)
    }

    fn greet(&self, id: ConnectionId) {
        match self.send(id, GREETING) {
            Ok(n) if n == GREETING.len() => debug!(conn_id = %id, "Greeting sent"),
            Ok(n) => warn!(conn_id = %id, bytes = n, "Greeting only partially sent"),
            Err(e) => warn!(conn_id = %id, error = %e, "Greeting not sent"),
        }
    }
}

impl ServerInner {
    fn disconnect(&self, id: ConnectionId) {
        if let Some((_, conn)) = self.registry.remove(&id) {
            conn.close();
            info!(conn_id = %id, "Disconnected by server");
        }
    }

    fn stop(&self) {
        // Marks the server stopped; the accept thread exits on its next tick.
        let listening = self.listener.lock().take();

        let ids: Vec<ConnectionId> = self.registry.iter().map(|entry| *entry.key()).collect();
        for id in &ids {
            self.disconnect(*id);
        }

        if let Some(listening) = listening {
            drop(listening.listener);
            info!(
                addr = %self.addr,
                disconnected = ids.len(),
                "Server stopped"
            );
        }
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(weak: Weak<ServerInner>, epoch: u64, interval: Duration) {
    loop {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if !(Server { inner }).accept_tick(epoch) {
            break;
        }
        thread::sleep(interval);
    }
    trace!(epoch = epoch, "Accept loop finished");
}

fn handle_watch_event(weak: &Weak<ServerInner>, conn: &Arc<Connection>, event: WatchEvent) {
    let id = conn.id();
    // The server is gone; closing makes the watcher finish on its next tick.
    let Some(inner) = weak.upgrade() else {
        conn.close();
        return;
    };
    let server = Server { inner };

    match event {
        WatchEvent::DataAvailable(n) => {
            if server.inner.registry.contains_key(&id) {
                trace!(conn_id = %id, available = n, "Data available");
                server.inner.handler.on_receive(&server, id, n);
            }
        }
        WatchEvent::Disconnected => {
            let removed = server
                .inner
                .registry
                .remove_if(&id, |_, registered| Arc::ptr_eq(registered, conn))
                .is_some();
            conn.close();

            if removed {
                info!(conn_id = %id, "Client disconnected");
                server.inner.handler.on_disconnect(&server, id);
            } else {
                debug!(conn_id = %id, "Watcher retired after caller disconnect");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::handler::NoopHandler;

    #[test]
    fn test_unknown_connection() {
        let server = Server::new("127.0.0.1:0", NoopHandler);
        let id = ConnectionId::from_raw(u64::MAX);

        assert!(matches!(
            server.send(id, b"x"),
            Err(SessionError::UnknownConnection(unknown)) if unknown == id
        ));
        assert!(server.read_data(id, 16).is_empty());
        server.disconnect(id);
        server.disconnect(id);
        assert!(server.connection_info(id).is_none());
    }

    #[test]
    fn test_start_and_stop() {
        let server = Server::new("127.0.0.1:0", NoopHandler);
        assert!(!server.is_started());
        assert!(server.local_addr().is_err());

        server.start().unwrap();
        assert!(server.is_started());
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        // second start keeps the same listener
        server.start().unwrap();
        assert_eq!(server.local_addr().unwrap(), addr);

        server.stop();
        assert!(!server.is_started());
        server.stop();
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let server = Server::new(addr.to_string(), NoopHandler);
        assert!(matches!(server.start(), Err(SessionError::Bind { .. })));
        assert!(!server.is_started());
    }

    #[test]
    fn test_registered_connections_are_connected() {
        use crate::io::connection::ConnectionState;
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        let server = Server::new("127.0.0.1:0", tx);
        server.start().unwrap();
        let addr = server.local_addr().unwrap();

        let _stream = TcpStream::connect(addr).unwrap();
        let id = match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            crate::io::ServerEvent::Accept(id) => id,
            other => panic!("unexpected event {:?}", other),
        };

        let info = server.connection_info(id).unwrap();
        assert_eq!(info.state, ConnectionState::Connected);
        server.stop();
    }

    #[test]
    fn test_greeting_bytes() {
        assert_eq!(GREETING, "Hello, I'm server!".as_bytes());
    }
}
