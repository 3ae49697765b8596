//! Event handlers for clients and servers
//!
//! Events are delivered on the watcher thread of the connection they concern
//! (or the accept thread for `on_accept`). Handlers must be `Send + Sync` and
//! should return quickly; a slow handler delays the next check of that
//! connection.
//!
//! For queue-style consumption, `std::sync::mpsc::Sender<ClientEvent>` and
//! `Sender<ServerEvent>` implement the traits directly.

use std::sync::mpsc::Sender;

use super::client::Client;
use super::connection::ConnectionId;
use super::server::Server;

/// Receives events for a [`Client`]
///
/// Both methods default to doing nothing.
///
/// # Examples
///
/// ```no_run
/// use tcp_session::io::{Client, ClientHandler};
///
/// struct Printer;
///
/// impl ClientHandler for Printer {
///     fn on_receive(&self, client: &Client, available: usize) {
///         let data = client.read_data(available);
///         println!("received {}", String::from_utf8_lossy(&data));
///     }
/// }
///
/// let client = Client::new(Printer);
/// client.connect("127.0.0.1", 23333)?;
/// # Ok::<(), tcp_session::SessionError>(())
/// ```
pub trait ClientHandler: Send + Sync + 'static {
    /// Unread bytes are waiting; raised every poll tick until they are read
    fn on_receive(&self, _client: &Client, _available: usize) {}

    /// The connection is gone; raised exactly once
    fn on_disconnect(&self, _client: &Client) {}
}

/// Receives events for a [`Server`]
pub trait ServerHandler: Send + Sync + 'static {
    /// A connection was accepted and registered
    fn on_accept(&self, _server: &Server, _id: ConnectionId) {}

    /// Unread bytes are waiting on `id`; raised every poll tick until read
    fn on_receive(&self, _server: &Server, _id: ConnectionId, _available: usize) {}

    /// The watcher found `id` dead and retired it
    fn on_disconnect(&self, _server: &Server, _id: ConnectionId) {}
}

/// Handler that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl ClientHandler for NoopHandler {}
impl ServerHandler for NoopHandler {}

/// Client event as a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Receive(usize),
    Disconnect,
}

/// Server event as a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    Accept(ConnectionId),
    Receive(ConnectionId, usize),
    Disconnect(ConnectionId),
}

// A dropped receiver just means nobody is listening any more.
impl ClientHandler for Sender<ClientEvent> {
    fn on_receive(&self, _client: &Client, available: usize) {
        let _ = self.send(ClientEvent::Receive(available));
    }

    fn on_disconnect(&self, _client: &Client) {
        let _ = self.send(ClientEvent::Disconnect);
    }
}

impl ServerHandler for Sender<ServerEvent> {
    fn on_accept(&self, _server: &Server, id: ConnectionId) {
        let _ = self.send(ServerEvent::Accept(id));
    }

    fn on_receive(&self, _server: &Server, id: ConnectionId, available: usize) {
        let _ = self.send(ServerEvent::Receive(id, available));
    }

    fn on_disconnect(&self, _server: &Server, id: ConnectionId) {
        let _ = self.send(ServerEvent::Disconnect(id));
    }
}
