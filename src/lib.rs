//! Minimal bidirectional TCP session layer
//!
//! This library provides a connection-oriented [`Client`](io::Client) and a
//! multi-client [`Server`](io::Server) over plain TCP. Both detect liveness
//! and unread inbound data by polling each socket from a background watcher
//! thread, and report what they find as events. Payloads are opaque bytes;
//! framing is left to the caller.
//!
//! # Features
//!
//! - **Polling liveness detection** - A socket that polls readable with zero
//!   buffered bytes is treated as closed by its peer
//! - **Level-triggered receive events** - Unread bytes are reported on every
//!   poll tick until the owner reads them
//! - **Concurrent registry** - The server tracks connections in a sharded map
//!   keyed by never-reused ids
//! - **Blocking data transfer** - `send` and `read_data` run on the caller's
//!   thread; watchers never block the owner
//!
//! # Quick Start
//!
//! **Server:**
//! ```no_run
//! use tcp_session::io::{Server, ServerEvent};
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//! let server = Server::new("0.0.0.0:23333", tx);
//! server.start()?;
//!
//! while let Ok(event) = rx.recv() {
//!     match event {
//!         ServerEvent::Accept(id) => println!("{} connected", id),
//!         ServerEvent::Receive(id, n) => {
//!             let data = server.read_data(id, n);
//!             println!("{} sent {:?}", id, data);
//!         }
//!         ServerEvent::Disconnect(id) => println!("{} left", id),
//!     }
//! }
//! # Ok::<(), tcp_session::SessionError>(())
//! ```
//!
//! **Client:**
//! ```no_run
//! use tcp_session::io::{Client, ClientEvent};
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//! let client = Client::new(tx);
//! client.connect("127.0.0.1", 23333)?;
//!
//! // The server greets every new connection
//! if let Ok(ClientEvent::Receive(n)) = rx.recv() {
//!     println!("{}", String::from_utf8_lossy(&client.read_data(n)));
//! }
//!
//! client.send(b"ping")?;
//! client.disconnect();
//! # Ok::<(), tcp_session::SessionError>(())
//! ```
//!
//! # Event Semantics
//!
//! - `on_receive` fires on every tick (50 ms by default) while bytes remain
//!   unread. Treat it as "bytes are available", not "new bytes arrived".
//! - `on_disconnect` fires at most once per connection. On the server it fires
//!   only when the watcher retires the connection; ids removed with
//!   `disconnect` or `stop` are retired silently.
//! - Worst-case event latency is one poll interval plus the liveness check.
//!
//! # Error Handling
//!
//! Precondition failures are errors on the call that caused them:
//!
//! - **NotConnected** - `Client::send` on a dead connection
//! - **UnknownConnection** - `Server::send` with an unregistered id
//! - **Connection** / **Bind** - setup failures
//!
//! Network facts never become errors. A peer that goes away is reported by
//! `on_disconnect`; a send or read racing with it returns 0 bytes or an empty
//! buffer.
//!
//! ```no_run
//! use tcp_session::io::{Client, NoopHandler};
//! use tcp_session::SessionError;
//!
//! let client = Client::new(NoopHandler);
//! match client.send(b"hello") {
//!     Ok(n) => println!("wrote {} bytes", n),
//!     Err(SessionError::NotConnected) => eprintln!("connect first"),
//!     Err(e) => eprintln!("other error: {}", e),
//! }
//! ```
//!
//! # Platform
//!
//! Probing uses `poll(2)` and `ioctl(FIONREAD)` on the raw descriptor, so the
//! crate targets Unix.

pub mod error;
pub mod io;

// Re-export commonly used types
pub use error::{Result, SessionError};
