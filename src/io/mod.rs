//! Session I/O layer
//!
//! Provides the connection watcher plus the client and server built on it.

pub mod client;
pub mod config;
pub mod connection;
pub mod handler;
pub mod liveness;
pub mod server;
pub mod watcher;

pub use client::Client;
pub use config::SessionConfig;
pub use connection::{ConnectionId, ConnectionInfo, ConnectionState};
pub use handler::{ClientEvent, ClientHandler, NoopHandler, ServerEvent, ServerHandler};
pub use liveness::{is_alive, Pollable};
pub use server::{Server, GREETING};
pub use watcher::{Watch, WatchEvent};
