//! Error types for TCP session operations
//!
//! Only caller-side precondition failures and setup failures are reported as
//! errors. Asynchronous facts about the network (a peer closing, a liveness check
//! detecting a dead socket) are delivered through the disconnect events instead.

use thiserror::Error;

use crate::io::ConnectionId;

/// TCP session error types
///
/// All fallible operations in this library return `Result<T, SessionError>`.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Failed to establish an outbound connection
    ///
    /// This error occurs when:
    /// - The host name could not be resolved
    /// - The peer refused the connection
    /// - The connect attempt timed out
    ///
    /// # Example
    /// ```no_run
    /// # use tcp_session::error::SessionError;
    /// # use std::io;
    /// let err = SessionError::Connection {
    ///     addr: "127.0.0.1:23333".to_string(),
    ///     source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
    /// };
    /// ```
    #[error("Failed to connect to {addr}: {source}")]
    Connection {
        /// Address that was requested
        addr: String,
        /// Underlying transport error
        #[source]
        source: std::io::Error,
    },

    /// Failed to bind the listening socket
    ///
    /// Typical causes are an address already in use or insufficient
    /// permissions for a privileged port.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying transport error
        #[source]
        source: std::io::Error,
    },

    /// Send invoked on a client whose connection is not alive
    #[error("Not connected")]
    NotConnected,

    /// Send invoked with an id that is not in the server registry
    ///
    /// The id was never issued, or the connection was already disconnected
    /// and its id retired.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Connect invoked on a client that was already used
    ///
    /// A client represents exactly one outbound connection; create a new
    /// client to reconnect.
    #[error("Client already connected or connecting")]
    AlreadyConnected,

    /// I/O error outside of the send/receive paths
    ///
    /// For example querying the local address of a listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
