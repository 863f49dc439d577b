//! Store collaborator contract.
//!
//! The pool and the subscriber only talk to the store through [`Dialer`]
//! and [`StoreConnection`]. `RedisDialer` is the production
//! implementation and `MemoryStore` the in-process one.

use std::io;

use async_trait::async_trait;
use thiserror::Error;

use super::Endpoint;

/// Error reported by the store protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The server answered with an error reply
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    Closed,
}

/// Message fragments that indicate the transport session is gone. Matched
/// case-sensitively as whole phrases so that server replies such as
/// "unclosed quote" stay transient.
const CLOSE_SIGNALS: &[&str] = &[
    "Closed",
    "use of closed network connection",
    "connection reset by peer",
    "broken pipe",
    "end of file",
];

impl WireError {
    /// Whether the error means the connection is unusable and must be
    /// discarded. Everything else is treated as a transient hiccup.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            WireError::Closed => true,
            WireError::Io(e) => {
                matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::NotConnected
                ) || signals_close(&e.to_string())
            }
            WireError::Redis(e) => {
                e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || signals_close(&e.to_string())
            }
            WireError::Rejected(msg) | WireError::Protocol(msg) => signals_close(msg),
        }
    }

    /// Classification label used in logs and metrics.
    pub fn class(&self) -> &'static str {
        if self.is_connection_closed() {
            "fatal"
        } else {
            "transient"
        }
    }
}

fn signals_close(message: &str) -> bool {
    CLOSE_SIGNALS.iter().any(|signal| message.contains(signal))
}

/// One inbound item on a subscribed connection.
#[derive(Debug)]
pub enum Event {
    /// Payload published on the channel
    Message { channel: String, payload: Vec<u8> },
    /// Confirmation of a subscribe/unsubscribe request
    SubscriptionAck {
        channel: String,
        kind: String,
        count: i64,
    },
    /// Read or protocol failure
    Error(WireError),
    /// Anything the protocol layer could not map
    Unrecognized(String),
}

/// Opens transport sessions to an endpoint.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Conn: StoreConnection + 'static;

    async fn dial(&self, endpoint: &Endpoint) -> Result<Self::Conn, WireError>;
}

/// An established session with the store.
#[async_trait]
pub trait StoreConnection: Send {
    /// SELECT the given logical database.
    async fn select_database(&mut self, index: i64) -> Result<(), WireError>;

    /// AUTH with an optional ACL username.
    async fn authenticate(&mut self, username: Option<&str>, password: &str)
        -> Result<(), WireError>;

    /// Lightweight round trip (PING).
    async fn ping(&mut self) -> Result<(), WireError>;

    /// Put the connection in pub/sub mode on one channel.
    async fn subscribe(&mut self, channel: &str) -> Result<(), WireError>;

    /// Wait for the next event. Must be safe to drop while pending.
    async fn receive(&mut self) -> Event;

    async fn close(&mut self);
}
