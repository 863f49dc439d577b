use thiserror::Error;

use crate::redis::WireError;

/// Errors surfaced by the connection pool and the subscription runner.
#[derive(Error, Debug)]
pub enum FeedError {
    /// Endpoint descriptor or pool policy could not be built
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings sources failed to load or deserialize
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Transport connect or database selection failed
    #[error("Dial error: {0}")]
    Dial(#[source] WireError),

    /// Credentials were rejected by the store
    #[error("Authentication error: {0}")]
    Auth(#[source] WireError),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Subscribe to channel {channel} failed: {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: WireError,
    },

    /// The peer or transport closed the subscribed connection
    #[error("Connection lost on channel {channel}: {source}")]
    ConnectionLost {
        channel: String,
        #[source]
        source: WireError,
    },
}

impl FeedError {
    /// Whether a supervisor may retry after this error with a fresh borrow.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::Dial(_)
                | FeedError::Auth(_)
                | FeedError::Subscribe { .. }
                | FeedError::ConnectionLost { .. }
        )
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Config(_) => "config",
            FeedError::Settings(_) => "settings",
            FeedError::Dial(_) => "dial",
            FeedError::Auth(_) => "auth",
            FeedError::PoolClosed => "pool_closed",
            FeedError::Subscribe { .. } => "subscribe",
            FeedError::ConnectionLost { .. } => "connection_lost",
        }
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
