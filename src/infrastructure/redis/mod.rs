//! Store access: connection contract, adapters, and the connection pool.
//!
//! # Modules
//!
//! - `connection`: `Dialer` / `StoreConnection` contract and receive events
//! - `endpoint`: URI parsing and pool configuration
//! - `client`: Redis adapter over a dedicated blocking socket
//! - `memory`: in-process store with a command journal
//! - `policy`: borrow-time validation strategies
//! - `pool`: bounded idle-connection pool
//! - `health`: subscriber state tracking
//! - `backoff`: exponential backoff for resubscribe attempts

mod backoff;
mod client;
mod clock;
mod connection;
mod endpoint;
mod health;
mod memory;
mod policy;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use client::{RedisConnection, RedisDialer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{Dialer, Event, StoreConnection, WireError};
pub use endpoint::{Endpoint, PoolConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_IDLE, DEFAULT_PORT};
pub use health::{SubscriberHealth, SubscriberHealthStats, SubscriberState};
pub use memory::{Command, MemoryConnection, MemoryDialer, MemoryStore};
pub use policy::{BorrowPolicy, BorrowPolicyKind, NoopOnBorrow, PingOnBorrow, SampledPing};
pub use pool::{ConnectionPool, PoolCounters, PoolStats};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
