//! Channel subscription: a single-run receive loop and a supervisor that
//! restarts it.

mod runner;
mod sink;
mod supervisor;

pub use runner::{SubscriptionRunner, Termination, DEFAULT_RECEIVE_BACKOFF};
pub use sink::{PayloadSink, SinkClosed};
pub use supervisor::{RetryPolicy, Supervisor};
