use std::sync::Arc;
use std::time::Instant;

use crate::redis::{PoolCounters, SubscriberHealth};

/// Read-only views shared with the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub channel: Arc<str>,
    pub subscriber: Arc<SubscriberHealth>,
    pub pool: Arc<PoolCounters>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        channel: impl Into<Arc<str>>,
        subscriber: Arc<SubscriberHealth>,
        pool: Arc<PoolCounters>,
    ) -> Self {
        Self {
            channel: channel.into(),
            subscriber,
            pool,
            start_time: Instant::now(),
        }
    }
}
