//! Subscriber state and health tracking

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};

use serde::Serialize;

use super::current_time_ms;

/// Where a subscription runner currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SubscriberState {
    /// Not started yet
    Idle = 0,
    /// Borrowing a connection from the pool
    Connecting = 1,
    /// SUBSCRIBE issued, waiting to enter the receive loop
    Subscribing = 2,
    /// Steady state
    Receiving = 3,
    /// Sleeping after a transient receive error
    Backoff = 4,
    /// Last run ended with an error
    Failed = 5,
    /// Last run ended by cancellation or sink closure
    Stopped = 6,
}

impl From<u8> for SubscriberState {
    fn from(value: u8) -> Self {
        match value {
            1 => SubscriberState::Connecting,
            2 => SubscriberState::Subscribing,
            3 => SubscriberState::Receiving,
            4 => SubscriberState::Backoff,
            5 => SubscriberState::Failed,
            6 => SubscriberState::Stopped,
            _ => SubscriberState::Idle,
        }
    }
}

impl SubscriberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberState::Idle => "idle",
            SubscriberState::Connecting => "connecting",
            SubscriberState::Subscribing => "subscribing",
            SubscriberState::Receiving => "receiving",
            SubscriberState::Backoff => "backoff",
            SubscriberState::Failed => "failed",
            SubscriberState::Stopped => "stopped",
        }
    }
}

/// Subscriber health tracker, shared between the runner and observers
pub struct SubscriberHealth {
    state: AtomicU8,
    subscribed: AtomicBool,
    messages_delivered: AtomicU64,
    transient_errors: AtomicU64,
    runs: AtomicU64,
    last_message_ms: AtomicI64,
    last_subscribed_ms: AtomicI64,
}

impl SubscriberHealth {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SubscriberState::Idle as u8),
            subscribed: AtomicBool::new(false),
            messages_delivered: AtomicU64::new(0),
            transient_errors: AtomicU64::new(0),
            runs: AtomicU64::new(0),
            last_message_ms: AtomicI64::new(0),
            last_subscribed_ms: AtomicI64::new(0),
        }
    }

    pub fn set_state(&self, state: SubscriberState) {
        self.state.store(state as u8, Ordering::Release);
        if matches!(
            state,
            SubscriberState::Connecting | SubscriberState::Failed | SubscriberState::Stopped
        ) {
            self.subscribed.store(false, Ordering::Release);
        }
    }

    /// A new run is starting
    pub fn begin_run(&self) {
        self.runs.fetch_add(1, Ordering::AcqRel);
        self.set_state(SubscriberState::Connecting);
    }

    /// The store acknowledged the subscription
    pub fn mark_subscribed(&self) {
        self.subscribed.store(true, Ordering::Release);
        self.last_subscribed_ms
            .store(current_time_ms(), Ordering::Release);
    }

    pub fn record_message(&self) {
        self.messages_delivered.fetch_add(1, Ordering::AcqRel);
        self.last_message_ms
            .store(current_time_ms(), Ordering::Release);
    }

    pub fn record_transient_error(&self) {
        self.transient_errors.fetch_add(1, Ordering::AcqRel);
    }

    pub fn state(&self) -> SubscriberState {
        SubscriberState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Receiving (or briefly backing off) on an acknowledged subscription
    pub fn is_healthy(&self) -> bool {
        self.is_subscribed()
            && matches!(
                self.state(),
                SubscriberState::Receiving | SubscriberState::Backoff
            )
    }

    pub fn stats(&self) -> SubscriberHealthStats {
        SubscriberHealthStats {
            state: self.state(),
            subscribed: self.is_subscribed(),
            messages_delivered: self.messages_delivered.load(Ordering::Acquire),
            transient_errors: self.transient_errors.load(Ordering::Acquire),
            runs: self.runs.load(Ordering::Acquire),
            last_message_ms: self.last_message_ms.load(Ordering::Acquire),
            last_subscribed_ms: self.last_subscribed_ms.load(Ordering::Acquire),
        }
    }
}

impl Default for SubscriberHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberHealthStats {
    pub state: SubscriberState,
    pub subscribed: bool,
    pub messages_delivered: u64,
    pub transient_errors: u64,
    pub runs: u64,
    pub last_message_ms: i64,
    pub last_subscribed_ms: i64,
}
