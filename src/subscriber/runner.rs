//! One subscription run: borrow, SUBSCRIBE, then read events until the
//! connection dies, the sink closes, or the run is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::FeedError;
use crate::logging::Logger;
use crate::metrics::SubscriberMetrics;
use crate::redis::{
    ConnectionPool, Dialer, Event, StoreConnection, SubscriberHealth, SubscriberState,
};

use super::PayloadSink;

/// Pause after a transient receive error before reading again.
pub const DEFAULT_RECEIVE_BACKOFF: Duration = Duration::from_secs(2);

/// How a run ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Cancelled,
    SinkClosed,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Cancelled => "cancelled",
            Termination::SinkClosed => "sink_closed",
        }
    }
}

pub struct SubscriptionRunner<D: Dialer, S: PayloadSink> {
    pool: Arc<ConnectionPool<D>>,
    channel: String,
    sink: S,
    logger: Arc<dyn Logger>,
    health: Arc<SubscriberHealth>,
    receive_backoff: Duration,
}

impl<D: Dialer, S: PayloadSink> SubscriptionRunner<D, S> {
    pub fn new(
        pool: Arc<ConnectionPool<D>>,
        channel: impl Into<String>,
        sink: S,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            pool,
            channel: channel.into(),
            sink,
            logger,
            health: Arc::new(SubscriberHealth::new()),
            receive_backoff: DEFAULT_RECEIVE_BACKOFF,
        }
    }

    pub fn with_health(mut self, health: Arc<SubscriberHealth>) -> Self {
        self.health = health;
        self
    }

    pub fn with_receive_backoff(mut self, backoff: Duration) -> Self {
        self.receive_backoff = backoff;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn health(&self) -> Arc<SubscriberHealth> {
        self.health.clone()
    }

    /// Run one subscription until it terminates.
    ///
    /// Payloads reach the sink in the order the store delivered them.
    /// Returns `Ok` when cancelled or when the sink closes, and an error
    /// when borrowing, subscribing, or the connection itself fails.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Termination, FeedError> {
        self.health.begin_run();

        let result = self.run_inner(cancel).await;

        SubscriberMetrics::set_subscribed(&self.channel, false);
        match &result {
            Ok(termination) => {
                self.health.set_state(SubscriberState::Stopped);
                SubscriberMetrics::record_run(termination.as_str());
                self.logger.info(
                    "Subscription stopped",
                    &[("channel", &self.channel), ("reason", &termination.as_str())],
                );
            }
            Err(e) => {
                self.health.set_state(SubscriberState::Failed);
                SubscriberMetrics::record_run(e.kind());
            }
        }
        result
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<Termination, FeedError> {
        if cancel.is_cancelled() {
            return Ok(Termination::Cancelled);
        }

        let borrowed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.pool.borrow() => Some(result),
        };
        let mut conn = match borrowed {
            None => return Ok(Termination::Cancelled),
            Some(Ok(conn)) => conn,
            Some(Err(e)) => {
                self.logger.error(
                    "Failed to acquire connection",
                    &[("channel", &self.channel), ("cause", &e)],
                );
                return Err(e);
            }
        };

        self.health.set_state(SubscriberState::Subscribing);
        if let Err(e) = conn.subscribe(&self.channel).await {
            self.logger.error(
                "Subscribe failed",
                &[("channel", &self.channel), ("cause", &e)],
            );
            self.pool.discard(conn).await;
            return Err(FeedError::Subscribe {
                channel: self.channel.clone(),
                source: e,
            });
        }
        self.health.set_state(SubscriberState::Receiving);

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = conn.receive() => Some(event),
            };
            let Some(event) = event else {
                return self.stop(conn, Termination::Cancelled).await;
            };

            match event {
                Event::Message { payload, .. } => {
                    let delivered = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = self.sink.enqueue(payload) => Some(result),
                    };
                    match delivered {
                        None => return self.stop(conn, Termination::Cancelled).await,
                        Some(Err(_)) => {
                            self.logger
                                .warn("Payload sink closed", &[("channel", &self.channel)]);
                            return self.stop(conn, Termination::SinkClosed).await;
                        }
                        Some(Ok(())) => {
                            self.health.record_message();
                            SubscriberMetrics::record_delivered(&self.channel);
                        }
                    }
                }
                Event::SubscriptionAck {
                    channel,
                    kind,
                    count,
                } => {
                    self.logger.info(
                        "Subscription",
                        &[("channel", &channel), ("kind", &kind), ("count", &count)],
                    );
                    SubscriberMetrics::record_ack(&kind);
                    if kind == "subscribe" {
                        self.health.mark_subscribed();
                        SubscriberMetrics::set_subscribed(&self.channel, true);
                    }
                }
                Event::Error(e) if e.is_connection_closed() => {
                    self.logger.error(
                        "Subscribed connection lost",
                        &[("channel", &self.channel), ("cause", &e)],
                    );
                    SubscriberMetrics::record_receive_error(e.class());
                    self.pool.discard(conn).await;
                    return Err(FeedError::ConnectionLost {
                        channel: self.channel.clone(),
                        source: e,
                    });
                }
                Event::Error(e) => {
                    self.logger.error(
                        "Error while subscribed",
                        &[
                            ("channel", &self.channel),
                            ("cause", &e),
                            ("backoff_ms", &self.receive_backoff.as_millis()),
                        ],
                    );
                    SubscriberMetrics::record_receive_error(e.class());
                    self.health.record_transient_error();
                    self.health.set_state(SubscriberState::Backoff);

                    let interrupted = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(self.receive_backoff) => false,
                    };
                    if interrupted {
                        return self.stop(conn, Termination::Cancelled).await;
                    }
                    self.health.set_state(SubscriberState::Receiving);
                }
                Event::Unrecognized(raw) => {
                    self.logger.error(
                        "Unrecognized event while subscribed",
                        &[("channel", &self.channel), ("event", &raw)],
                    );
                    SubscriberMetrics::record_unrecognized();
                }
            }
        }
    }

    /// A subscribed connection is never returned to the idle set.
    async fn stop(
        &self,
        conn: D::Conn,
        termination: Termination,
    ) -> Result<Termination, FeedError> {
        self.pool.discard(conn).await;
        Ok(termination)
    }
}
