//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    POOL_DIALS_TOTAL, POOL_EVICTIONS_TOTAL, POOL_IDLE_CONNECTIONS, POOL_VALIDATION_FAILURES_TOTAL,
    SUBSCRIBER_ACKS_TOTAL, SUBSCRIBER_MESSAGES_TOTAL, SUBSCRIBER_RECEIVE_ERRORS_TOTAL,
    SUBSCRIBER_RUNS_TOTAL, SUBSCRIBER_SUBSCRIBED, SUBSCRIBER_UNRECOGNIZED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording pool metrics
pub struct PoolMetrics;

impl PoolMetrics {
    /// Record a dial attempt and how it ended
    pub fn record_dial(outcome: &str) {
        POOL_DIALS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn set_idle(count: usize) {
        POOL_IDLE_CONNECTIONS.set(count as i64);
    }

    /// Record an idle connection closed by the pool
    pub fn record_eviction(reason: &str) {
        POOL_EVICTIONS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_validation_failure() {
        POOL_VALIDATION_FAILURES_TOTAL.inc();
    }
}

/// Helper struct for recording subscriber metrics
pub struct SubscriberMetrics;

impl SubscriberMetrics {
    /// Record a payload handed to the sink
    pub fn record_delivered(channel: &str) {
        SUBSCRIBER_MESSAGES_TOTAL.with_label_values(&[channel]).inc();
    }

    /// Record a receive error by class ("fatal" or "transient")
    pub fn record_receive_error(class: &str) {
        SUBSCRIBER_RECEIVE_ERRORS_TOTAL
            .with_label_values(&[class])
            .inc();
    }

    pub fn record_ack(kind: &str) {
        SUBSCRIBER_ACKS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_unrecognized() {
        SUBSCRIBER_UNRECOGNIZED_TOTAL.inc();
    }

    /// Record how a run ended
    pub fn record_run(outcome: &str) {
        SUBSCRIBER_RUNS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn set_subscribed(channel: &str, subscribed: bool) {
        SUBSCRIBER_SUBSCRIBED
            .with_label_values(&[channel])
            .set(i64::from(subscribed));
    }
}
