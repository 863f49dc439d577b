//! Prometheus metrics for the pool and the subscriber.
//!
//! - Pool metrics (dials by outcome, idle size, evictions, validation failures)
//! - Subscriber metrics (payloads delivered, receive errors by class, runs)

mod helpers;

pub use helpers::{encode_metrics, PoolMetrics, SubscriberMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "feed";

lazy_static! {
    // ============================================================================
    // Pool Metrics
    // ============================================================================

    /// Dial attempts by outcome (ok, dial_error, select_error, auth_error)
    pub static ref POOL_DIALS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_pool_dials_total", METRIC_PREFIX),
        "Total dial attempts by outcome",
        &["outcome"]
    ).unwrap();

    /// Idle connections currently held
    pub static ref POOL_IDLE_CONNECTIONS: IntGauge = register_int_gauge!(
        format!("{}_pool_idle_connections", METRIC_PREFIX),
        "Number of idle connections in the pool"
    ).unwrap();

    /// Idle connections closed by the pool
    pub static ref POOL_EVICTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_pool_evictions_total", METRIC_PREFIX),
        "Idle connections closed by the pool",
        &["reason"]
    ).unwrap();

    /// Idle connections that failed borrow validation
    pub static ref POOL_VALIDATION_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pool_validation_failures_total", METRIC_PREFIX),
        "Idle connections that failed borrow validation"
    ).unwrap();

    // ============================================================================
    // Subscriber Metrics
    // ============================================================================

    /// Payloads handed to the sink
    pub static ref SUBSCRIBER_MESSAGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_subscriber_messages_total", METRIC_PREFIX),
        "Payloads delivered to the sink",
        &["channel"]
    ).unwrap();

    /// Receive errors by class (fatal, transient)
    pub static ref SUBSCRIBER_RECEIVE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_subscriber_receive_errors_total", METRIC_PREFIX),
        "Receive errors by class",
        &["class"]
    ).unwrap();

    /// Subscription acknowledgements by kind
    pub static ref SUBSCRIBER_ACKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_subscriber_acks_total", METRIC_PREFIX),
        "Subscription acknowledgements by kind",
        &["kind"]
    ).unwrap();

    /// Frames that were neither messages, acknowledgements nor errors
    pub static ref SUBSCRIBER_UNRECOGNIZED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_subscriber_unrecognized_total", METRIC_PREFIX),
        "Unrecognized frames received while subscribed"
    ).unwrap();

    /// Completed runs by termination (cancelled, sink_closed, or an error kind)
    pub static ref SUBSCRIBER_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_subscriber_runs_total", METRIC_PREFIX),
        "Subscription runs by how they ended",
        &["outcome"]
    ).unwrap();

    /// 1 while an acknowledged subscription on the channel is being read
    pub static ref SUBSCRIBER_SUBSCRIBED: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_subscriber_subscribed", METRIC_PREFIX),
        "Whether the subscriber holds an acknowledged subscription",
        &["channel"]
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registered_with_prefix() {
        POOL_DIALS_TOTAL.with_label_values(&["ok"]).inc();
        SUBSCRIBER_RECEIVE_ERRORS_TOTAL
            .with_label_values(&["transient"])
            .inc();

        let output = encode_metrics().unwrap();
        assert!(output.contains("feed_pool_dials_total"));
        assert!(output.contains("feed_subscriber_receive_errors_total"));
    }

    #[test]
    fn test_subscribed_gauge_is_per_channel() {
        SubscriberMetrics::set_subscribed("gauge-a", true);
        SubscriberMetrics::set_subscribed("gauge-b", true);
        SubscriberMetrics::set_subscribed("gauge-b", false);

        assert_eq!(SUBSCRIBER_SUBSCRIBED.with_label_values(&["gauge-a"]).get(), 1);
        assert_eq!(SUBSCRIBER_SUBSCRIBED.with_label_values(&["gauge-b"]).get(), 0);

        let output = encode_metrics().unwrap();
        assert!(output.contains("feed_subscriber_subscribed{channel=\"gauge-a\"} 1"));
        assert!(output.contains("feed_subscriber_subscribed{channel=\"gauge-b\"} 0"));
    }
}
