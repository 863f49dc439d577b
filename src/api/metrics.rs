//! Prometheus metrics endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::metrics::{self, PoolMetrics, SubscriberMetrics};
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state);

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Refresh gauges from the shared state before encoding
fn update_metrics_from_state(state: &AppState) {
    PoolMetrics::set_idle(state.pool.snapshot().idle);
    SubscriberMetrics::set_subscribed(&state.channel, state.subscriber.is_subscribed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::to_bytes;

    use crate::redis::{PoolCounters, SubscriberHealth};

    #[tokio::test]
    async fn test_metrics_endpoint_renders_text() {
        let state = AppState::new(
            "metrics-endpoint",
            Arc::new(SubscriberHealth::new()),
            Arc::new(PoolCounters::default()),
        );

        let response = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("feed_pool_idle_connections"));
        assert!(text.contains("feed_subscriber_subscribed{channel=\"metrics-endpoint\"} 0"));
    }
}
