//! Health endpoint.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::redis::{PoolStats, SubscriberHealthStats};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub channel: String,
    pub subscriber: SubscriberHealthStats,
    pub pool: PoolStats,
}

/// GET /health - 200 while an acknowledged subscription is being read,
/// 503 otherwise.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let healthy = state.subscriber.is_healthy();
    let (code, status) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            channel: state.channel.to_string(),
            subscriber: state.subscriber.stats(),
            pool: state.pool.snapshot(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::redis::{PoolCounters, SubscriberHealth, SubscriberState};

    fn state() -> AppState {
        AppState::new(
            "orders",
            Arc::new(SubscriberHealth::new()),
            Arc::new(PoolCounters::default()),
        )
    }

    #[tokio::test]
    async fn test_unavailable_until_subscribed() {
        let state = state();
        let (code, Json(body)) = health(State(state.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "degraded");
        assert_eq!(body.channel, "orders");
        assert_eq!(body.subscriber.state, SubscriberState::Idle);

        state.subscriber.begin_run();
        state.subscriber.set_state(SubscriberState::Receiving);
        state.subscriber.mark_subscribed();

        let (code, Json(body)) = health(State(state)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, "healthy");
        assert!(body.subscriber.subscribed);
    }

    #[test]
    fn test_response_serializes_state_in_snake_case() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.0.0".to_string(),
            uptime_seconds: 1,
            channel: "orders".to_string(),
            subscriber: SubscriberHealth::new().stats(),
            pool: PoolStats::default(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["subscriber"]["state"], "idle");
        assert_eq!(json["pool"]["idle"], 0);
    }
}
