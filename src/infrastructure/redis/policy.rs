//! Validation strategies run when an idle connection is borrowed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::FeedError;

use super::{StoreConnection, WireError};

/// Decides whether an idle connection may be handed out.
///
/// Implementations must be deterministic given the connection and the
/// time, and must not touch pool state.
#[async_trait]
pub trait BorrowPolicy: Send + Sync {
    async fn validate(
        &self,
        conn: &mut dyn StoreConnection,
        now: DateTime<Utc>,
    ) -> Result<(), WireError>;

    fn name(&self) -> &'static str;
}

/// Never pings.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOnBorrow;

#[async_trait]
impl BorrowPolicy for NoopOnBorrow {
    async fn validate(
        &self,
        _conn: &mut dyn StoreConnection,
        _now: DateTime<Utc>,
    ) -> Result<(), WireError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// PING on every idle borrow.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingOnBorrow;

#[async_trait]
impl BorrowPolicy for PingOnBorrow {
    async fn validate(
        &self,
        conn: &mut dyn StoreConnection,
        _now: DateTime<Utc>,
    ) -> Result<(), WireError> {
        conn.ping().await
    }

    fn name(&self) -> &'static str {
        "always"
    }
}

/// PING only when the Unix second is a multiple of `modulus`.
///
/// Trades detection latency for fewer round trips on hot pools.
#[derive(Debug, Clone, Copy)]
pub struct SampledPing {
    modulus: u64,
}

impl SampledPing {
    pub fn new(modulus: u64) -> Result<Self, FeedError> {
        if modulus == 0 {
            return Err(FeedError::Config(
                "sampled borrow policy needs a modulus greater than zero".to_string(),
            ));
        }
        Ok(Self { modulus })
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    pub fn should_ping(&self, now: DateTime<Utc>) -> bool {
        now.timestamp().rem_euclid(self.modulus as i64) == 0
    }
}

#[async_trait]
impl BorrowPolicy for SampledPing {
    async fn validate(
        &self,
        conn: &mut dyn StoreConnection,
        now: DateTime<Utc>,
    ) -> Result<(), WireError> {
        if !self.should_ping(now) {
            return Ok(());
        }
        conn.ping().await
    }

    fn name(&self) -> &'static str {
        "sampled"
    }
}

/// Policy selector used by settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorrowPolicyKind {
    Noop,
    #[default]
    Always,
    Sampled,
}

impl BorrowPolicyKind {
    pub fn build(self, sample_modulus: u64) -> Result<Arc<dyn BorrowPolicy>, FeedError> {
        Ok(match self {
            BorrowPolicyKind::Noop => Arc::new(NoopOnBorrow),
            BorrowPolicyKind::Always => Arc::new(PingOnBorrow),
            BorrowPolicyKind::Sampled => Arc::new(SampledPing::new(sample_modulus)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::{Dialer, Endpoint, MemoryStore};
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn test_sampled_ping_schedule() {
        let policy = SampledPing::new(5).unwrap();
        let pinged: Vec<i64> = (0..12).filter(|t| policy.should_ping(at(*t))).collect();
        assert_eq!(pinged, vec![0, 5, 10]);
    }

    #[test]
    fn test_sampled_rejects_zero_modulus() {
        assert!(matches!(SampledPing::new(0), Err(FeedError::Config(_))));
        assert!(BorrowPolicyKind::Sampled.build(0).is_err());
    }

    #[test]
    fn test_kind_deserializes_lowercase() {
        let kind: BorrowPolicyKind = serde_json::from_str("\"sampled\"").unwrap();
        assert_eq!(kind, BorrowPolicyKind::Sampled);
        assert_eq!(BorrowPolicyKind::default(), BorrowPolicyKind::Always);
        assert_eq!(BorrowPolicyKind::Noop.build(5).unwrap().name(), "noop");
    }

    #[tokio::test]
    async fn test_policies_ping_through_connection() {
        let store = MemoryStore::new();
        let endpoint = Endpoint::parse("redis://memory").unwrap();
        let mut conn = store.dialer().dial(&endpoint).await.unwrap();

        NoopOnBorrow.validate(&mut conn, at(0)).await.unwrap();
        assert_eq!(store.pings(), 0);

        PingOnBorrow.validate(&mut conn, at(1)).await.unwrap();
        assert_eq!(store.pings(), 1);

        let sampled = SampledPing::new(5).unwrap();
        sampled.validate(&mut conn, at(7)).await.unwrap();
        assert_eq!(store.pings(), 1);
        sampled.validate(&mut conn, at(10)).await.unwrap();
        assert_eq!(store.pings(), 2);
    }

    #[tokio::test]
    async fn test_ping_reports_dead_connection() {
        let store = MemoryStore::new();
        let endpoint = Endpoint::parse("redis://memory").unwrap();
        let mut conn = store.dialer().dial(&endpoint).await.unwrap();
        store.kill(conn.id());

        let result = PingOnBorrow.validate(&mut conn, at(0)).await;
        assert!(matches!(result, Err(WireError::Closed)));
    }
}
