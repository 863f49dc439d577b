//! Bounded idle-connection pool with borrow-time validation.
//!
//! Connections are dialed on demand, handed out exclusively, and kept in a
//! small LIFO idle set when released. Idle entries older than the idle
//! timeout are closed lazily on the next borrow or release. An idle
//! connection must pass the configured [`BorrowPolicy`] before it is handed
//! out again; a freshly dialed one is not pinged.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FeedError;
use crate::logging::Logger;
use crate::metrics::PoolMetrics;

use super::{BorrowPolicy, Clock, Dialer, PoolConfig, StoreConnection, SystemClock};

struct IdleConn<C> {
    conn: C,
    idle_since: DateTime<Utc>,
}

struct IdleSet<C> {
    /// Most recently released first
    entries: VecDeque<IdleConn<C>>,
    closed: bool,
}

/// Lock-free counters, shareable with observers outside the pool.
#[derive(Debug, Default)]
pub struct PoolCounters {
    idle: AtomicUsize,
    active: AtomicUsize,
    dials: AtomicU64,
    dial_failures: AtomicU64,
    auth_failures: AtomicU64,
    reused: AtomicU64,
    validation_failures: AtomicU64,
    expired: AtomicU64,
    overflow: AtomicU64,
}

impl PoolCounters {
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.load(Ordering::Acquire),
            active: self.active.load(Ordering::Acquire),
            dials: self.dials.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            overflow: self.overflow.load(Ordering::Relaxed),
        }
    }

    fn release_active(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub dials: u64,
    pub dial_failures: u64,
    pub auth_failures: u64,
    pub reused: u64,
    pub validation_failures: u64,
    pub expired: u64,
    pub overflow: u64,
}

pub struct ConnectionPool<D: Dialer> {
    config: PoolConfig,
    dialer: D,
    policy: Arc<dyn BorrowPolicy>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    idle: Mutex<IdleSet<D::Conn>>,
    counters: Arc<PoolCounters>,
}

impl<D: Dialer> ConnectionPool<D> {
    pub fn new(
        config: PoolConfig,
        dialer: D,
        policy: Arc<dyn BorrowPolicy>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            config,
            dialer,
            policy,
            clock: Arc::new(SystemClock),
            logger,
            idle: Mutex::new(IdleSet {
                entries: VecDeque::new(),
                closed: false,
            }),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Parse `uri` into a [`PoolConfig`] with default limits.
    pub fn from_url(
        uri: &str,
        dialer: D,
        policy: Arc<dyn BorrowPolicy>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self, FeedError> {
        Ok(Self::new(PoolConfig::from_url(uri)?, dialer, policy, logger))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    pub fn counters(&self) -> Arc<PoolCounters> {
        self.counters.clone()
    }

    fn idle_set(&self) -> MutexGuard<'_, IdleSet<D::Conn>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move entries idle for longer than the timeout out of `set`.
    fn take_expired(&self, set: &mut IdleSet<D::Conn>, now: DateTime<Utc>) -> Vec<D::Conn> {
        let Ok(timeout) = chrono::Duration::from_std(self.config.idle_timeout) else {
            return Vec::new();
        };
        let mut expired = Vec::new();
        while set
            .entries
            .back()
            .is_some_and(|entry| now - entry.idle_since > timeout)
        {
            if let Some(entry) = set.entries.pop_back() {
                expired.push(entry.conn);
            }
        }
        expired
    }

    fn publish_idle(&self, set: &IdleSet<D::Conn>) {
        self.counters.idle.store(set.entries.len(), Ordering::Release);
        PoolMetrics::set_idle(set.entries.len());
    }

    async fn close_all(&self, conns: Vec<D::Conn>, reason: &'static str) {
        for mut conn in conns {
            conn.close().await;
            PoolMetrics::record_eviction(reason);
        }
    }

    /// Hand out a validated connection, reusing an idle one when possible.
    pub async fn borrow(&self) -> Result<D::Conn, FeedError> {
        loop {
            let now = self.clock.now();
            let (candidate, expired) = {
                let mut set = self.idle_set();
                if set.closed {
                    return Err(FeedError::PoolClosed);
                }
                let expired = self.take_expired(&mut set, now);
                let candidate = set.entries.pop_front();
                self.publish_idle(&set);
                (candidate, expired)
            };

            if !expired.is_empty() {
                self.counters
                    .expired
                    .fetch_add(expired.len() as u64, Ordering::Relaxed);
                self.close_all(expired, "expired").await;
            }

            let Some(entry) = candidate else {
                break;
            };

            let mut conn = entry.conn;
            match self.policy.validate(&mut conn, now).await {
                Ok(()) => {
                    self.counters.active.fetch_add(1, Ordering::AcqRel);
                    self.counters.reused.fetch_add(1, Ordering::Relaxed);
                    return Ok(conn);
                }
                Err(e) => {
                    self.counters
                        .validation_failures
                        .fetch_add(1, Ordering::Relaxed);
                    PoolMetrics::record_validation_failure();
                    self.logger.warn(
                        "Idle connection failed borrow validation",
                        &[("policy", &self.policy.name()), ("cause", &e)],
                    );
                    conn.close().await;
                }
            }
        }

        self.dial().await
    }

    /// Open a fresh connection: dial, SELECT when a database is set, then
    /// AUTH when a password is set. Never returns a connection whose AUTH
    /// was skipped or rejected.
    async fn dial(&self) -> Result<D::Conn, FeedError> {
        let endpoint = &self.config.endpoint;

        let mut conn = match self.dialer.dial(endpoint).await {
            Ok(conn) => conn,
            Err(e) => {
                self.counters.dial_failures.fetch_add(1, Ordering::Relaxed);
                PoolMetrics::record_dial("dial_error");
                self.logger.error(
                    "Failed to dial store",
                    &[("address", &endpoint.address()), ("cause", &e)],
                );
                return Err(FeedError::Dial(e));
            }
        };

        if endpoint.database > 0 {
            if let Err(e) = conn.select_database(endpoint.database).await {
                conn.close().await;
                self.counters.dial_failures.fetch_add(1, Ordering::Relaxed);
                PoolMetrics::record_dial("select_error");
                self.logger.error(
                    "Database selection rejected",
                    &[("database", &endpoint.database), ("cause", &e)],
                );
                return Err(FeedError::Dial(e));
            }
        }

        if let Some(password) = endpoint.password.as_deref().filter(|p| !p.is_empty()) {
            if let Err(e) = conn
                .authenticate(endpoint.username.as_deref(), password)
                .await
            {
                conn.close().await;
                self.counters.auth_failures.fetch_add(1, Ordering::Relaxed);
                PoolMetrics::record_dial("auth_error");
                self.logger.error(
                    "Authentication rejected",
                    &[("address", &endpoint.address()), ("cause", &e)],
                );
                return Err(FeedError::Auth(e));
            }
        }

        self.counters.dials.fetch_add(1, Ordering::Relaxed);
        self.counters.active.fetch_add(1, Ordering::AcqRel);
        PoolMetrics::record_dial("ok");
        Ok(conn)
    }

    /// Return a healthy connection for reuse. The oldest idle entries
    /// beyond `max_idle` are closed.
    pub async fn release(&self, conn: D::Conn) {
        self.counters.release_active();
        let now = self.clock.now();

        let (expired, overflow) = {
            let mut set = self.idle_set();
            if set.closed {
                (Vec::new(), vec![conn])
            } else {
                set.entries.push_front(IdleConn {
                    conn,
                    idle_since: now,
                });
                let expired = self.take_expired(&mut set, now);
                let mut overflow = Vec::new();
                while set.entries.len() > self.config.max_idle {
                    if let Some(entry) = set.entries.pop_back() {
                        overflow.push(entry.conn);
                    }
                }
                self.publish_idle(&set);
                (expired, overflow)
            }
        };

        if !expired.is_empty() {
            self.counters
                .expired
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            self.close_all(expired, "expired").await;
        }
        if !overflow.is_empty() {
            self.counters
                .overflow
                .fetch_add(overflow.len() as u64, Ordering::Relaxed);
            self.close_all(overflow, "overflow").await;
        }
    }

    /// Close a borrowed connection that must not be reused.
    pub async fn discard(&self, mut conn: D::Conn) {
        self.counters.release_active();
        conn.close().await;
    }

    /// Close every idle connection and refuse further borrows.
    /// Borrowed connections stay with their holders.
    pub async fn shutdown(&self) {
        let drained: Vec<D::Conn> = {
            let mut set = self.idle_set();
            set.closed = true;
            let drained = set.entries.drain(..).map(|entry| entry.conn).collect();
            self.publish_idle(&set);
            drained
        };

        let count = drained.len();
        self.close_all(drained, "shutdown").await;
        self.logger
            .info("Connection pool shut down", &[("closed_idle", &count)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::logging::MemoryLogger;
    use crate::redis::{
        Command, ManualClock, MemoryStore, NoopOnBorrow, PingOnBorrow, SampledPing,
    };

    fn pool_with(
        store: &MemoryStore,
        uri: &str,
        policy: Arc<dyn BorrowPolicy>,
    ) -> ConnectionPool<crate::redis::MemoryDialer> {
        ConnectionPool::from_url(uri, store.dialer(), policy, Arc::new(MemoryLogger::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_borrow_dials_when_empty() {
        let store = MemoryStore::new();
        let pool = pool_with(&store, "redis://memory", Arc::new(PingOnBorrow));

        let conn = pool.borrow().await.unwrap();
        assert_eq!(store.dials(), 1);
        // fresh connections are not pinged
        assert_eq!(store.pings(), 0);
        assert_eq!(pool.stats().active, 1);

        pool.release(conn).await;
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_noop_policy_reuses_without_ping() {
        let store = MemoryStore::new();
        let pool = pool_with(&store, "redis://memory", Arc::new(NoopOnBorrow));

        let conn = pool.borrow().await.unwrap();
        let first = conn.id();
        pool.release(conn).await;

        for _ in 0..5 {
            let conn = pool.borrow().await.unwrap();
            assert_eq!(conn.id(), first);
            pool.release(conn).await;
        }

        assert_eq!(store.dials(), 1);
        assert_eq!(store.pings(), 0);
        assert_eq!(pool.stats().reused, 5);
    }

    #[tokio::test]
    async fn test_always_policy_pings_every_idle_borrow() {
        let store = MemoryStore::new();
        let pool = pool_with(&store, "redis://memory", Arc::new(PingOnBorrow));

        let conn = pool.borrow().await.unwrap();
        pool.release(conn).await;

        for expected in 1..=3 {
            let conn = pool.borrow().await.unwrap();
            assert_eq!(store.pings(), expected);
            pool.release(conn).await;
        }
    }

    #[tokio::test]
    async fn test_always_policy_replaces_dead_connection() {
        let store = MemoryStore::new();
        let pool = pool_with(&store, "redis://memory", Arc::new(PingOnBorrow));

        let conn = pool.borrow().await.unwrap();
        let dead = conn.id();
        pool.release(conn).await;
        store.kill(dead);

        let conn = pool.borrow().await.unwrap();
        assert_ne!(conn.id(), dead);
        assert_eq!(store.pings(), 1);
        assert_eq!(store.dials(), 2);
        assert!(store.is_closed(dead));
        assert_eq!(pool.stats().validation_failures, 1);
    }

    #[tokio::test]
    async fn test_sampled_policy_follows_clock() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::at_unix(1_000));
        let pool = pool_with(&store, "redis://memory", Arc::new(SampledPing::new(5).unwrap()))
            .with_clock(clock.clone());

        let conn = pool.borrow().await.unwrap();
        pool.release(conn).await;

        for t in 1_000..1_010 {
            clock.set_unix(t);
            let before = store.pings();
            let conn = pool.borrow().await.unwrap();
            let pinged = store.pings() - before;
            assert_eq!(pinged, usize::from(t % 5 == 0), "t={}", t);
            pool.release(conn).await;
        }
        assert_eq!(store.dials(), 1);
    }

    #[tokio::test]
    async fn test_select_then_auth_on_dial() {
        let store = MemoryStore::new();
        store.require_password("secret");
        let pool = pool_with(&store, "redis://:secret@memory?db=2", Arc::new(PingOnBorrow));

        let conn = pool.borrow().await.unwrap();
        let id = conn.id();
        assert_eq!(
            store.journal(),
            vec![
                Command::Dial { conn: id },
                Command::Select { conn: id, index: 2 },
                Command::Auth {
                    conn: id,
                    password: "secret".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_auth_sends_decoded_password() {
        let store = MemoryStore::new();
        store.require_password("p@ss:word");
        let pool = pool_with(&store, "redis://:p%40ss%3Aword@memory", Arc::new(NoopOnBorrow));

        let conn = pool.borrow().await.unwrap();
        assert_eq!(
            store.journal()[1],
            Command::Auth {
                conn: conn.id(),
                password: "p@ss:word".to_string(),
            }
        );
        assert_eq!(pool.stats().auth_failures, 0);
    }

    #[tokio::test]
    async fn test_no_select_or_auth_when_unset() {
        let store = MemoryStore::new();
        let pool = pool_with(&store, "redis://memory?db=0", Arc::new(NoopOnBorrow));

        let _conn = pool.borrow().await.unwrap();
        assert_eq!(store.journal().len(), 1);
    }

    #[tokio::test]
    async fn test_auth_rejection_closes_connection() {
        let store = MemoryStore::new();
        store.require_password("secret");
        let pool = pool_with(&store, "redis://:wrong@memory", Arc::new(PingOnBorrow));

        let result = pool.borrow().await;
        assert!(matches!(result, Err(FeedError::Auth(_))));
        assert!(store.is_closed(1));
        assert_eq!(store.open_connections(), 0);

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.auth_failures, 1);
    }

    #[tokio::test]
    async fn test_select_rejection_is_dial_error() {
        let store = MemoryStore::new();
        store.set_databases(2);
        let pool = pool_with(&store, "redis://memory?db=9", Arc::new(PingOnBorrow));

        let result = pool.borrow().await;
        assert!(matches!(result, Err(FeedError::Dial(_))));
        assert!(store.is_closed(1));
    }

    #[tokio::test]
    async fn test_refused_dial_is_dial_error() {
        let store = MemoryStore::new();
        store.refuse_dials(true);
        let logger = Arc::new(MemoryLogger::new());
        let pool = ConnectionPool::from_url(
            "redis://memory",
            store.dialer(),
            Arc::new(PingOnBorrow),
            logger.clone(),
        )
        .unwrap();

        assert!(matches!(pool.borrow().await, Err(FeedError::Dial(_))));
        assert_eq!(pool.stats().dial_failures, 1);
        assert_eq!(
            logger
                .matching(crate::logging::Level::Error, "Failed to dial")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_idle_timeout_evicts_on_borrow() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::at_unix(10_000));
        let pool = pool_with(&store, "redis://memory", Arc::new(NoopOnBorrow))
            .with_clock(clock.clone());

        let conn = pool.borrow().await.unwrap();
        let stale = conn.id();
        pool.release(conn).await;

        clock.advance(Duration::from_secs(241));
        let conn = pool.borrow().await.unwrap();

        assert_ne!(conn.id(), stale);
        assert!(store.is_closed(stale));
        assert_eq!(pool.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_idle_within_timeout_is_reused() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::at_unix(10_000));
        let pool = pool_with(&store, "redis://memory", Arc::new(NoopOnBorrow))
            .with_clock(clock.clone());

        let conn = pool.borrow().await.unwrap();
        let id = conn.id();
        pool.release(conn).await;

        clock.advance(Duration::from_secs(239));
        assert_eq!(pool.borrow().await.unwrap().id(), id);
    }

    #[tokio::test]
    async fn test_release_closes_beyond_max_idle() {
        let store = MemoryStore::new();
        let pool = pool_with(&store, "redis://memory", Arc::new(NoopOnBorrow));

        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.borrow().await.unwrap());
        }
        for conn in held {
            pool.release(conn).await;
        }

        let stats = pool.stats();
        assert_eq!(stats.idle, 3);
        assert_eq!(stats.overflow, 2);
        // the two released first are the oldest and get closed
        assert!(store.is_closed(1));
        assert!(store.is_closed(2));
        assert_eq!(store.open_connections(), 3);
    }

    #[tokio::test]
    async fn test_lifo_reuse() {
        let store = MemoryStore::new();
        let pool = pool_with(&store, "redis://memory", Arc::new(NoopOnBorrow));

        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        let b_id = b.id();
        pool.release(a).await;
        pool.release(b).await;

        assert_eq!(pool.borrow().await.unwrap().id(), b_id);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_and_rejects_borrow() {
        let store = MemoryStore::new();
        let pool = pool_with(&store, "redis://memory", Arc::new(NoopOnBorrow));

        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        pool.release(a).await;

        pool.shutdown().await;
        assert!(store.is_closed(1));
        assert!(matches!(pool.borrow().await, Err(FeedError::PoolClosed)));

        // released after shutdown: closed, not pooled
        pool.release(b).await;
        assert!(store.is_closed(2));
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn test_discard_closes_and_updates_active() {
        let store = MemoryStore::new();
        let pool = pool_with(&store, "redis://memory", Arc::new(NoopOnBorrow));

        let conn = pool.borrow().await.unwrap();
        pool.discard(conn).await;

        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 0);
        assert!(store.is_closed(1));
    }

    #[test]
    fn test_from_url_rejects_malformed() {
        let store = MemoryStore::new();
        let result = ConnectionPool::from_url(
            "::not-a-uri::",
            store.dialer(),
            Arc::new(NoopOnBorrow),
            Arc::new(MemoryLogger::new()),
        );
        assert!(matches!(result, Err(FeedError::Config(_))));
    }
}
