//! Redis implementation of the store contract.
//!
//! Each [`RedisConnection`] wraps one dedicated blocking `redis::Connection`
//! driven from `spawn_blocking`, so a subscribed socket can be read without
//! the multiplexer swallowing pub/sub frames. Reads use a short socket
//! timeout; between timeouts the reader checks an abort flag, which lets
//! [`StoreConnection::close`] release a socket that a dropped `receive`
//! is still blocked on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ::redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo, Value};
use async_trait::async_trait;

use crate::config::RedisConfig;

use super::{Dialer, Endpoint, Event, StoreConnection, WireError};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_POLL: Duration = Duration::from_millis(500);

/// Opens plain TCP sessions; SELECT and AUTH are left to the pool.
#[derive(Debug, Clone)]
pub struct RedisDialer {
    connect_timeout: Duration,
    read_poll: Duration,
}

impl RedisDialer {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_poll: DEFAULT_READ_POLL,
        }
    }

    pub fn from_settings(config: &RedisConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            read_poll: Duration::from_millis(config.read_poll_ms.max(1)),
        }
    }
}

impl Default for RedisDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for RedisDialer {
    type Conn = RedisConnection;

    async fn dial(&self, endpoint: &Endpoint) -> Result<RedisConnection, WireError> {
        // Credentials and database are deliberately left out of the
        // connection info: the pool issues SELECT and AUTH itself.
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(endpoint.host.clone(), endpoint.port),
            redis: RedisConnectionInfo::default(),
        };
        let timeout = self.connect_timeout;

        let conn = tokio::task::spawn_blocking(move || {
            let client = ::redis::Client::open(info)?;
            client.get_connection_with_timeout(timeout)
        })
        .await
        .map_err(|e| WireError::Protocol(format!("dial task failed: {}", e)))??;

        Ok(RedisConnection {
            inner: Some(conn),
            aborted: Arc::new(AtomicBool::new(false)),
            read_poll: self.read_poll,
        })
    }
}

pub struct RedisConnection {
    /// `None` while a blocking call owns the socket, or after close
    inner: Option<::redis::Connection>,
    aborted: Arc<AtomicBool>,
    read_poll: Duration,
}

impl RedisConnection {
    /// Run `f` on the blocking pool with exclusive access to the socket.
    async fn blocking<T, F>(&mut self, f: F) -> Result<T, WireError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ::redis::Connection) -> Result<T, WireError> + Send + 'static,
    {
        let mut conn = self.inner.take().ok_or(WireError::Closed)?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| WireError::Protocol(format!("blocking task failed: {}", e)))?;
        self.inner = Some(conn);
        result
    }

    async fn command(&mut self, cmd: ::redis::Cmd) -> Result<Value, WireError> {
        self.blocking(move |conn| cmd.query::<Value>(conn).map_err(WireError::from))
            .await
    }
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn select_database(&mut self, index: i64) -> Result<(), WireError> {
        let mut cmd = ::redis::cmd("SELECT");
        cmd.arg(index);
        self.command(cmd).await.map(|_| ())
    }

    async fn authenticate(
        &mut self,
        username: Option<&str>,
        password: &str,
    ) -> Result<(), WireError> {
        let mut cmd = ::redis::cmd("AUTH");
        if let Some(username) = username {
            cmd.arg(username);
        }
        cmd.arg(password);
        self.command(cmd).await.map(|_| ())
    }

    async fn ping(&mut self) -> Result<(), WireError> {
        self.command(::redis::cmd("PING")).await.map(|_| ())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<(), WireError> {
        let packed = ::redis::cmd("SUBSCRIBE").arg(channel).get_packed_command();
        let read_poll = self.read_poll;
        self.blocking(move |conn| {
            conn.send_packed_command(&packed)?;
            conn.set_read_timeout(Some(read_poll))?;
            Ok(())
        })
        .await
    }

    async fn receive(&mut self) -> Event {
        let aborted = self.aborted.clone();
        let result = self
            .blocking(move |conn| loop {
                match conn.recv_response() {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_timeout() => {
                        if aborted.load(Ordering::Acquire) {
                            return Err(WireError::Closed);
                        }
                    }
                    Err(e) => return Err(WireError::from(e)),
                }
            })
            .await;

        match result {
            Ok(value) => event_from_value(value),
            Err(e) => Event::Error(e),
        }
    }

    async fn close(&mut self) {
        self.aborted.store(true, Ordering::Release);
        self.inner = None;
    }
}

impl Drop for RedisConnection {
    fn drop(&mut self) {
        self.aborted.store(true, Ordering::Release);
    }
}

/// Map a RESP frame read in subscribed mode to an [`Event`].
fn event_from_value(value: Value) -> Event {
    let items = match value {
        Value::Array(items) => items,
        other => return Event::Unrecognized(format!("{:?}", other)),
    };

    let kind = match items.first().and_then(as_text) {
        Some(kind) => kind,
        None => return Event::Unrecognized(format!("{:?}", items)),
    };

    match (kind.as_str(), items.as_slice()) {
        ("message", [_, channel, payload]) => match (as_text(channel), as_bytes(payload)) {
            (Some(channel), Some(payload)) => Event::Message { channel, payload },
            _ => Event::Unrecognized(format!("{:?}", items)),
        },
        (
            "subscribe" | "unsubscribe" | "psubscribe" | "punsubscribe",
            [_, channel, Value::Int(count)],
        ) => match as_text(channel) {
            Some(channel) => Event::SubscriptionAck {
                channel,
                kind: kind.clone(),
                count: *count,
            },
            None => Event::Unrecognized(format!("{:?}", items)),
        },
        _ => Event::Unrecognized(format!("{:?}", items)),
    }
}

fn as_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes.clone()),
        Value::SimpleString(text) => Some(text.clone().into_bytes()),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    as_bytes(value).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(text: &str) -> Value {
        Value::BulkString(text.as_bytes().to_vec())
    }

    #[test]
    fn test_message_frame() {
        let event = event_from_value(Value::Array(vec![
            bulk("message"),
            bulk("orders"),
            Value::BulkString(vec![0, 1, 2]),
        ]));
        match event {
            Event::Message { channel, payload } => {
                assert_eq!(channel, "orders");
                assert_eq!(payload, vec![0, 1, 2]);
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_ack_frame() {
        let event = event_from_value(Value::Array(vec![
            bulk("subscribe"),
            bulk("orders"),
            Value::Int(1),
        ]));
        assert!(matches!(
            event,
            Event::SubscriptionAck { ref channel, ref kind, count: 1 }
                if channel == "orders" && kind == "subscribe"
        ));
    }

    #[test]
    fn test_unknown_frames() {
        assert!(matches!(
            event_from_value(Value::Int(3)),
            Event::Unrecognized(_)
        ));
        assert!(matches!(
            event_from_value(Value::Array(vec![bulk("pong"), bulk("")])),
            Event::Unrecognized(_)
        ));
        assert!(matches!(
            event_from_value(Value::Array(vec![])),
            Event::Unrecognized(_)
        ));
    }

    #[test]
    fn test_dialer_from_settings() {
        let config = RedisConfig {
            connect_timeout_ms: 250,
            read_poll_ms: 0,
            ..Default::default()
        };
        let dialer = RedisDialer::from_settings(&config);
        assert_eq!(dialer.connect_timeout, Duration::from_millis(250));
        assert_eq!(dialer.read_poll, Duration::from_millis(1));
    }
}
