//! In-process store backend.
//!
//! Implements the [`Dialer`] / [`StoreConnection`] contract without a
//! network. Every command is appended to a journal so callers can assert
//! on the exact sequence a pool or subscriber issued. Failure injection
//! (refused dials, rejected credentials, dead connections, read errors)
//! is driven through the [`MemoryStore`] handle.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Dialer, Endpoint, Event, StoreConnection, WireError};

const DEFAULT_DATABASES: i64 = 16;

/// A command observed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Dial { conn: u64 },
    Select { conn: u64, index: i64 },
    Auth { conn: u64, password: String },
    Ping { conn: u64 },
    Subscribe { conn: u64, channel: String },
    Close { conn: u64 },
}

struct Link {
    alive: bool,
    channel: Option<String>,
    events: Option<mpsc::UnboundedSender<Event>>,
}

struct StoreState {
    password: Option<String>,
    databases: i64,
    refuse_dials: bool,
    reject_subscribe: bool,
    next_id: u64,
    journal: Vec<Command>,
    links: HashMap<u64, Link>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            password: None,
            databases: DEFAULT_DATABASES,
            refuse_dials: false,
            reject_subscribe: false,
            next_id: 1,
            journal: Vec::new(),
            links: HashMap::new(),
        }
    }
}

/// Shared handle on an in-process store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Require AUTH with this password.
    pub fn require_password(&self, password: impl Into<String>) {
        self.state().password = Some(password.into());
    }

    pub fn set_databases(&self, databases: i64) {
        self.state().databases = databases;
    }

    /// Fail every dial with a connection-refused error while set.
    pub fn refuse_dials(&self, refuse: bool) {
        self.state().refuse_dials = refuse;
    }

    /// Reject SUBSCRIBE while set.
    pub fn reject_subscribe(&self, reject: bool) {
        self.state().reject_subscribe = reject;
    }

    pub fn dialer(&self) -> MemoryDialer {
        MemoryDialer {
            store: self.clone(),
        }
    }

    pub fn journal(&self) -> Vec<Command> {
        self.state().journal.clone()
    }

    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.state().journal.iter().filter(|c| predicate(c)).count()
    }

    pub fn pings(&self) -> usize {
        self.count(|c| matches!(c, Command::Ping { .. }))
    }

    pub fn dials(&self) -> usize {
        self.count(|c| matches!(c, Command::Dial { .. }))
    }

    pub fn is_closed(&self, conn: u64) -> bool {
        self.count(|c| *c == Command::Close { conn }) > 0
    }

    /// Connections neither closed nor killed.
    pub fn open_connections(&self) -> usize {
        self.state().links.values().filter(|l| l.alive).count()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state()
            .links
            .values()
            .filter(|l| l.alive && l.channel.as_deref() == Some(channel))
            .count()
    }

    /// Silently kill a connection, as a server-side timeout would.
    pub fn kill(&self, conn: u64) {
        let mut state = self.state();
        if let Some(link) = state.links.get_mut(&conn) {
            link.alive = false;
            if let Some(events) = link.events.take() {
                let _ = events.send(Event::Error(WireError::Closed));
            }
        }
    }

    /// Deliver a payload to every subscriber of `channel`. Returns the
    /// number of receivers, like PUBLISH.
    pub fn publish(&self, channel: &str, payload: impl AsRef<[u8]>) -> usize {
        self.broadcast(channel, || Event::Message {
            channel: channel.to_string(),
            payload: payload.as_ref().to_vec(),
        })
    }

    /// Push a read error to every subscriber of `channel`.
    pub fn send_io_error(&self, channel: &str, kind: io::ErrorKind, message: &str) -> usize {
        self.broadcast(channel, || Event::Error(WireError::Io(io::Error::new(kind, message))))
    }

    pub fn send_protocol_error(&self, channel: &str, message: &str) -> usize {
        self.broadcast(channel, || Event::Error(WireError::Protocol(message.to_string())))
    }

    pub fn send_unrecognized(&self, channel: &str, raw: &str) -> usize {
        self.broadcast(channel, || Event::Unrecognized(raw.to_string()))
    }

    /// Reset every subscriber of `channel` as a peer would.
    pub fn disconnect(&self, channel: &str) -> usize {
        let mut state = self.state();
        let mut dropped = 0;
        for link in state.links.values_mut() {
            if !link.alive || link.channel.as_deref() != Some(channel) {
                continue;
            }
            link.alive = false;
            if let Some(events) = link.events.take() {
                let _ = events.send(Event::Error(WireError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ))));
                dropped += 1;
            }
        }
        dropped
    }

    fn broadcast(&self, channel: &str, make: impl Fn() -> Event) -> usize {
        let state = self.state();
        state
            .links
            .values()
            .filter(|l| l.alive && l.channel.as_deref() == Some(channel))
            .filter_map(|l| l.events.as_ref())
            .filter(|events| events.send(make()).is_ok())
            .count()
    }

    fn open(&self) -> Result<u64, WireError> {
        let mut state = self.state();
        if state.refuse_dials {
            return Err(WireError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.journal.push(Command::Dial { conn: id });
        state.links.insert(
            id,
            Link {
                alive: true,
                channel: None,
                events: None,
            },
        );
        Ok(id)
    }

    /// Journal `command` and fail if the connection is no longer alive.
    fn record(&self, conn: u64, command: Command) -> Result<MutexGuard<'_, StoreState>, WireError> {
        let mut state = self.state();
        state.journal.push(command);
        match state.links.get(&conn) {
            Some(link) if link.alive => Ok(state),
            _ => Err(WireError::Closed),
        }
    }
}

/// [`Dialer`] over a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryDialer {
    store: MemoryStore,
}

#[async_trait]
impl Dialer for MemoryDialer {
    type Conn = MemoryConnection;

    async fn dial(&self, _endpoint: &Endpoint) -> Result<MemoryConnection, WireError> {
        let id = self.store.open()?;
        Ok(MemoryConnection {
            id,
            store: self.store.clone(),
            events: None,
            closed: false,
        })
    }
}

pub struct MemoryConnection {
    id: u64,
    store: MemoryStore,
    events: Option<mpsc::UnboundedReceiver<Event>>,
    closed: bool,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn select_database(&mut self, index: i64) -> Result<(), WireError> {
        let state = self.store.record(self.id, Command::Select { conn: self.id, index })?;
        if index < 0 || index >= state.databases {
            return Err(WireError::Rejected("ERR DB index is out of range".to_string()));
        }
        Ok(())
    }

    async fn authenticate(
        &mut self,
        _username: Option<&str>,
        password: &str,
    ) -> Result<(), WireError> {
        let state = self.store.record(
            self.id,
            Command::Auth {
                conn: self.id,
                password: password.to_string(),
            },
        )?;
        match state.password.as_deref() {
            Some(expected) if expected == password => Ok(()),
            Some(_) => Err(WireError::Rejected(
                "WRONGPASS invalid username-password pair or user is disabled.".to_string(),
            )),
            None => Err(WireError::Rejected(
                "ERR AUTH <password> called without any password configured for the default user"
                    .to_string(),
            )),
        }
    }

    async fn ping(&mut self) -> Result<(), WireError> {
        self.store.record(self.id, Command::Ping { conn: self.id })?;
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<(), WireError> {
        let mut state = self.store.record(
            self.id,
            Command::Subscribe {
                conn: self.id,
                channel: channel.to_string(),
            },
        )?;
        if state.reject_subscribe {
            return Err(WireError::Rejected(
                "ERR Can't execute 'subscribe'".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Event::SubscriptionAck {
            channel: channel.to_string(),
            kind: "subscribe".to_string(),
            count: 1,
        });
        if let Some(link) = state.links.get_mut(&self.id) {
            link.channel = Some(channel.to_string());
            link.events = Some(tx);
        }
        self.events = Some(rx);
        Ok(())
    }

    async fn receive(&mut self) -> Event {
        match self.events.as_mut() {
            Some(events) => events.recv().await.unwrap_or(Event::Error(WireError::Closed)),
            None => Event::Error(WireError::Protocol(
                "connection is not in subscribed mode".to_string(),
            )),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.events = None;
        let mut state = self.store.state();
        state.journal.push(Command::Close { conn: self.id });
        if let Some(link) = state.links.get_mut(&self.id) {
            link.alive = false;
            link.events = None;
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let mut state = self.store.state();
        if let Some(link) = state.links.get_mut(&self.id) {
            link.alive = false;
            link.events = None;
        }
    }
}
