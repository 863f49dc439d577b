//! Injected logging capability.
//!
//! The pool and the subscriber never call a global logger directly; they
//! take an `Arc<dyn Logger>`. [`TracingLogger`] forwards to `tracing` in
//! production and [`MemoryLogger`] records entries for assertions.

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Structured key/value pairs attached to a log line.
pub type Fields<'a> = &'a [(&'static str, &'a dyn fmt::Display)];

pub trait Logger: Send + Sync {
    fn info(&self, message: &str, fields: Fields<'_>);
    fn warn(&self, message: &str, fields: Fields<'_>);
    fn error(&self, message: &str, fields: Fields<'_>);
}

/// Renders fields as `key=value key=value`.
struct Rendered<'a>(Fields<'a>);

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Forwards to the `tracing` macros under the `redis_feed` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str, fields: Fields<'_>) {
        tracing::info!(target: "redis_feed", fields = %Rendered(fields), "{}", message);
    }

    fn warn(&self, message: &str, fields: Fields<'_>) {
        tracing::warn!(target: "redis_feed", fields = %Rendered(fields), "{}", message);
    }

    fn error(&self, message: &str, fields: Fields<'_>) {
        tracing::error!(target: "redis_feed", fields = %Rendered(fields), "{}", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl LogRecord {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries at `level` whose message contains `needle`.
    pub fn matching(&self, level: Level, needle: &str) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.level == level && r.message.contains(needle))
            .collect()
    }

    fn push(&self, level: Level, message: &str, fields: Fields<'_>) {
        let record = LogRecord {
            level,
            message: message.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

impl Logger for MemoryLogger {
    fn info(&self, message: &str, fields: Fields<'_>) {
        self.push(Level::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: Fields<'_>) {
        self.push(Level::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: Fields<'_>) {
        self.push(Level::Error, message, fields);
    }
}
