use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::error::FeedError;
use crate::redis::{BackoffConfig, BorrowPolicy, BorrowPolicyKind, PoolConfig};
use crate::subscriber::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub subscriber: SubscriberConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Channel the subscriber listens on
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Socket read timeout between abort checks while subscribed
    #[serde(default = "default_read_poll_ms")]
    pub read_poll_ms: u64,
    #[serde(default)]
    pub borrow_policy: BorrowPolicyKind,
    /// Ping when the Unix second is a multiple of this (sampled policy)
    #[serde(default = "default_sample_modulus")]
    pub sample_modulus: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberConfig {
    /// Bounded capacity of the payload channel
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
    /// Pause after a transient receive error
    #[serde(default = "default_receive_backoff_ms")]
    pub receive_backoff_ms: u64,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Give up after this many failed runs in a row; unset retries forever
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_channel() -> String {
    "feed".to_string()
}

fn default_max_idle() -> usize {
    3
}

fn default_idle_timeout_seconds() -> u64 {
    240 // 4 minutes
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_read_poll_ms() -> u64 {
    500
}

fn default_sample_modulus() -> u64 {
    5
}

fn default_sink_capacity() -> usize {
    1024
}

fn default_receive_backoff_ms() -> u64 {
    2_000
}

fn default_retry_initial_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();
        Self::with_environment(Environment::with_prefix("FEED"))
    }

    /// Layer defaults, config files and the given environment source.
    pub fn with_environment(environment: Environment) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("redis.url", default_redis_url())?
            .set_default("redis.channel", default_channel())?
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("log.level", default_log_level())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // FEED_REDIS__URL, FEED_SUBSCRIBER__SINK_CAPACITY, FEED_LOG__FORMAT, etc.
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn pool_config(&self) -> Result<PoolConfig, FeedError> {
        PoolConfig::from_settings(&self.redis)
    }

    pub fn borrow_policy(&self) -> Result<Arc<dyn BorrowPolicy>, FeedError> {
        self.redis.borrow_policy.build(self.redis.sample_modulus)
    }

    pub fn receive_backoff(&self) -> Duration {
        Duration::from_millis(self.subscriber.receive_backoff_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: BackoffConfig {
                initial_delay_ms: self.subscriber.retry_initial_delay_ms,
                max_delay_ms: self.subscriber.retry_max_delay_ms,
                ..Default::default()
            },
            max_consecutive_failures: self.subscriber.max_consecutive_failures,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            channel: default_channel(),
            max_idle: default_max_idle(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_poll_ms: default_read_poll_ms(),
            borrow_policy: BorrowPolicyKind::default(),
            sample_modulus: default_sample_modulus(),
        }
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            sink_capacity: default_sink_capacity(),
            receive_backoff_ms: default_receive_backoff_ms(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            max_consecutive_failures: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
