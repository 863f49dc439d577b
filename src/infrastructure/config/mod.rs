mod settings;

pub use settings::{
    LogConfig, LogFormat, RedisConfig, ServerConfig, Settings, SubscriberConfig,
};
