// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::logging;
pub use infrastructure::metrics;
pub use infrastructure::redis;

// Channel subscription
pub mod subscriber;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod telemetry;
