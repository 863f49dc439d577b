//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `config`: Application configuration and settings
//! - `error`: Unified error types
//! - `logging`: Injected logger capability
//! - `metrics`: Prometheus metrics helpers
//! - `redis`: Store contract, adapters, connection pool, and subscriber health

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod redis;
