//! Shared utilities for the crawler agent.
//!
//! This crate provides:
//! - Configuration loading and validation
//! - Logging setup
//! - Epoch-millisecond time helpers

pub mod config;
pub mod datetime;
pub mod telemetry;

pub use config::{ConfigError, CrawlerConfig, IntervalConfig, TelemetryConfig};
pub use datetime::now_millis;
pub use telemetry::init_tracing;

/// Common error type used by setup code
pub type Result<T> = std::result::Result<T, anyhow::Error>;
