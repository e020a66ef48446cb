//! Configuration for the crawler agent.
//!
//! Settings come from three layers, later ones overriding earlier ones:
//!
//! 1. An optional properties file (`toml`, `json`, `yaml` or `ini`)
//! 2. Environment variables prefixed with `AGENT_`, e.g. `AGENT_CRAWLER__THREADS=50`
//! 3. Explicit string properties such as `crawler.threads = "50"`
//!
//! ## Example Configuration
//!
//! ```toml
//! [crawler]
//! threads = 100
//! deletethreads = 10
//! expirethreads = 10
//! lowwaterfactor = 5.0
//! stuffamountfactor = 0.5
//!
//! [crawler.intervals]
//! seeding_poll_ms = 60000
//! ```

use crawler_domain::AgentError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const THREADS_PROPERTY: &str = "crawler.threads";
pub const DELETE_THREADS_PROPERTY: &str = "crawler.deletethreads";
pub const EXPIRE_THREADS_PROPERTY: &str = "crawler.expirethreads";
pub const LOW_WATER_FACTOR_PROPERTY: &str = "crawler.lowwaterfactor";
pub const STUFF_AMOUNT_FACTOR_PROPERTY: &str = "crawler.stuffamountfactor";

const MAX_THREADS: usize = 300;

/// Configuration errors. Every one of them is fatal to agent startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Property {key} must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: &'static str,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for AgentError {
    fn from(err: ConfigError) -> Self {
        AgentError::SetupFatal(err.to_string())
    }
}

/// Root of the configuration tree; only the `crawler` table is read.
#[derive(Debug, Default, Deserialize)]
struct ConfigRoot {
    #[serde(default)]
    crawler: CrawlerConfig,
}

/// Crawler agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Document worker threads
    #[serde(rename = "threads", default = "default_threads")]
    pub threads: usize,

    /// Delete worker threads
    #[serde(rename = "deletethreads", default = "default_secondary_threads")]
    pub delete_threads: usize,

    /// Expire worker threads
    #[serde(rename = "expirethreads", default = "default_secondary_threads")]
    pub expire_threads: usize,

    /// Queue is considered empty below `low_water_factor * workers` documents
    #[serde(rename = "lowwaterfactor", default = "default_low_water_factor")]
    pub low_water_factor: f64,

    /// Smallest stuffing batch is `stuff_amount_factor * workers` documents
    #[serde(rename = "stuffamountfactor", default = "default_stuff_amount_factor")]
    pub stuff_amount_factor: f64,

    /// Documents per delete queue set
    #[serde(rename = "deletebatchsize", default = "default_delete_batch_size")]
    pub delete_batch_size: usize,

    #[serde(default)]
    pub intervals: IntervalConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Sleep and poll intervals, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    /// Document stuffer pause while the queue is still above low water
    pub stuffer_busy_ms: u64,
    /// Document stuffer pause when the store had nothing to hand out
    pub stuffer_idle_ms: u64,
    pub delete_stuffer_busy_ms: u64,
    pub delete_stuffer_idle_ms: u64,
    /// Pause after a job store connection failure
    pub database_backoff_ms: u64,
    pub job_reset_poll_ms: u64,
    pub seeding_poll_ms: u64,
    pub idle_cleanup_poll_ms: u64,
    /// Delete worker pause when an interruption's retry time already passed
    pub delete_interruption_fallback_ms: u64,
    /// Period between liveness checks while stopping
    pub shutdown_grace_ms: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            stuffer_busy_ms: 1_000,
            stuffer_idle_ms: 2_000,
            delete_stuffer_busy_ms: 100,
            delete_stuffer_idle_ms: 1_000,
            database_backoff_ms: 10_000,
            job_reset_poll_ms: 10_000,
            seeding_poll_ms: 60_000,
            idle_cleanup_poll_ms: 15_000,
            delete_interruption_fallback_ms: 300_000,
            shutdown_grace_ms: 1_000,
        }
    }
}

impl IntervalConfig {
    /// Every interval divided by `divisor` (at least 1 ms). Used to run the
    /// agent's loops quickly under test.
    pub fn scaled(&self, divisor: u64) -> Self {
        let divisor = divisor.max(1);
        let scale = |ms: u64| (ms / divisor).max(1);
        Self {
            stuffer_busy_ms: scale(self.stuffer_busy_ms),
            stuffer_idle_ms: scale(self.stuffer_idle_ms),
            delete_stuffer_busy_ms: scale(self.delete_stuffer_busy_ms),
            delete_stuffer_idle_ms: scale(self.delete_stuffer_idle_ms),
            database_backoff_ms: scale(self.database_backoff_ms),
            job_reset_poll_ms: scale(self.job_reset_poll_ms),
            seeding_poll_ms: scale(self.seeding_poll_ms),
            idle_cleanup_poll_ms: scale(self.idle_cleanup_poll_ms),
            delete_interruption_fallback_ms: scale(self.delete_interruption_fallback_ms),
            shutdown_grace_ms: scale(self.shutdown_grace_ms),
        }
    }

    pub fn stuffer_busy(&self) -> Duration {
        Duration::from_millis(self.stuffer_busy_ms)
    }

    pub fn stuffer_idle(&self) -> Duration {
        Duration::from_millis(self.stuffer_idle_ms)
    }

    pub fn delete_stuffer_busy(&self) -> Duration {
        Duration::from_millis(self.delete_stuffer_busy_ms)
    }

    pub fn delete_stuffer_idle(&self) -> Duration {
        Duration::from_millis(self.delete_stuffer_idle_ms)
    }

    pub fn database_backoff(&self) -> Duration {
        Duration::from_millis(self.database_backoff_ms)
    }

    pub fn job_reset_poll(&self) -> Duration {
        Duration::from_millis(self.job_reset_poll_ms)
    }

    pub fn seeding_poll(&self) -> Duration {
        Duration::from_millis(self.seeding_poll_ms)
    }

    pub fn idle_cleanup_poll(&self) -> Duration {
        Duration::from_millis(self.idle_cleanup_poll_ms)
    }

    pub fn delete_interruption_fallback(&self) -> Duration {
        Duration::from_millis(self.delete_interruption_fallback_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to logs
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable JSON logging format
    #[serde(default)]
    pub json_logging: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            json_logging: false,
            log_level: default_log_level(),
        }
    }
}

// Default value functions
fn default_threads() -> usize {
    100
}

fn default_secondary_threads() -> usize {
    10
}

fn default_low_water_factor() -> f64 {
    5.0
}

fn default_stuff_amount_factor() -> f64 {
    0.5
}

fn default_delete_batch_size() -> usize {
    10
}

fn default_service_name() -> String {
    "crawler-agent".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            delete_threads: default_secondary_threads(),
            expire_threads: default_secondary_threads(),
            low_water_factor: default_low_water_factor(),
            stuff_amount_factor: default_stuff_amount_factor(),
            delete_batch_size: default_delete_batch_size(),
            intervals: IntervalConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl CrawlerConfig {
    /// Load configuration from an optional file and the environment.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use crawler_common::config::CrawlerConfig;
    ///
    /// let config = CrawlerConfig::load(None).expect("Failed to load configuration");
    /// println!("Running {} worker threads", config.threads);
    /// ```
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::build(config_file, std::iter::empty::<(String, String)>())
    }

    /// Load configuration from string properties, on top of file and
    /// environment sources.
    ///
    /// ```
    /// use crawler_common::config::CrawlerConfig;
    ///
    /// let config = CrawlerConfig::from_properties([("crawler.threads", "25")]).unwrap();
    /// assert_eq!(config.threads, 25);
    /// assert_eq!(config.delete_threads, 10);
    /// ```
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self::build(None, properties)
    }

    /// Layer file, environment and explicit properties, then validate.
    pub fn build<I, K, V>(config_file: Option<&Path>, properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut builder = config::Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AGENT")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in properties {
            builder = builder.set_override(key.as_ref(), value.into())?;
        }

        let root: ConfigRoot = builder.build()?.try_deserialize()?;
        let config = root.crawler;
        config.validate()?;
        Ok(config)
    }

    /// Check every property against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_count(THREADS_PROPERTY, self.threads)?;
        check_count(DELETE_THREADS_PROPERTY, self.delete_threads)?;
        check_count(EXPIRE_THREADS_PROPERTY, self.expire_threads)?;
        check_factor(LOW_WATER_FACTOR_PROPERTY, self.low_water_factor, 1.0, 1000.0)?;
        check_factor(STUFF_AMOUNT_FACTOR_PROPERTY, self.stuff_amount_factor, 0.1, 1000.0)?;

        if self.delete_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "Delete batch size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_count(key: &'static str, value: usize) -> Result<(), ConfigError> {
    if (1..=MAX_THREADS).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key,
            value: value.to_string(),
            min: "1".to_string(),
            max: MAX_THREADS.to_string(),
        })
    }
}

fn check_factor(key: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    // NaN fails the range check too
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        })
    }
}
