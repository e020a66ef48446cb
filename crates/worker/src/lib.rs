//! Crawler Agent
//!
//! The job-scheduling engine of a crawler: it pulls due documents from the
//! job store into memory, hands them to connectors on a pool of threads,
//! and writes the outcomes back.
//!
//! This crate provides:
//! - Fair, throttle-aware document prioritization across hosts
//! - Bounded in-memory queues with low-water refill signalling
//! - Worker, delete and expire thread pools fed by stuffer threads
//! - Seeding, job state and idle cleanup housekeeping threads
//! - A reset rendezvous that recovers thread groups after a lost store connection
//! - Configuration export and import as a zip archive

pub mod activity;
pub mod agent;
pub mod carrydown;
pub mod interrupt;
pub mod maintenance;
pub mod metrics;
pub mod queue;
pub mod reset;
pub mod runtime;
pub mod services;
pub mod stuffer;
pub mod tracker;
pub mod workers;

pub use agent::{export_configuration, import_configuration, Agent, ExportError};
pub use interrupt::InterruptToken;
pub use metrics::{AgentMetrics, MetricsSnapshot};
pub use runtime::{AgentLoop, FatalHook, LoopContext};
pub use services::AgentServices;
pub use tracker::QueueTracker;
