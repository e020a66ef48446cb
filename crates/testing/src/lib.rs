//! Testing utilities for the crawler agent
//!
//! This crate provides:
//! - An in-memory job store with call counting and failure injection
//! - Scripted repository and output connectors, and a registry over them
//! - Recording activity logger and configuration store
//! - Builders and randomized fixtures
//!
//! # Examples
//!
//! ```
//! use crawler_domain::ports::JobStore;
//! use crawler_testing::{InMemoryJobStore, JobBuilder};
//!
//! let store = InMemoryJobStore::new();
//! store.insert_job(JobBuilder::new(1).build());
//! store.insert_pending(crawler_domain::JobId(1), "http://example.com/");
//!
//! let batch = store.get_next_documents(10, 0).unwrap();
//! assert_eq!(batch.documents.len(), 1);
//! ```

pub mod builders;
pub mod connectors;
pub mod fixtures;
pub mod mocks;
pub mod store;

// Re-export commonly used types
pub use builders::*;
pub use connectors::*;
pub use fixtures::*;
pub use mocks::*;
pub use store::*;

// Re-export testing dependencies for convenience
pub use fake;
pub use proptest;
