//! Crawler Agent Domain Types
//!
//! Core types shared by the scheduling engine and its collaborators.
//!
//! ## Modules
//!
//! - **identifiers**: document and job ids
//! - **document**: document descriptions and queue actions
//! - **job**: job descriptions, seeding records, repository connections
//! - **activity**: audit-trail records
//! - **errors**: the agent error taxonomy and collaborator errors
//! - **ports**: job store, connector, activity logger and configuration store traits
//!
//! ## Usage
//!
//! ```rust
//! use crawler_domain::{DocumentDescription, JobId};
//!
//! let doc = DocumentDescription::new(JobId(1), "http://example.com/");
//! assert_eq!(doc.document_identifier_hash.len(), 64);
//! ```

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod activity;
pub mod document;
pub mod errors;
pub mod identifiers;
pub mod job;
pub mod ports;

pub use activity::ActivityRecord;
pub use document::{DocumentAction, DocumentDescription, DEFAULT_BIN};
pub use errors::{AgentError, AgentResult, ConnectorError, ServiceInterruption, StoreError};
pub use identifiers::*;
pub use job::{
    JobDescription, JobSeedingRecord, JobStatus, JobType, RepositoryConnection, StartMethod,
    ThrottleSpec,
};
