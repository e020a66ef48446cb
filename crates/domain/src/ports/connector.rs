//! Connector contracts.
//!
//! Connectors are the only code that talks to external repositories and
//! ingestion endpoints. The agent hands them documents and callback objects;
//! it never knows their protocols.

use crate::activity::ActivityRecord;
use crate::document::DocumentDescription;
use crate::errors::{ConnectorError, StoreError};
use crate::job::{JobDescription, JobType, RepositoryConnection};
use indexmap::IndexMap;
use std::sync::Arc;

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Callbacks available to a repository connector while processing a batch.
pub trait ProcessActivity {
    /// The document no longer exists in the repository.
    fn delete_document(&mut self, document_identifier: &str);

    /// Processing could not finish for sequencing reasons; rescan as soon as possible.
    fn abort_document(&mut self, document_identifier: &str);

    fn record_activity(&mut self, record: ActivityRecord);

    /// Fails with a job-inactive service interruption once the job stops.
    fn check_job_still_active(&mut self) -> ConnectorResult<()>;
}

/// Callbacks available to a repository connector while enumerating seeds.
pub trait SeedActivity {
    fn add_seed_document(&mut self, document_identifier: &str) -> Result<(), StoreError>;

    /// A seed that already exists and must be kept but not queued.
    fn add_unqueued_seed_document(&mut self, document_identifier: &str) -> Result<(), StoreError>;

    fn record_activity(&mut self, record: ActivityRecord);

    fn check_job_still_active(&mut self) -> ConnectorResult<()>;
}

pub trait RepositoryConnector: Send + Sync {
    /// Fairness bins for a document, e.g. its host name.
    fn bin_names(&self, document_identifier: &str) -> Vec<String>;

    /// Largest number of documents the connector accepts per processing call.
    fn max_document_request(&self) -> usize {
        1
    }

    /// Partial connectors only report changed seeds, so unseen documents must not be purged.
    fn is_partial_seeding(&self) -> bool {
        false
    }

    fn add_seed_documents(
        &self,
        activity: &mut dyn SeedActivity,
        specification: &IndexMap<String, String>,
        last_sync_time: i64,
        current_time: i64,
        job_type: JobType,
    ) -> ConnectorResult<()>;

    fn process_documents(
        &self,
        documents: &[DocumentDescription],
        job: &JobDescription,
        activity: &mut dyn ProcessActivity,
    ) -> ConnectorResult<()>;

    /// Release idle resources.
    fn poll(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

pub trait OutputConnector: Send + Sync {
    /// Remove documents of one document class (the repository connection
    /// name) from the index in one call.
    fn delete_documents(
        &self,
        document_class: &str,
        document_hashes: &[String],
    ) -> ConnectorResult<Vec<ActivityRecord>>;

    fn poll(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

/// Lookup of connections and pooled connector instances.
pub trait ConnectorRegistry: Send + Sync {
    fn repository_connection(&self, name: &str) -> ConnectorResult<RepositoryConnection>;

    fn repository_connector(&self, connection_name: &str) -> ConnectorResult<Arc<dyn RepositoryConnector>>;

    fn output_connector(&self, connection_name: &str) -> ConnectorResult<Arc<dyn OutputConnector>>;

    /// Give every pooled connector a chance to release idle resources.
    fn poll_all(&self) -> ConnectorResult<()>;

    /// Release every connector. Called once all threads have exited.
    fn close_all(&self);
}
