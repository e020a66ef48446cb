//! Document descriptions handed between the job store, stuffers and workers.

use crate::identifiers::{DocumentId, JobId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bin assigned to documents whose connector could not be asked for bins.
pub const DEFAULT_BIN: &str = "";

/// One document instance within one job.
///
/// Produced by the job store and never mutated afterwards. The failure fields
/// are filled in by the store when the document was previously requeued
/// because of a service interruption.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentDescription {
    /// Job queue row id
    pub id: DocumentId,
    /// Owning job
    pub job_id: JobId,
    /// Connector-specific document identifier
    pub document_identifier: String,
    /// Stable hash of the identifier
    pub document_identifier_hash: String,
    /// Time (ms) beyond which a further interruption is a hard failure
    pub fail_time: Option<i64>,
    /// Remaining retries before a hard failure
    pub fail_retry_count: Option<u32>,
}

impl DocumentDescription {
    /// Describe a fresh document with no failure history.
    pub fn new(job_id: JobId, document_identifier: impl Into<String>) -> Self {
        let document_identifier = document_identifier.into();
        Self {
            id: DocumentId::new(),
            job_id,
            document_identifier_hash: hash_identifier(&document_identifier),
            document_identifier,
            fail_time: None,
            fail_retry_count: None,
        }
    }

    /// Same document with the failure fields replaced.
    pub fn with_failure(mut self, fail_time: Option<i64>, fail_retry_count: Option<u32>) -> Self {
        self.fail_time = fail_time;
        self.fail_retry_count = fail_retry_count;
        self
    }
}

/// Hash a document identifier the way the job store keys its rows.
pub fn hash_identifier(identifier: &str) -> String {
    hex::encode(Sha256::digest(identifier.as_bytes()))
}

/// What the store should do with a document when its recheck time comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentAction {
    /// Fetch and process again
    Rescan,
    /// Remove from the index
    Remove,
}
