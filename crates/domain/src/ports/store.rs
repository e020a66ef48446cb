//! Job store contract.
//!
//! The store is the single source of truth for job and document state. Every
//! method is expected to be transactional and safe to call from many threads
//! (and many agent processes) at once.

use crate::document::{DocumentAction, DocumentDescription};
use crate::errors::StoreError;
use crate::identifiers::JobId;
use crate::job::{JobDescription, JobSeedingRecord};

pub type StoreResult<T> = Result<T, StoreError>;

/// Documents handed to the document stuffer plus the queue-depth priorities
/// the store observed while selecting them.
#[derive(Debug, Clone, Default)]
pub struct StuffingBatch {
    pub documents: Vec<DocumentDescription>,
    /// Priority of the first unselected document per bin
    pub depth_priorities: Vec<f64>,
}

/// A document whose expiration time has come due.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredDocument {
    pub description: DocumentDescription,
    /// False when the document was never indexed and only the queue row needs removing
    pub should_be_removed_from_index: bool,
}

pub trait JobStore: Send + Sync {
    /// Bring in-flight state left behind by a previous process back to a runnable state.
    fn prepare_for_start(&self) -> StoreResult<()>;

    fn load_job(&self, job_id: JobId) -> StoreResult<JobDescription>;

    fn check_job_active(&self, job_id: JobId) -> StoreResult<bool>;

    /// Abort a job because of an error. Returns false if an abort was already recorded.
    fn error_abort(&self, job_id: JobId, message: &str) -> StoreResult<bool>;

    /// Largest number of ids that fit in one query
    fn max_in_clause(&self) -> usize;

    // Stuffing

    fn get_next_documents(&self, max: usize, current_time: i64) -> StoreResult<StuffingBatch>;

    fn get_next_deletable_documents(
        &self,
        max: usize,
        current_time: i64,
    ) -> StoreResult<Vec<DocumentDescription>>;

    fn get_next_expired_documents(
        &self,
        max: usize,
        current_time: i64,
    ) -> StoreResult<Vec<ExpiredDocument>>;

    // Document outcomes

    /// Finish processed documents; returns the documents whose carrydown data changed.
    fn finish_documents(
        &self,
        job_id: JobId,
        documents: &[DocumentDescription],
    ) -> StoreResult<Vec<DocumentDescription>>;

    fn mark_document_completed_multiple(&self, documents: &[DocumentDescription]) -> StoreResult<()>;

    /// Schedule documents of a continuous job for their next check.
    fn requeue_document_multiple(
        &self,
        documents: &[DocumentDescription],
        recheck_times: &[Option<i64>],
        actions: &[DocumentAction],
    ) -> StoreResult<()>;

    /// Return documents to a pending state to be retried at `retry_time`.
    fn reset_document_multiple(
        &self,
        documents: &[DocumentDescription],
        retry_time: i64,
        action: DocumentAction,
        fail_time: Option<i64>,
        fail_retry_count: Option<u32>,
    ) -> StoreResult<()>;

    fn reset_document(
        &self,
        document: &DocumentDescription,
        retry_time: i64,
        action: DocumentAction,
        fail_time: Option<i64>,
        fail_retry_count: Option<u32>,
    ) -> StoreResult<()> {
        self.reset_document_multiple(
            std::slice::from_ref(document),
            retry_time,
            action,
            fail_time,
            fail_retry_count,
        )
    }

    /// Documents the connector reported gone; returns carrydown requeue candidates.
    fn mark_document_deleted_multiple(
        &self,
        job_id: JobId,
        documents: &[DocumentDescription],
    ) -> StoreResult<Vec<DocumentDescription>>;

    /// Expired document removed; returns carrydown requeue candidates.
    fn mark_document_expired(
        &self,
        job_id: JobId,
        document: &DocumentDescription,
    ) -> StoreResult<Vec<DocumentDescription>>;

    /// Forget documents whose index entries were deleted.
    fn delete_ingested_document_identifiers(&self, documents: &[DocumentDescription]) -> StoreResult<()>;

    /// Put a document claimed for deletion back so another pass can pick it up.
    fn reset_deleting_document(&self, document: &DocumentDescription) -> StoreResult<()>;

    // Priorities

    /// Requeue documents whose carrydown data changed. Returns, per document,
    /// whether the supplied priority was written.
    fn carrydown_change_document_multiple(
        &self,
        documents: &[DocumentDescription],
        current_time: i64,
        priorities: &[f64],
    ) -> StoreResult<Vec<bool>>;

    fn get_next_not_yet_processed_reprioritization_documents(
        &self,
        current_time: i64,
        max: usize,
    ) -> StoreResult<Vec<DocumentDescription>>;

    fn write_document_priorities(
        &self,
        current_time: i64,
        documents: &[DocumentDescription],
        priorities: &[f64],
    ) -> StoreResult<()>;

    // Recovery after a database connection reset

    fn reset_document_worker_status(&self) -> StoreResult<()>;

    fn reset_document_delete_worker_status(&self) -> StoreResult<()>;

    fn reset_seeding_worker_status(&self) -> StoreResult<()>;

    // Job lifecycle

    /// Jobs that finished aborting, pausing or shutting down.
    fn finish_job_stops(&self, current_time: i64) -> StoreResult<Vec<JobDescription>>;

    fn finish_job_resumes(&self, current_time: i64) -> StoreResult<Vec<JobDescription>>;

    /// Jobs whose work is complete; they are returned to inactive.
    fn reset_jobs(&self, current_time: i64) -> StoreResult<Vec<JobDescription>>;

    // Seeding

    fn get_jobs_ready_for_seeding(&self, current_time: i64) -> StoreResult<Vec<JobSeedingRecord>>;

    fn note_job_seeded(&self, job_id: JobId, seed_time: i64) -> StoreResult<()>;

    fn retry_seeding(
        &self,
        record: &JobSeedingRecord,
        fail_time: Option<i64>,
        fail_retry_count: Option<u32>,
    ) -> StoreResult<()>;

    /// Take a job out of the seeding state without recording a seed.
    fn reset_seed_job(&self, job_id: JobId) -> StoreResult<()>;

    fn add_documents_initial(
        &self,
        job_id: JobId,
        document_hashes: &[String],
        document_identifiers: &[String],
        priorities: &[f64],
    ) -> StoreResult<()>;

    /// Seeds that exist but need no queueing; keeps them from being purged at
    /// the end of seeding.
    fn add_remaining_documents_initial(&self, job_id: JobId, document_hashes: &[String]) -> StoreResult<()>;

    fn done_documents_initial(&self, job_id: JobId, is_partial: bool) -> StoreResult<()>;
}
