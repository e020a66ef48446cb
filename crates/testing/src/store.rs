//! In-memory job store.
//!
//! Models just enough of the real store's document and job lifecycle for the
//! agent's threads to run against it: pending documents come due, get
//! claimed, and are finished, requeued, deleted or expired. Every call is
//! counted and any method can be made to fail on demand.

use crawler_domain::ports::{ExpiredDocument, JobStore, StoreResult, StuffingBatch};
use crawler_domain::{
    DocumentAction, DocumentDescription, DocumentId, JobDescription, JobId, JobSeedingRecord,
    JobStatus, JobType, StoreError,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Queue state of one document row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentStatus {
    /// Waiting for its check time
    Pending,
    /// Claimed by a stuffer
    Active,
    /// Processed, no recheck scheduled
    Completed,
    /// Owning job was deleted; waiting for the delete stuffer
    ReadyForDelete,
    BeingDeleted,
}

/// Snapshot of a document row.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentState {
    pub description: DocumentDescription,
    pub status: DocumentStatus,
    pub action: DocumentAction,
    pub check_time: Option<i64>,
    pub priority: Option<f64>,
    pub indexed: bool,
}

#[derive(Debug, Clone)]
struct DocumentRow {
    state: DocumentState,
    prioritized_at: Option<i64>,
}

#[derive(Debug, Clone)]
struct JobRow {
    job: JobDescription,
    needs_seeding: bool,
    seeding: bool,
    seeded: bool,
    last_seed_time: i64,
    seed_fail_time: Option<i64>,
    seed_fail_retry_count: Option<u32>,
    resume_requested: bool,
    abort_message: Option<String>,
    seen_seeds: HashSet<String>,
    last_seeding_partial: Option<bool>,
}

impl JobRow {
    fn new(job: JobDescription) -> Self {
        Self {
            job,
            needs_seeding: false,
            seeding: false,
            seeded: false,
            last_seed_time: 0,
            seed_fail_time: None,
            seed_fail_retry_count: None,
            resume_requested: false,
            abort_message: None,
            seen_seeds: HashSet::new(),
            last_seeding_partial: None,
        }
    }
}

#[derive(Default)]
struct StoreState {
    jobs: BTreeMap<JobId, JobRow>,
    documents: IndexMap<DocumentId, DocumentRow>,
    /// Parent identifier hash to the documents that carry data down from it
    carrydown_children: HashMap<String, Vec<DocumentId>>,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, VecDeque<StoreError>>,
}

impl StoreState {
    fn enter(&mut self, method: &'static str) -> StoreResult<()> {
        *self.calls.entry(method).or_default() += 1;
        match self.failures.get_mut(method).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn job_processing(&self, job_id: JobId) -> bool {
        self.jobs
            .get(&job_id)
            .is_some_and(|row| row.job.status.is_processing())
    }

    fn row_mut(&mut self, id: DocumentId) -> Option<&mut DocumentRow> {
        self.documents.get_mut(&id)
    }

    fn carrydown_candidates(&self, documents: &[DocumentDescription]) -> Vec<DocumentDescription> {
        let mut seen = HashSet::new();
        documents
            .iter()
            .filter_map(|dd| self.carrydown_children.get(&dd.document_identifier_hash))
            .flatten()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| self.documents.get(id))
            .map(|row| row.state.description.clone())
            .collect()
    }

    fn remove_documents(&mut self, documents: &[DocumentDescription]) {
        for dd in documents {
            self.documents.shift_remove(&dd.id);
        }
    }

    fn has_outstanding_documents(&self, job_id: JobId) -> bool {
        self.documents.values().any(|row| {
            row.state.description.job_id == job_id
                && matches!(row.state.status, DocumentStatus::Pending | DocumentStatus::Active)
        })
    }

    fn has_active_documents(&self, job_id: JobId) -> bool {
        self.documents.values().any(|row| {
            row.state.description.job_id == job_id && row.state.status == DocumentStatus::Active
        })
    }
}

/// Thread-safe in-memory [`JobStore`].
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
    max_in_clause: usize,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            max_in_clause: 100,
        }
    }

    pub fn with_max_in_clause(mut self, max_in_clause: usize) -> Self {
        self.max_in_clause = max_in_clause;
        self
    }

    pub fn insert_job(&self, job: JobDescription) {
        self.state.lock().jobs.insert(job.id, JobRow::new(job));
    }

    /// Make the job due for seeding.
    pub fn schedule_seeding(&self, job_id: JobId) {
        if let Some(row) = self.state.lock().jobs.get_mut(&job_id) {
            row.needs_seeding = true;
        }
    }

    pub fn set_job_status(&self, job_id: JobId, status: JobStatus) {
        if let Some(row) = self.state.lock().jobs.get_mut(&job_id) {
            row.job.status = status;
        }
    }

    /// Ask for a paused job to be resumed on the next job reset pass.
    pub fn request_resume(&self, job_id: JobId) {
        if let Some(row) = self.state.lock().jobs.get_mut(&job_id) {
            row.resume_requested = true;
        }
    }

    /// Queue a document for processing as soon as possible.
    pub fn insert_document(&self, description: DocumentDescription) -> DocumentDescription {
        self.insert_row(description, DocumentStatus::Pending, DocumentAction::Rescan, false)
    }

    /// Add a fresh pending document for `job_id`.
    pub fn insert_pending(&self, job_id: JobId, identifier: &str) -> DocumentDescription {
        self.insert_document(DocumentDescription::new(job_id, identifier))
    }

    /// Queue a document for expiration as soon as possible.
    pub fn insert_expiring(&self, description: DocumentDescription, indexed: bool) -> DocumentDescription {
        self.insert_row(description, DocumentStatus::Pending, DocumentAction::Remove, indexed)
    }

    /// Queue a document for deletion from the index.
    pub fn insert_deletable(&self, description: DocumentDescription) -> DocumentDescription {
        self.insert_row(description, DocumentStatus::ReadyForDelete, DocumentAction::Remove, true)
    }

    fn insert_row(
        &self,
        description: DocumentDescription,
        status: DocumentStatus,
        action: DocumentAction,
        indexed: bool,
    ) -> DocumentDescription {
        let row = DocumentRow {
            state: DocumentState {
                description: description.clone(),
                status,
                action,
                check_time: Some(0),
                priority: None,
                indexed,
            },
            prioritized_at: None,
        };
        self.state.lock().documents.insert(description.id, row);
        description
    }

    /// Every document of the job becomes ready for deletion.
    pub fn mark_job_for_deletion(&self, job_id: JobId) {
        let mut state = self.state.lock();
        for row in state.documents.values_mut() {
            if row.state.description.job_id == job_id {
                row.state.status = DocumentStatus::ReadyForDelete;
            }
        }
    }

    /// Record that `children` carry data down from `parent`.
    pub fn set_carrydown_children(&self, parent: &DocumentDescription, children: &[DocumentDescription]) {
        self.state.lock().carrydown_children.insert(
            parent.document_identifier_hash.clone(),
            children.iter().map(|dd| dd.id).collect(),
        );
    }

    /// Make the next call of `method` fail with `error`.
    pub fn fail_next(&self, method: &'static str, error: StoreError) {
        self.fail_times(method, error, 1);
    }

    /// Make the next `times` calls of `method` fail with `error`.
    pub fn fail_times(&self, method: &'static str, error: StoreError, times: usize) {
        let mut state = self.state.lock();
        let failures = state.failures.entry(method).or_default();
        failures.extend(std::iter::repeat(error).take(times));
    }

    /// Number of calls made to `method`.
    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    pub fn document_state(&self, id: DocumentId) -> Option<DocumentState> {
        self.state.lock().documents.get(&id).map(|row| row.state.clone())
    }

    pub fn document_status(&self, id: DocumentId) -> Option<DocumentStatus> {
        self.document_state(id).map(|state| state.status)
    }

    pub fn count_with_status(&self, status: DocumentStatus) -> usize {
        self.state
            .lock()
            .documents
            .values()
            .filter(|row| row.state.status == status)
            .count()
    }

    pub fn document_count(&self) -> usize {
        self.state.lock().documents.len()
    }

    pub fn job_status(&self, job_id: JobId) -> Option<JobStatus> {
        self.state.lock().jobs.get(&job_id).map(|row| row.job.status)
    }

    /// Message recorded by the first `error_abort` of the job.
    pub fn abort_message(&self, job_id: JobId) -> Option<String> {
        self.state
            .lock()
            .jobs
            .get(&job_id)
            .and_then(|row| row.abort_message.clone())
    }

    pub fn is_seeding(&self, job_id: JobId) -> bool {
        self.state.lock().jobs.get(&job_id).is_some_and(|row| row.seeding)
    }

    pub fn needs_seeding(&self, job_id: JobId) -> bool {
        self.state
            .lock()
            .jobs
            .get(&job_id)
            .is_some_and(|row| row.needs_seeding)
    }

    /// Failure fields stored by the last `retry_seeding`.
    pub fn seeding_failure(&self, job_id: JobId) -> (Option<i64>, Option<u32>) {
        self.state
            .lock()
            .jobs
            .get(&job_id)
            .map_or((None, None), |row| (row.seed_fail_time, row.seed_fail_retry_count))
    }

    /// Whether the last completed seeding pass was partial.
    pub fn last_seeding_partial(&self, job_id: JobId) -> Option<bool> {
        self.state
            .lock()
            .jobs
            .get(&job_id)
            .and_then(|row| row.last_seeding_partial)
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for InMemoryJobStore {
    fn prepare_for_start(&self) -> StoreResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.enter("prepare_for_start")?;
        for row in state.documents.values_mut() {
            row.state.status = match row.state.status {
                DocumentStatus::Active => DocumentStatus::Pending,
                DocumentStatus::BeingDeleted => DocumentStatus::ReadyForDelete,
                other => other,
            };
        }
        for row in state.jobs.values_mut() {
            row.seeding = false;
        }
        Ok(())
    }

    fn load_job(&self, job_id: JobId) -> StoreResult<JobDescription> {
        let mut state = self.state.lock();
        state.enter("load_job")?;
        state
            .jobs
            .get(&job_id)
            .map(|row| row.job.clone())
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))
    }

    fn check_job_active(&self, job_id: JobId) -> StoreResult<bool> {
        let mut state = self.state.lock();
        state.enter("check_job_active")?;
        Ok(state.job_processing(job_id))
    }

    fn error_abort(&self, job_id: JobId, message: &str) -> StoreResult<bool> {
        let mut state = self.state.lock();
        state.enter("error_abort")?;
        let row = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if row.abort_message.is_some() || !row.job.status.can_transition_to(JobStatus::Aborting) {
            return Ok(false);
        }
        row.job.status = JobStatus::Aborting;
        row.abort_message = Some(message.to_string());
        Ok(true)
    }

    fn max_in_clause(&self) -> usize {
        self.max_in_clause
    }

    fn get_next_documents(&self, max: usize, current_time: i64) -> StoreResult<StuffingBatch> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.enter("get_next_documents")?;

        let mut eligible: Vec<(DocumentId, f64)> = state
            .documents
            .values()
            .filter(|row| {
                row.state.status == DocumentStatus::Pending
                    && row.state.action == DocumentAction::Rescan
                    && row.state.check_time.is_some_and(|t| t <= current_time)
                    && state.job_processing(row.state.description.job_id)
            })
            .map(|row| (row.state.description.id, row.state.priority.unwrap_or(f64::MAX)))
            .collect();
        eligible.sort_by(|a, b| a.1.total_cmp(&b.1));

        let depth_priorities = eligible
            .get(max)
            .map(|(_, priority)| vec![*priority])
            .unwrap_or_default();

        let mut documents = Vec::new();
        for (id, _) in eligible.into_iter().take(max) {
            if let Some(row) = state.row_mut(id) {
                row.state.status = DocumentStatus::Active;
                documents.push(row.state.description.clone());
            }
        }
        Ok(StuffingBatch {
            documents,
            depth_priorities,
        })
    }

    fn get_next_deletable_documents(
        &self,
        max: usize,
        _current_time: i64,
    ) -> StoreResult<Vec<DocumentDescription>> {
        let mut state = self.state.lock();
        state.enter("get_next_deletable_documents")?;
        Ok(state
            .documents
            .values_mut()
            .filter(|row| row.state.status == DocumentStatus::ReadyForDelete)
            .take(max)
            .map(|row| {
                row.state.status = DocumentStatus::BeingDeleted;
                row.state.description.clone()
            })
            .collect())
    }

    fn get_next_expired_documents(
        &self,
        max: usize,
        current_time: i64,
    ) -> StoreResult<Vec<ExpiredDocument>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.enter("get_next_expired_documents")?;

        let due: Vec<DocumentId> = state
            .documents
            .values()
            .filter(|row| {
                row.state.status == DocumentStatus::Pending
                    && row.state.action == DocumentAction::Remove
                    && row.state.check_time.is_some_and(|t| t <= current_time)
                    && state.job_processing(row.state.description.job_id)
            })
            .take(max)
            .map(|row| row.state.description.id)
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for id in due {
            if let Some(row) = state.row_mut(id) {
                row.state.status = DocumentStatus::Active;
                expired.push(ExpiredDocument {
                    description: row.state.description.clone(),
                    should_be_removed_from_index: row.state.indexed,
                });
            }
        }
        Ok(expired)
    }

    fn finish_documents(
        &self,
        _job_id: JobId,
        documents: &[DocumentDescription],
    ) -> StoreResult<Vec<DocumentDescription>> {
        let mut state = self.state.lock();
        state.enter("finish_documents")?;
        for dd in documents {
            if let Some(row) = state.row_mut(dd.id) {
                row.state.indexed = true;
            }
        }
        Ok(state.carrydown_candidates(documents))
    }

    fn mark_document_completed_multiple(&self, documents: &[DocumentDescription]) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("mark_document_completed_multiple")?;
        for dd in documents {
            if let Some(row) = state.row_mut(dd.id) {
                row.state.status = DocumentStatus::Completed;
            }
        }
        Ok(())
    }

    fn requeue_document_multiple(
        &self,
        documents: &[DocumentDescription],
        recheck_times: &[Option<i64>],
        actions: &[DocumentAction],
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("requeue_document_multiple")?;
        for ((dd, time), action) in documents.iter().zip(recheck_times).zip(actions) {
            if let Some(row) = state.row_mut(dd.id) {
                row.state.status = match time {
                    Some(_) => DocumentStatus::Pending,
                    None => DocumentStatus::Completed,
                };
                row.state.check_time = *time;
                row.state.action = *action;
            }
        }
        Ok(())
    }

    fn reset_document_multiple(
        &self,
        documents: &[DocumentDescription],
        retry_time: i64,
        action: DocumentAction,
        fail_time: Option<i64>,
        fail_retry_count: Option<u32>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("reset_document_multiple")?;
        for dd in documents {
            if let Some(row) = state.row_mut(dd.id) {
                row.state.status = DocumentStatus::Pending;
                row.state.check_time = Some(retry_time);
                row.state.action = action;
                row.state.description.fail_time = fail_time;
                row.state.description.fail_retry_count = fail_retry_count;
            }
        }
        Ok(())
    }

    fn mark_document_deleted_multiple(
        &self,
        _job_id: JobId,
        documents: &[DocumentDescription],
    ) -> StoreResult<Vec<DocumentDescription>> {
        let mut state = self.state.lock();
        state.enter("mark_document_deleted_multiple")?;
        let candidates = state.carrydown_candidates(documents);
        state.remove_documents(documents);
        Ok(candidates)
    }

    fn mark_document_expired(
        &self,
        _job_id: JobId,
        document: &DocumentDescription,
    ) -> StoreResult<Vec<DocumentDescription>> {
        let mut state = self.state.lock();
        state.enter("mark_document_expired")?;
        let documents = std::slice::from_ref(document);
        let candidates = state.carrydown_candidates(documents);
        state.remove_documents(documents);
        Ok(candidates)
    }

    fn delete_ingested_document_identifiers(&self, documents: &[DocumentDescription]) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("delete_ingested_document_identifiers")?;
        state.remove_documents(documents);
        Ok(())
    }

    fn reset_deleting_document(&self, document: &DocumentDescription) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("reset_deleting_document")?;
        if let Some(row) = state.row_mut(document.id) {
            row.state.status = DocumentStatus::ReadyForDelete;
        }
        Ok(())
    }

    fn carrydown_change_document_multiple(
        &self,
        documents: &[DocumentDescription],
        current_time: i64,
        priorities: &[f64],
    ) -> StoreResult<Vec<bool>> {
        let mut state = self.state.lock();
        state.enter("carrydown_change_document_multiple")?;
        Ok(documents
            .iter()
            .zip(priorities)
            .map(|(dd, priority)| match state.row_mut(dd.id) {
                Some(row)
                    if matches!(
                        row.state.status,
                        DocumentStatus::Pending | DocumentStatus::Completed
                    ) =>
                {
                    row.state.status = DocumentStatus::Pending;
                    row.state.action = DocumentAction::Rescan;
                    row.state.check_time = Some(current_time);
                    row.state.priority = Some(*priority);
                    row.prioritized_at = Some(current_time);
                    true
                }
                _ => false,
            })
            .collect())
    }

    fn get_next_not_yet_processed_reprioritization_documents(
        &self,
        current_time: i64,
        max: usize,
    ) -> StoreResult<Vec<DocumentDescription>> {
        let mut state = self.state.lock();
        state.enter("get_next_not_yet_processed_reprioritization_documents")?;
        Ok(state
            .documents
            .values()
            .filter(|row| {
                row.state.status == DocumentStatus::Pending
                    && row.state.action == DocumentAction::Rescan
                    && row.prioritized_at != Some(current_time)
            })
            .take(max)
            .map(|row| row.state.description.clone())
            .collect())
    }

    fn write_document_priorities(
        &self,
        current_time: i64,
        documents: &[DocumentDescription],
        priorities: &[f64],
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("write_document_priorities")?;
        for (dd, priority) in documents.iter().zip(priorities) {
            if let Some(row) = state.row_mut(dd.id) {
                row.state.priority = Some(*priority);
                row.prioritized_at = Some(current_time);
            }
        }
        Ok(())
    }

    fn reset_document_worker_status(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("reset_document_worker_status")?;
        for row in state.documents.values_mut() {
            if row.state.status == DocumentStatus::Active {
                row.state.status = DocumentStatus::Pending;
            }
        }
        Ok(())
    }

    fn reset_document_delete_worker_status(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("reset_document_delete_worker_status")?;
        for row in state.documents.values_mut() {
            if row.state.status == DocumentStatus::BeingDeleted {
                row.state.status = DocumentStatus::ReadyForDelete;
            }
        }
        Ok(())
    }

    fn reset_seeding_worker_status(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("reset_seeding_worker_status")?;
        for row in state.jobs.values_mut() {
            row.seeding = false;
        }
        Ok(())
    }

    fn finish_job_stops(&self, _current_time: i64) -> StoreResult<Vec<JobDescription>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.enter("finish_job_stops")?;
        let stopping: Vec<JobId> = state
            .jobs
            .values()
            .filter(|row| matches!(row.job.status, JobStatus::Aborting | JobStatus::ShuttingDown))
            .map(|row| row.job.id)
            .filter(|id| !state.has_active_documents(*id))
            .collect();

        let mut stopped = Vec::with_capacity(stopping.len());
        for id in stopping {
            if let Some(row) = state.jobs.get_mut(&id) {
                row.job.status = JobStatus::Inactive;
                row.seeding = false;
                stopped.push(row.job.clone());
            }
        }
        Ok(stopped)
    }

    fn finish_job_resumes(&self, _current_time: i64) -> StoreResult<Vec<JobDescription>> {
        let mut state = self.state.lock();
        state.enter("finish_job_resumes")?;
        Ok(state
            .jobs
            .values_mut()
            .filter(|row| row.resume_requested)
            .map(|row| {
                row.resume_requested = false;
                row.job.status = JobStatus::Active;
                row.job.clone()
            })
            .collect())
    }

    fn reset_jobs(&self, _current_time: i64) -> StoreResult<Vec<JobDescription>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.enter("reset_jobs")?;
        let finished: Vec<JobId> = state
            .jobs
            .values()
            .filter(|row| {
                row.job.status == JobStatus::Active
                    && row.job.job_type == JobType::Specified
                    && row.seeded
                    && !row.seeding
                    && !row.needs_seeding
            })
            .map(|row| row.job.id)
            .filter(|id| !state.has_outstanding_documents(*id))
            .collect();

        let mut ended = Vec::with_capacity(finished.len());
        for id in finished {
            if let Some(row) = state.jobs.get_mut(&id) {
                row.job.status = JobStatus::Inactive;
                ended.push(row.job.clone());
            }
        }
        Ok(ended)
    }

    fn get_jobs_ready_for_seeding(&self, _current_time: i64) -> StoreResult<Vec<JobSeedingRecord>> {
        let mut state = self.state.lock();
        state.enter("get_jobs_ready_for_seeding")?;
        Ok(state
            .jobs
            .values_mut()
            .filter(|row| row.needs_seeding && !row.seeding && row.job.status == JobStatus::Active)
            .map(|row| {
                row.seeding = true;
                JobSeedingRecord::new(row.job.id, row.last_seed_time)
                    .with_failure(row.seed_fail_time, row.seed_fail_retry_count)
            })
            .collect())
    }

    fn note_job_seeded(&self, job_id: JobId, seed_time: i64) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("note_job_seeded")?;
        if let Some(row) = state.jobs.get_mut(&job_id) {
            row.needs_seeding = false;
            row.seeding = false;
            row.seeded = true;
            row.last_seed_time = seed_time;
            row.seed_fail_time = None;
            row.seed_fail_retry_count = None;
        }
        Ok(())
    }

    fn retry_seeding(
        &self,
        record: &JobSeedingRecord,
        fail_time: Option<i64>,
        fail_retry_count: Option<u32>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("retry_seeding")?;
        if let Some(row) = state.jobs.get_mut(&record.job_id) {
            row.seeding = false;
            row.seed_fail_time = fail_time;
            row.seed_fail_retry_count = fail_retry_count;
        }
        Ok(())
    }

    fn reset_seed_job(&self, job_id: JobId) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("reset_seed_job")?;
        if let Some(row) = state.jobs.get_mut(&job_id) {
            row.seeding = false;
        }
        Ok(())
    }

    fn add_documents_initial(
        &self,
        job_id: JobId,
        document_hashes: &[String],
        document_identifiers: &[String],
        priorities: &[f64],
    ) -> StoreResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.enter("add_documents_initial")?;

        for ((hash, identifier), priority) in document_hashes
            .iter()
            .zip(document_identifiers)
            .zip(priorities)
        {
            if let Some(row) = state.jobs.get_mut(&job_id) {
                row.seen_seeds.insert(hash.clone());
            }
            let existing = state.documents.values_mut().find(|row| {
                row.state.description.job_id == job_id
                    && row.state.description.document_identifier_hash == *hash
            });
            match existing {
                Some(row) => {
                    if row.state.status == DocumentStatus::Completed {
                        row.state.status = DocumentStatus::Pending;
                        row.state.action = DocumentAction::Rescan;
                        row.state.check_time = Some(0);
                        row.state.priority = Some(*priority);
                    }
                }
                None => {
                    let mut description = DocumentDescription::new(job_id, identifier.clone());
                    description.document_identifier_hash = hash.clone();
                    state.documents.insert(
                        description.id,
                        DocumentRow {
                            state: DocumentState {
                                description,
                                status: DocumentStatus::Pending,
                                action: DocumentAction::Rescan,
                                check_time: Some(0),
                                priority: Some(*priority),
                                indexed: false,
                            },
                            prioritized_at: None,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn add_remaining_documents_initial(&self, job_id: JobId, document_hashes: &[String]) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("add_remaining_documents_initial")?;
        if let Some(row) = state.jobs.get_mut(&job_id) {
            row.seen_seeds.extend(document_hashes.iter().cloned());
        }
        Ok(())
    }

    fn done_documents_initial(&self, job_id: JobId, is_partial: bool) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.enter("done_documents_initial")?;
        if let Some(row) = state.jobs.get_mut(&job_id) {
            row.seen_seeds.clear();
            row.last_seeding_partial = Some(is_partial);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::JobBuilder;

    #[test]
    fn test_claimed_documents_are_not_handed_out_twice() {
        let store = InMemoryJobStore::new();
        store.insert_job(JobBuilder::new(1).build());
        store.insert_pending(JobId(1), "http://a.example/1");
        store.insert_pending(JobId(1), "http://a.example/2");

        let first = store.get_next_documents(1, 10).unwrap();
        assert_eq!(first.documents.len(), 1);
        assert_eq!(first.depth_priorities.len(), 1);

        let second = store.get_next_documents(10, 10).unwrap();
        assert_eq!(second.documents.len(), 1);
        assert_ne!(first.documents[0].id, second.documents[0].id);
        assert!(store.get_next_documents(10, 10).unwrap().documents.is_empty());
    }

    #[test]
    fn test_injected_failure_is_returned_once() {
        let store = InMemoryJobStore::new();
        store.fail_next("get_next_documents", StoreError::Connection("gone".into()));

        assert!(matches!(
            store.get_next_documents(1, 0),
            Err(StoreError::Connection(_))
        ));
        assert!(store.get_next_documents(1, 0).is_ok());
        assert_eq!(store.calls("get_next_documents"), 2);
    }

    #[test]
    fn test_worker_status_reset_returns_claimed_documents() {
        let store = InMemoryJobStore::new();
        store.insert_job(JobBuilder::new(1).build());
        let dd = store.insert_pending(JobId(1), "http://a.example/1");
        store.get_next_documents(10, 10).unwrap();
        assert_eq!(store.document_status(dd.id), Some(DocumentStatus::Active));

        store.reset_document_worker_status().unwrap();
        assert_eq!(store.document_status(dd.id), Some(DocumentStatus::Pending));
    }

    #[test]
    fn test_error_abort_only_once() {
        let store = InMemoryJobStore::new();
        store.insert_job(JobBuilder::new(4).build());
        assert!(store.error_abort(JobId(4), "first").unwrap());
        assert!(!store.error_abort(JobId(4), "second").unwrap());
        assert_eq!(store.abort_message(JobId(4)).as_deref(), Some("first"));
        assert_eq!(store.job_status(JobId(4)), Some(JobStatus::Aborting));
    }
}
