//! Activity recording and the callback objects handed to connectors.

use crate::tracker::QueueTracker;
use crawler_common::now_millis;
use crawler_domain::document::hash_identifier;
use crawler_domain::ports::{
    ActivityLogger, ConnectorResult, JobStore, ProcessActivity, RepositoryConnector, SeedActivity,
};
use crawler_domain::{ActivityRecord, JobId, RepositoryConnection, ServiceInterruption, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Seeds written to the store per call
pub const SEED_BATCH_SIZE: usize = 100;

/// Activity logger that writes records to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivityLogger;

impl ActivityLogger for TracingActivityLogger {
    fn record_activity(&self, record: ActivityRecord) {
        info!(
            target: "crawler::activity",
            connection = %record.connection_name,
            activity = %record.activity_type,
            entity = %record.entity_uri,
            start_time = record.start_time,
            data_size = record.data_size,
            result_code = record.result_code.as_deref(),
            result_description = record.result_description.as_deref(),
            "Activity"
        );
    }
}

fn job_inactive() -> ServiceInterruption {
    ServiceInterruption::job_inactive(now_millis())
}

/// Collects what a repository connector reports while processing one batch.
pub struct ProcessingActivity {
    job_id: JobId,
    store: Arc<dyn JobStore>,
    logger: Arc<dyn ActivityLogger>,
    deleted: HashSet<String>,
    aborted: HashSet<String>,
}

impl ProcessingActivity {
    pub fn new(job_id: JobId, store: Arc<dyn JobStore>, logger: Arc<dyn ActivityLogger>) -> Self {
        Self {
            job_id,
            store,
            logger,
            deleted: HashSet::new(),
            aborted: HashSet::new(),
        }
    }

    pub fn was_deleted(&self, document_identifier: &str) -> bool {
        self.deleted.contains(document_identifier)
    }

    pub fn was_aborted(&self, document_identifier: &str) -> bool {
        self.aborted.contains(document_identifier)
    }
}

impl ProcessActivity for ProcessingActivity {
    fn delete_document(&mut self, document_identifier: &str) {
        self.deleted.insert(document_identifier.to_string());
    }

    fn abort_document(&mut self, document_identifier: &str) {
        self.aborted.insert(document_identifier.to_string());
    }

    fn record_activity(&mut self, record: ActivityRecord) {
        self.logger.record_activity(record);
    }

    fn check_job_still_active(&mut self) -> ConnectorResult<()> {
        if self.store.check_job_active(self.job_id)? {
            Ok(())
        } else {
            Err(job_inactive().into())
        }
    }
}

/// Buffers seeds reported by a connector and writes them to the store in
/// batches, prioritized by the queue tracker.
pub struct SeedingActivity {
    job_id: JobId,
    store: Arc<dyn JobStore>,
    tracker: Arc<QueueTracker>,
    connector: Arc<dyn RepositoryConnector>,
    connection: Arc<RepositoryConnection>,
    logger: Arc<dyn ActivityLogger>,
    seeds: Vec<String>,
    unqueued_hashes: Vec<String>,
}

impl SeedingActivity {
    pub fn new(
        job_id: JobId,
        store: Arc<dyn JobStore>,
        tracker: Arc<QueueTracker>,
        connector: Arc<dyn RepositoryConnector>,
        connection: Arc<RepositoryConnection>,
        logger: Arc<dyn ActivityLogger>,
    ) -> Self {
        Self {
            job_id,
            store,
            tracker,
            connector,
            connection,
            logger,
            seeds: Vec::with_capacity(SEED_BATCH_SIZE),
            unqueued_hashes: Vec::with_capacity(SEED_BATCH_SIZE),
        }
    }

    fn write_seeds(&mut self) -> Result<(), StoreError> {
        if self.seeds.is_empty() {
            return Ok(());
        }
        let identifiers = std::mem::take(&mut self.seeds);
        let hashes: Vec<String> = identifiers.iter().map(|id| hash_identifier(id)).collect();
        let priorities: Vec<f64> = identifiers
            .iter()
            .map(|id| {
                let bins = self.connector.bin_names(id);
                self.tracker.calculate_priority(&bins, &self.connection)
            })
            .collect();
        self.store
            .add_documents_initial(self.job_id, &hashes, &identifiers, &priorities)
    }

    fn write_unqueued(&mut self) -> Result<(), StoreError> {
        if self.unqueued_hashes.is_empty() {
            return Ok(());
        }
        let hashes = std::mem::take(&mut self.unqueued_hashes);
        self.store.add_remaining_documents_initial(self.job_id, &hashes)
    }

    /// Flush buffered seeds and tell the store seeding finished.
    pub fn done_seeding(&mut self, is_partial: bool) -> Result<(), StoreError> {
        self.write_seeds()?;
        self.write_unqueued()?;
        self.store.done_documents_initial(self.job_id, is_partial)
    }
}

impl SeedActivity for SeedingActivity {
    fn add_seed_document(&mut self, document_identifier: &str) -> Result<(), StoreError> {
        if self.seeds.len() >= SEED_BATCH_SIZE {
            self.write_seeds()?;
        }
        self.seeds.push(document_identifier.to_string());
        Ok(())
    }

    fn add_unqueued_seed_document(&mut self, document_identifier: &str) -> Result<(), StoreError> {
        if self.unqueued_hashes.len() >= SEED_BATCH_SIZE {
            self.write_unqueued()?;
        }
        self.unqueued_hashes.push(hash_identifier(document_identifier));
        Ok(())
    }

    fn record_activity(&mut self, record: ActivityRecord) {
        self.logger.record_activity(record);
    }

    fn check_job_still_active(&mut self) -> ConnectorResult<()> {
        if self.store.check_job_active(self.job_id)? {
            Ok(())
        } else {
            Err(job_inactive().into())
        }
    }
}
