//! The document worker: hands claimed documents to the repository
//! connector and records the outcome of each one.

use super::{log_activities, ClaimedBatch};
use crate::activity::ProcessingActivity;
use crate::carrydown::requeue_documents_due_to_carrydown;
use crate::queue::{DocumentQueue, DocumentSet, QueuedDocument};
use crate::runtime::AgentLoop;
use crate::services::AgentServices;
use crate::tracker::QueueTracker;
use crawler_common::now_millis;
use crawler_domain::ports::{JobStore, RepositoryConnector};
use crawler_domain::{
    AgentError, AgentResult, ConnectorError, DocumentAction, DocumentDescription, JobDescription,
    JobType, RepositoryConnection, ServiceInterruption,
};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Next check of a finished document in a continuous job: a rescan after
/// the rescan interval or a removal after the expiration interval,
/// whichever comes first. Ties rescan; no interval at all means never.
pub fn recheck_schedule(job: &JobDescription, now: i64) -> (Option<i64>, DocumentAction) {
    let rescan = job.rescan_interval_ms.map(|interval| now + interval);
    let expire = job.expiration_interval_ms.map(|interval| now + interval);
    match (rescan, expire) {
        (_, None) => (rescan, DocumentAction::Rescan),
        (None, Some(expire)) => (Some(expire), DocumentAction::Remove),
        (Some(rescan), Some(expire)) if expire < rescan => (Some(expire), DocumentAction::Remove),
        (Some(rescan), Some(_)) => (Some(rescan), DocumentAction::Rescan),
    }
}

/// Marks documents active in the tracker; ends on drop.
struct ActiveDocuments<'a> {
    tracker: &'a QueueTracker,
    bins: Vec<&'a [String]>,
}

impl<'a> ActiveDocuments<'a> {
    fn begin(tracker: &'a QueueTracker, documents: &'a [QueuedDocument]) -> Self {
        let bins: Vec<&[String]> = documents.iter().map(|d| d.bin_names.as_slice()).collect();
        for bin_names in &bins {
            tracker.begin_processing(bin_names);
        }
        Self { tracker, bins }
    }
}

impl Drop for ActiveDocuments<'_> {
    fn drop(&mut self) {
        for bin_names in &self.bins {
            self.tracker.end_processing(bin_names);
        }
    }
}

/// Where each document of a batch goes after the connector call.
#[derive(Debug, Default)]
struct Disposition {
    finish: Vec<usize>,
    delete: Vec<usize>,
    /// Requeued after a service interruption, keyed by the failure state to store
    requeue: IndexMap<(Option<i64>, Option<u32>), Vec<usize>>,
    /// Hard failures of an interruption that aborts the job
    rescan: Vec<usize>,
}

impl Disposition {
    fn requeue_count(&self) -> usize {
        self.requeue.values().map(Vec::len).sum()
    }
}

pub struct DocumentWorker {
    name: String,
    services: AgentServices,
    queue: Arc<DocumentQueue>,
}

impl DocumentWorker {
    pub fn new(index: usize, services: AgentServices, queue: Arc<DocumentQueue>) -> Self {
        Self {
            name: format!("worker-{index}"),
            services,
            queue,
        }
    }

    fn descriptions(documents: &[QueuedDocument], indexes: &[usize]) -> Vec<DocumentDescription> {
        indexes
            .iter()
            .map(|&i| documents[i].description.clone())
            .collect()
    }

    fn classify(
        documents: &[QueuedDocument],
        activity: &ProcessingActivity,
        interruption: Option<&ServiceInterruption>,
    ) -> Disposition {
        let mut disposition = Disposition::default();
        for (index, document) in documents.iter().enumerate() {
            let dd = &document.description;
            if activity.was_aborted(&dd.document_identifier) {
                disposition.finish.push(index);
            } else if activity.was_deleted(&dd.document_identifier) {
                disposition.delete.push(index);
            } else if let Some(si) = interruption {
                if si.is_hard_failure(dd.fail_time, dd.fail_retry_count) {
                    if si.abort_on_fail {
                        disposition.rescan.push(index);
                    } else {
                        disposition.delete.push(index);
                    }
                } else {
                    let key = (
                        si.next_fail_time(dd.fail_time),
                        si.next_retry_budget(dd.fail_retry_count),
                    );
                    disposition.requeue.entry(key).or_default().push(index);
                }
            } else {
                disposition.finish.push(index);
            }
        }
        disposition
    }

    /// Complete the finish list: drop stale carrydown data, then either
    /// schedule the next check (continuous jobs) or mark completed.
    fn finish_documents<R: FnMut(&QueuedDocument)>(
        &self,
        batch: &mut ClaimedBatch<QueuedDocument, R>,
        indexes: &[usize],
        activity: &ProcessingActivity,
        job: &JobDescription,
        connection: &RepositoryConnection,
        connector: &dyn RepositoryConnector,
    ) -> AgentResult<()> {
        if indexes.is_empty() {
            return Ok(());
        }
        let store = self.services.store.as_ref();
        let now = now_millis();
        let documents = Self::descriptions(batch.items(), indexes);

        let candidates = store.finish_documents(job.id, &documents)?;
        requeue_documents_due_to_carrydown(
            store,
            &candidates,
            Some(connector),
            connection,
            &self.services.tracker,
            now,
        )?;

        match job.job_type {
            JobType::Continuous => {
                let (recheck_times, actions): (Vec<_>, Vec<_>) = documents
                    .iter()
                    .map(|dd| {
                        if activity.was_aborted(&dd.document_identifier) {
                            (Some(0), DocumentAction::Rescan)
                        } else {
                            recheck_schedule(job, now)
                        }
                    })
                    .unzip();
                store.requeue_document_multiple(&documents, &recheck_times, &actions)?;
            }
            JobType::Specified => {
                let (aborted, completed): (Vec<_>, Vec<_>) = documents
                    .into_iter()
                    .partition(|dd| activity.was_aborted(&dd.document_identifier));
                if !aborted.is_empty() {
                    let times = vec![Some(0); aborted.len()];
                    let actions = vec![DocumentAction::Rescan; aborted.len()];
                    store.requeue_document_multiple(&aborted, &times, &actions)?;
                }
                if !completed.is_empty() {
                    store.mark_document_completed_multiple(&completed)?;
                }
            }
        }

        batch.mark_all_processed(indexes);
        self.services.metrics.add_documents_completed(indexes.len());
        Ok(())
    }

    /// Remove documents from the job's output, then from the job queue.
    /// A service interruption from the output leaves them unprocessed.
    fn delete_documents<R: FnMut(&QueuedDocument)>(
        &self,
        batch: &mut ClaimedBatch<QueuedDocument, R>,
        indexes: &[usize],
        job: &JobDescription,
        connection: &RepositoryConnection,
        connector: &dyn RepositoryConnector,
    ) -> AgentResult<()> {
        if indexes.is_empty() {
            return Ok(());
        }
        let store = self.services.store.as_ref();
        let documents = Self::descriptions(batch.items(), indexes);
        let hashes: Vec<String> = documents
            .iter()
            .map(|dd| dd.document_identifier_hash.clone())
            .collect();

        let output = self
            .services
            .connectors
            .output_connector(&job.output_connection_name)?;
        match output.delete_documents(&connection.name, &hashes) {
            Ok(records) => log_activities(self.services.activity_logger.as_ref(), records),
            Err(ConnectorError::ServiceInterruption(si)) => {
                warn!(
                    job_id = %job.id,
                    output = %job.output_connection_name,
                    interruption = %si,
                    "Service interruption removing documents from index"
                );
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        let candidates = store.mark_document_deleted_multiple(job.id, &documents)?;
        requeue_documents_due_to_carrydown(
            store,
            &candidates,
            Some(connector),
            connection,
            &self.services.tracker,
            now_millis(),
        )?;
        batch.mark_all_processed(indexes);
        self.services.metrics.add_documents_deleted(indexes.len());
        Ok(())
    }

    fn process_set(&self, set: DocumentSet) -> AgentResult<()> {
        let DocumentSet {
            job,
            connection,
            documents,
        } = set;
        let store: &dyn JobStore = self.services.store.as_ref();
        let tracker = self.services.tracker.as_ref();

        let mut batch = ClaimedBatch::new(documents, |document: &QueuedDocument| {
            if let Err(err) =
                store.reset_document(&document.description, 0, DocumentAction::Rescan, None, None)
            {
                error!(
                    document = %document.description.document_identifier,
                    error = %err,
                    "Failed to requeue unprocessed document"
                );
            }
        });

        let active = self
            .services
            .interrupt
            .check()
            .and_then(|()| Ok(store.check_job_active(job.id)?));
        if !matches!(active, Ok(true)) {
            // Never reached a worker, so the queued records go
            for document in batch.items() {
                tracker.remove_record(&document.bin_names);
            }
            if active.is_ok() {
                debug!(job_id = %job.id, "Job no longer active, requeueing its documents");
            }
            return active.map(|_| ());
        }

        // Cloned so the tracker guard does not hold a borrow of the batch
        let queued: Vec<QueuedDocument> = batch.items().to_vec();
        let _active = ActiveDocuments::begin(tracker, &queued);
        let started = Instant::now();
        let count = batch.len();
        self.services.metrics.add_documents_processed(count);

        let connector = self
            .services
            .connectors
            .repository_connector(&job.connection_name)?;

        let descriptions: Vec<DocumentDescription> =
            queued.iter().map(|d| d.description.clone()).collect();
        let mut activity = ProcessingActivity::new(
            job.id,
            self.services.store.clone(),
            self.services.activity_logger.clone(),
        );
        let interruption = match connector.process_documents(&descriptions, &job, &mut activity) {
            Ok(()) => None,
            Err(ConnectorError::ServiceInterruption(si)) => {
                if !si.job_inactive_abort {
                    warn!(
                        job_id = %job.id,
                        connection = %job.connection_name,
                        interruption = %si,
                        "Service interruption reported"
                    );
                }
                Some(si)
            }
            Err(err) => {
                let err = AgentError::from(err);
                if err.must_propagate() {
                    return Err(err);
                }
                if let AgentError::RepositoryConnection(message) = &err {
                    warn!(job_id = %job.id, error = %message, "Repository unavailable, documents requeued");
                    return Ok(());
                }
                if store.error_abort(job.id, &err.to_string())? {
                    error!(job_id = %job.id, error = %err, "Connector failure, aborting job");
                }
                return Ok(());
            }
        };

        let disposition = Self::classify(&queued, &activity, interruption.as_ref());

        if let Some(si) = &interruption {
            for ((fail_time, budget), indexes) in &disposition.requeue {
                let documents = Self::descriptions(&queued, indexes);
                store.reset_document_multiple(
                    &documents,
                    si.retry_at,
                    DocumentAction::Rescan,
                    *fail_time,
                    *budget,
                )?;
                batch.mark_all_processed(indexes);
            }
            self.services
                .metrics
                .add_documents_requeued(disposition.requeue_count());
        }

        self.finish_documents(
            &mut batch,
            &disposition.finish,
            &activity,
            &job,
            &connection,
            connector.as_ref(),
        )?;

        let elapsed = started.elapsed();
        tracker.note_connection_performance(count, &connection.name, elapsed);
        self.services.metrics.record_batch_duration(elapsed);

        self.delete_documents(
            &mut batch,
            &disposition.delete,
            &job,
            &connection,
            connector.as_ref(),
        )?;

        if !disposition.rescan.is_empty() {
            let documents = Self::descriptions(&queued, &disposition.rescan);
            store.reset_document_multiple(&documents, 0, DocumentAction::Rescan, None, None)?;
            batch.mark_all_processed(&disposition.rescan);
            self.services
                .metrics
                .add_documents_failed(disposition.rescan.len());

            let message = interruption
                .as_ref()
                .map(|si| format!("Repeated service interruptions - failure processing document: {}", si.message))
                .unwrap_or_else(|| "Repeated service interruptions".to_string());
            if store.error_abort(job.id, &message)? {
                error!(job_id = %job.id, error = %message, "Aborting job");
            }
        } else if interruption.is_some() {
            let failed = disposition
                .delete
                .iter()
                .filter(|&&i| !activity.was_deleted(&queued[i].description.document_identifier))
                .count();
            self.services.metrics.add_documents_failed(failed);
        }

        Ok(())
    }
}

impl AgentLoop for DocumentWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_once(&mut self) -> AgentResult<()> {
        match self.queue.get_documents()? {
            Some(set) => self.process_set(set),
            // The queue was reset; go back and rendezvous
            None => Ok(()),
        }
    }
}
