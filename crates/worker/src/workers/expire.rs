//! The expire worker: retires documents of continuous jobs whose
//! expiration time has passed.

use super::{log_activities, ClaimedBatch};
use crate::carrydown::requeue_documents_due_to_carrydown;
use crate::queue::{CleanupQueuedDocument, DeleteSet, DocumentCleanupQueue};
use crate::runtime::AgentLoop;
use crate::services::AgentServices;
use crawler_common::now_millis;
use crawler_domain::ports::JobStore;
use crawler_domain::{AgentError, AgentResult, ConnectorError, DocumentAction, JobDescription};
use std::sync::Arc;
use tracing::{error, warn};

pub struct ExpireWorker {
    name: String,
    services: AgentServices,
    queue: Arc<DocumentCleanupQueue>,
}

impl ExpireWorker {
    pub fn new(index: usize, services: AgentServices, queue: Arc<DocumentCleanupQueue>) -> Self {
        Self {
            name: format!("expire-worker-{index}"),
            services,
            queue,
        }
    }

    fn expire<R: FnMut(&CleanupQueuedDocument)>(
        &self,
        batch: &mut ClaimedBatch<CleanupQueuedDocument, R>,
        job: &JobDescription,
    ) -> AgentResult<()> {
        let store = self.services.store.as_ref();
        let connectors = &self.services.connectors;
        let connection = connectors.repository_connection(&job.connection_name)?;
        // Bins for carrydown requeues fall back to the default bin
        let connector = connectors.repository_connector(&job.connection_name).ok();

        let (flagged, mut expire_now): (Vec<usize>, Vec<usize>) =
            (0..batch.len()).partition(|&i| batch.items()[i].should_be_removed_from_index);

        if !flagged.is_empty() {
            let hashes: Vec<String> = flagged
                .iter()
                .map(|&i| batch.items()[i].description.document_identifier_hash.clone())
                .collect();
            let output = connectors.output_connector(&job.output_connection_name)?;
            match output.delete_documents(&job.connection_name, &hashes) {
                Ok(records) => {
                    log_activities(self.services.activity_logger.as_ref(), records);
                    expire_now.extend(&flagged);
                    expire_now.sort_unstable();
                }
                Err(ConnectorError::ServiceInterruption(si)) => {
                    warn!(job_id = %job.id, interruption = %si, "Service interruption expiring documents");
                    for &index in &flagged {
                        let dd = &batch.items()[index].description;
                        if si.is_hard_failure(dd.fail_time, dd.fail_retry_count) {
                            if si.abort_on_fail {
                                return Err(AgentError::Unexpected(format!(
                                    "Repeated service interruptions - failure expiring document: {}",
                                    si.message
                                )));
                            }
                            // Left for the batch guard to put back
                            continue;
                        }
                        store.reset_document(
                            dd,
                            si.retry_at,
                            DocumentAction::Remove,
                            si.next_fail_time(dd.fail_time),
                            si.next_retry_budget(dd.fail_retry_count),
                        )?;
                        batch.mark_processed(index);
                        self.services.metrics.add_documents_requeued(1);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        let now = now_millis();
        for index in expire_now {
            let dd = batch.items()[index].description.clone();
            let candidates = store.mark_document_expired(job.id, &dd)?;
            requeue_documents_due_to_carrydown(
                store,
                &candidates,
                connector.as_deref(),
                &connection,
                &self.services.tracker,
                now,
            )?;
            batch.mark_processed(index);
            self.services.metrics.add_documents_expired(1);
        }
        Ok(())
    }

    fn process_set(&self, set: DeleteSet<CleanupQueuedDocument>) -> AgentResult<()> {
        let store: &dyn JobStore = self.services.store.as_ref();
        let mut batch = ClaimedBatch::new(set.documents, |document: &CleanupQueuedDocument| {
            if let Err(err) =
                store.reset_document(&document.description, 0, DocumentAction::Remove, None, None)
            {
                error!(
                    document = %document.description.document_identifier,
                    error = %err,
                    "Failed to requeue unexpired document"
                );
            }
        });
        self.services.interrupt.check()?;

        let Some(job) = batch.items().first().map(|d| d.job.clone()) else {
            return Ok(());
        };

        match self.expire(&mut batch, &job) {
            Ok(()) => Ok(()),
            Err(err) if err.must_propagate() => Err(err),
            Err(AgentError::RepositoryConnection(message)) => {
                // Unprocessed documents go back for a later attempt
                warn!(job_id = %job.id, error = %message, "Connection unavailable, expiration postponed");
                Ok(())
            }
            Err(err) => {
                if store.error_abort(job.id, &err.to_string())? {
                    error!(job_id = %job.id, error = %err, "Expiration failed, aborting job");
                }
                Ok(())
            }
        }
    }
}

impl AgentLoop for ExpireWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_once(&mut self) -> AgentResult<()> {
        match self.queue.get_documents()? {
            Some(set) => self.process_set(set),
            None => Ok(()),
        }
    }
}
