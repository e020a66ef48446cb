//! The delete worker: removes documents that left their jobs from the
//! output index.

use super::{log_activities, ClaimedBatch};
use crate::queue::{DeleteQueuedDocument, DeleteSet, DocumentDeleteQueue};
use crate::runtime::AgentLoop;
use crate::services::AgentServices;
use crawler_common::datetime::until_millis;
use crawler_common::now_millis;
use crawler_domain::ports::JobStore;
use crawler_domain::{AgentResult, ConnectorError, DocumentDescription};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct DeleteWorker {
    name: String,
    services: AgentServices,
    queue: Arc<DocumentDeleteQueue>,
}

impl DeleteWorker {
    pub fn new(index: usize, services: AgentServices, queue: Arc<DocumentDeleteQueue>) -> Self {
        Self {
            name: format!("delete-worker-{index}"),
            services,
            queue,
        }
    }

    fn process_set(&self, set: DeleteSet<DeleteQueuedDocument>) -> AgentResult<()> {
        let store: &dyn JobStore = self.services.store.as_ref();
        let mut batch = ClaimedBatch::new(set.documents, |document: &DeleteQueuedDocument| {
            if let Err(err) = store.reset_deleting_document(&document.description) {
                error!(
                    document = %document.description.document_identifier,
                    error = %err,
                    "Failed to release document claimed for deletion"
                );
            }
        });
        self.services.interrupt.check()?;

        // One output call per repository connection and output
        let mut groups: IndexMap<(String, String), Vec<usize>> = IndexMap::new();
        for (index, document) in batch.items().iter().enumerate() {
            let key = (
                document.job.connection_name.clone(),
                document.job.output_connection_name.clone(),
            );
            groups.entry(key).or_default().push(index);
        }

        for ((connection_name, output_name), indexes) in groups {
            let documents: Vec<DocumentDescription> = indexes
                .iter()
                .map(|&i| batch.items()[i].description.clone())
                .collect();
            let hashes: Vec<String> = documents
                .iter()
                .map(|dd| dd.document_identifier_hash.clone())
                .collect();

            let output = self.services.connectors.output_connector(&output_name)?;
            match output.delete_documents(&connection_name, &hashes) {
                Ok(records) => log_activities(self.services.activity_logger.as_ref(), records),
                Err(ConnectorError::ServiceInterruption(si)) => {
                    let wait = until_millis(si.retry_at, now_millis())
                        .unwrap_or_else(|| self.services.intervals.delete_interruption_fallback());
                    warn!(
                        output = %output_name,
                        interruption = %si,
                        wait_ms = wait.as_millis() as u64,
                        "Service interruption deleting documents, waiting before retry"
                    );
                    self.services.interrupt.sleep(wait)?;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            store.delete_ingested_document_identifiers(&documents)?;
            batch.mark_all_processed(&indexes);
            self.services.metrics.add_documents_deleted(indexes.len());
            debug!(
                connection = %connection_name,
                output = %output_name,
                count = indexes.len(),
                "Deleted documents from index"
            );
        }
        Ok(())
    }
}

impl AgentLoop for DeleteWorker {
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
