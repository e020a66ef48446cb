use super::JobCache;
use crate::queue::{DeleteQueuedDocument, DeleteSet, DocumentDeleteQueue};
use crate::runtime::AgentLoop;
use crate::services::AgentServices;
use crawler_common::now_millis;
use crawler_domain::AgentResult;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Feeds the delete queue with documents removed from their jobs.
pub struct DeleteStuffer {
    services: AgentServices,
    queue: Arc<DocumentDeleteQueue>,
    worker_count: usize,
    batch_size: usize,
}

impl DeleteStuffer {
    pub fn new(
        services: AgentServices,
        queue: Arc<DocumentDeleteQueue>,
        worker_count: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            services,
            queue,
            worker_count,
            batch_size: batch_size.max(1),
        }
    }
}

impl AgentLoop for DeleteStuffer {
    fn name(&self) -> &str {
        "delete-stuffer"
    }

    fn run_once(&mut self) -> AgentResult<()> {
        let interrupt = &self.services.interrupt;
        let intervals = &self.services.intervals;
        let store = self.services.store.as_ref();

        if !self.queue.check_if_empty(self.worker_count) {
            return interrupt.sleep(intervals.delete_stuffer_busy());
        }

        let documents = store.get_next_deletable_documents(store.max_in_clause(), now_millis())?;
        interrupt.check()?;

        if documents.is_empty() {
            return interrupt.sleep(intervals.delete_stuffer_idle());
        }
        debug!(count = documents.len(), "Delete stuffer found documents to queue");

        let mut jobs = JobCache::new(store);
        let mut queued = Vec::with_capacity(documents.len());
        for description in documents {
            match jobs.get(description.job_id) {
                Ok(job) => queued.push(DeleteQueuedDocument { description, job }),
                Err(err) if err.must_propagate() => return Err(err),
                Err(err) => {
                    warn!(
                        job_id = %description.job_id,
                        error = %err,
                        "Cannot load job for deletion, releasing document"
                    );
                    if let Err(err) = store.reset_deleting_document(&description) {
                        error!(error = %err, "Failed to release document");
                    }
                }
            }
        }

        let mut queued = queued.into_iter().peekable();
        while queued.peek().is_some() {
            let set: Vec<_> = queued.by_ref().take(self.batch_size).collect();
            self.queue.add_documents(DeleteSet::new(set))?;
        }

        self.services
            .metrics
            .update_queue_depth("deletes", self.queue.len());
        Ok(())
    }

    /// The store gives every claimed delete back during the reset, so
    /// queued sets would be duplicates.
    fn on_database_error(&mut self) {
        self.queue.reset();
    }
}
