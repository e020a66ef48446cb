use super::JobCache;
use crate::queue::{CleanupQueuedDocument, DeleteSet, DocumentCleanupQueue};
use crate::runtime::AgentLoop;
use crate::services::AgentServices;
use crawler_common::now_millis;
use crawler_domain::{AgentResult, DocumentAction, JobId};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Feeds the expire queue with documents of continuous jobs that outlived
/// their expiration interval. Every set holds documents of a single job.
pub struct ExpireStuffer {
    services: AgentServices,
    queue: Arc<DocumentCleanupQueue>,
    worker_count: usize,
    batch_size: usize,
}

impl ExpireStuffer {
    pub fn new(
        services: AgentServices,
        queue: Arc<DocumentCleanupQueue>,
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

impl AgentLoop for ExpireStuffer {
    fn name(&self) -> &str {
        "expire-stuffer"
    }

    fn run_once(&mut self) -> AgentResult<()> {
        let interrupt = &self.services.interrupt;
        let intervals = &self.services.intervals;
        let store = self.services.store.as_ref();

        if !self.queue.check_if_empty(self.worker_count) {
            return interrupt.sleep(intervals.delete_stuffer_busy());
        }

        let expired = store.get_next_expired_documents(store.max_in_clause(), now_millis())?;
        interrupt.check()?;

        if expired.is_empty() {
            return interrupt.sleep(intervals.delete_stuffer_idle());
        }
        debug!(count = expired.len(), "Expire stuffer found documents to queue");

        let mut jobs = JobCache::new(store);
        let mut per_job: IndexMap<JobId, Vec<CleanupQueuedDocument>> = IndexMap::new();
        for document in expired {
            let job_id = document.description.job_id;
            match jobs.get(job_id) {
                Ok(job) => per_job.entry(job_id).or_default().push(CleanupQueuedDocument {
                    description: document.description,
                    job,
                    should_be_removed_from_index: document.should_be_removed_from_index,
                }),
                Err(err) if err.must_propagate() => return Err(err),
                Err(err) => {
                    warn!(
                        job_id = %job_id,
                        error = %err,
                        "Cannot load job for expiration, releasing document"
                    );
                    if let Err(err) = store.reset_document(
                        &document.description,
                        0,
                        DocumentAction::Remove,
                        None,
                        None,
                    ) {
                        error!(error = %err, "Failed to release document");
                    }
                }
            }
        }

        for (_, documents) in per_job {
            let mut documents = documents.into_iter().peekable();
            while documents.peek().is_some() {
                let set: Vec<_> = documents.by_ref().take(self.batch_size).collect();
                self.queue.add_documents(DeleteSet::new(set))?;
            }
        }

        self.services
            .metrics
            .update_queue_depth("expirations", self.queue.len());
        Ok(())
    }
}
