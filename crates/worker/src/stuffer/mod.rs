//! Stuffer threads: claim ready documents from the job store and feed the
//! in-memory queues.
//!
//! Each stuffer is an [`AgentLoop`](crate::runtime::AgentLoop) driven by
//! `run_agent_loop`; a pass sleeps while its queue is above the low-water mark.

mod delete;
mod document;
mod expire;

pub use delete::DeleteStuffer;
pub use document::DocumentStuffer;
pub use expire::ExpireStuffer;

use crawler_domain::ports::JobStore;
use crawler_domain::{AgentResult, JobDescription, JobId};
use std::collections::HashMap;
use std::sync::Arc;

/// Job descriptions loaded during one stuffing pass.
pub(crate) struct JobCache<'a> {
    store: &'a dyn JobStore,
    jobs: HashMap<JobId, Arc<JobDescription>>,
}

impl<'a> JobCache<'a> {
    pub(crate) fn new(store: &'a dyn JobStore) -> Self {
        Self {
            store,
            jobs: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, job_id: JobId) -> AgentResult<Arc<JobDescription>> {
        if let Some(job) = self.jobs.get(&job_id) {
            return Ok(job.clone());
        }
        let job = Arc::new(self.store.load_job(job_id)?);
        self.jobs.insert(job_id, job.clone());
        Ok(job)
    }
}
