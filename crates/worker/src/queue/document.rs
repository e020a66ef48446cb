use super::{BoundedQueue, QueueSet};
use crawler_domain::{DocumentDescription, JobDescription, RepositoryConnection};
use std::sync::Arc;

/// A claimed document plus the bins it was tracked under.
#[derive(Debug, Clone)]
pub struct QueuedDocument {
    pub description: DocumentDescription,
    pub bin_names: Vec<String>,
}

/// Documents of one job, small enough for one connector call.
#[derive(Debug, Clone)]
pub struct DocumentSet {
    pub job: Arc<JobDescription>,
    pub connection: Arc<RepositoryConnection>,
    pub documents: Vec<QueuedDocument>,
}

impl QueueSet for DocumentSet {
    fn document_count(&self) -> usize {
        self.documents.len()
    }
}

pub type DocumentQueue = BoundedQueue<DocumentSet>;
