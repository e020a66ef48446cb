use super::{BoundedQueue, QueueSet};
use crawler_domain::{DocumentDescription, JobDescription};
use std::sync::Arc;

/// A document whose index entry must be removed because it left its job.
#[derive(Debug, Clone)]
pub struct DeleteQueuedDocument {
    pub description: DocumentDescription,
    pub job: Arc<JobDescription>,
}

/// An expired document of a continuous job.
#[derive(Debug, Clone)]
pub struct CleanupQueuedDocument {
    pub description: DocumentDescription,
    pub job: Arc<JobDescription>,
    pub should_be_removed_from_index: bool,
}

#[derive(Debug, Clone)]
pub struct DeleteSet<T> {
    pub documents: Vec<T>,
}

impl<T> DeleteSet<T> {
    pub fn new(documents: Vec<T>) -> Self {
        Self { documents }
    }
}

impl<T: Send> QueueSet for DeleteSet<T> {
    fn document_count(&self) -> usize {
        self.documents.len()
    }
}

pub type DocumentDeleteQueue<T = DeleteQueuedDocument> = BoundedQueue<DeleteSet<T>>;

/// Queue feeding the expire workers
pub type DocumentCleanupQueue = DocumentDeleteQueue<CleanupQueuedDocument>;
