use super::JobCache;
use crate::queue::{lowest_stuff_amount, DocumentQueue, DocumentSet, QueuedDocument};
use crate::runtime::AgentLoop;
use crate::services::AgentServices;
use crate::workers::ClaimedBatch;
use crawler_common::now_millis;
use crawler_domain::ports::RepositoryConnector;
use crawler_domain::{
    AgentError, AgentResult, DocumentAction, DocumentDescription, JobDescription, JobId,
    RepositoryConnection, DEFAULT_BIN,
};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Timing of the previous store query, used to size the next one.
#[derive(Debug, Clone, Copy)]
struct LastQuery {
    start: Instant,
    end: Instant,
    full: bool,
}

/// Grow the request when the last full query took at least as long as the
/// workers needed to drain it; shrink it when the query was quick relative
/// to the drain time.
fn next_stuff_amount(amount: usize, lowest: usize, last: Option<LastQuery>, needed: Instant) -> usize {
    let Some(last) = last else {
        return amount;
    };
    if !last.full {
        return amount;
    }
    let query_time = last.end.saturating_duration_since(last.start);
    let drain_time = needed.saturating_duration_since(last.end);
    if query_time >= drain_time {
        amount.saturating_mul(2)
    } else if query_time < drain_time * 4 {
        (amount / 2).max(lowest)
    } else {
        amount
    }
}

/// Connector facts needed to queue a document.
#[derive(Clone)]
struct ConnectorInfo {
    connector: Option<Arc<dyn RepositoryConnector>>,
    max_documents: usize,
}

impl ConnectorInfo {
    fn fallback() -> Self {
        Self {
            connector: None,
            max_documents: 1,
        }
    }

    fn bin_names(&self, document_identifier: &str) -> Vec<String> {
        match &self.connector {
            Some(connector) => connector.bin_names(document_identifier),
            None => vec![DEFAULT_BIN.to_string()],
        }
    }
}

/// A job's documents waiting to fill a set.
struct PendingSet {
    job: Arc<JobDescription>,
    connection: Arc<RepositoryConnection>,
    documents: Vec<QueuedDocument>,
    indexes: Vec<usize>,
}

/// Feeds the document queue for the worker pool.
pub struct DocumentStuffer {
    services: AgentServices,
    queue: Arc<DocumentQueue>,
    worker_count: usize,
    lowest_amount: usize,
    amount: usize,
    last_query: Option<LastQuery>,
}

impl DocumentStuffer {
    pub fn new(
        services: AgentServices,
        queue: Arc<DocumentQueue>,
        worker_count: usize,
        stuff_amount_factor: f64,
    ) -> Self {
        let lowest_amount = lowest_stuff_amount(stuff_amount_factor, worker_count);
        Self {
            services,
            queue,
            worker_count,
            lowest_amount,
            amount: lowest_amount,
            last_query: None,
        }
    }

    /// Documents requested from the store per pass
    pub fn stuff_amount(&self) -> usize {
        self.amount
    }

    fn adapt_amount(&mut self, needed: Instant) {
        self.amount = next_stuff_amount(self.amount, self.lowest_amount, self.last_query, needed);
    }

    fn connector_info(&self, connection_name: &str) -> AgentResult<ConnectorInfo> {
        match self.services.connectors.repository_connector(connection_name) {
            Ok(connector) => Ok(ConnectorInfo {
                max_documents: connector.max_document_request().max(1),
                connector: Some(connector),
            }),
            Err(err) => {
                let err = AgentError::from(err);
                if err.is_interrupted() {
                    return Err(err);
                }
                error!(
                    connection = connection_name,
                    error = %err,
                    "Stuffer could not obtain a connector - continuing with default bin"
                );
                Ok(ConnectorInfo::fallback())
            }
        }
    }

    /// Queue one set. Tracker records go in before the set becomes visible
    /// to workers and come back out if the queue refuses it.
    fn push_set<R>(
        &self,
        set: PendingSet,
        claimed: &mut ClaimedBatch<DocumentDescription, R>,
    ) -> AgentResult<()>
    where
        R: FnMut(&DocumentDescription),
    {
        let tracker = &self.services.tracker;
        let bins: Vec<Vec<String>> = set.documents.iter().map(|d| d.bin_names.clone()).collect();
        for bin_names in &bins {
            tracker.add_record(bin_names);
        }
        let queued = self.queue.add_documents(DocumentSet {
            job: set.job,
            connection: set.connection,
            documents: set.documents,
        });
        if let Err(err) = queued {
            for bin_names in &bins {
                tracker.remove_record(bin_names);
            }
            return Err(err);
        }
        claimed.mark_all_processed(&set.indexes);
        Ok(())
    }

    /// Group claimed documents into sets and queue them. Documents whose
    /// job or connection cannot be loaded stay unprocessed, so the batch
    /// hands them back to the store.
    fn queue_documents<R>(&self, claimed: &mut ClaimedBatch<DocumentDescription, R>) -> AgentResult<()>
    where
        R: FnMut(&DocumentDescription),
    {
        let store = self.services.store.as_ref();
        let mut jobs = JobCache::new(store);
        let mut connections: HashMap<String, Arc<RepositoryConnection>> = HashMap::new();
        let mut connectors: HashMap<String, ConnectorInfo> = HashMap::new();

        let mut resolved = Vec::with_capacity(claimed.len());
        let mut unqueueable = 0;
        for (index, description) in claimed.items().iter().enumerate() {
            let job = match jobs.get(description.job_id) {
                Ok(job) => job,
                Err(err) if err.must_propagate() => return Err(err),
                Err(err) => {
                    warn!(
                        document = %description.document_identifier,
                        error = %err,
                        "Returning document that could not be queued"
                    );
                    unqueueable += 1;
                    continue;
                }
            };

            let connection = match connections.get(&job.connection_name) {
                Some(connection) => connection.clone(),
                None => match self.services.connectors.repository_connection(&job.connection_name) {
                    Ok(connection) => {
                        let connection = Arc::new(connection);
                        connections.insert(job.connection_name.clone(), connection.clone());
                        connection
                    }
                    Err(err) => {
                        let err = AgentError::from(err);
                        if err.must_propagate() {
                            return Err(err);
                        }
                        warn!(
                            document = %description.document_identifier,
                            error = %err,
                            "Returning document that could not be queued"
                        );
                        unqueueable += 1;
                        continue;
                    }
                },
            };

            if !connectors.contains_key(&job.connection_name) {
                let info = self.connector_info(&job.connection_name)?;
                connectors.insert(job.connection_name.clone(), info);
            }

            resolved.push((index, description.clone(), job, connection));
        }
        if unqueueable > 0 {
            debug!(count = unqueueable, "Stuffer skipped unqueueable documents");
        }

        let mut pending: IndexMap<JobId, PendingSet> = IndexMap::new();
        for (index, description, job, connection) in resolved {
            let info = connectors
                .get(&job.connection_name)
                .cloned()
                .unwrap_or_else(ConnectorInfo::fallback);
            let bin_names = info.bin_names(&description.document_identifier);

            let set = pending.entry(job.id).or_insert_with(|| PendingSet {
                job: job.clone(),
                connection: connection.clone(),
                documents: Vec::new(),
                indexes: Vec::new(),
            });
            set.documents.push(QueuedDocument {
                description,
                bin_names,
            });
            set.indexes.push(index);

            if set.documents.len() >= info.max_documents {
                let full = PendingSet {
                    job: set.job.clone(),
                    connection: set.connection.clone(),
                    documents: std::mem::take(&mut set.documents),
                    indexes: std::mem::take(&mut set.indexes),
                };
                self.push_set(full, claimed)?;
            }
        }

        for (_, set) in pending {
            if !set.documents.is_empty() {
                self.push_set(set, claimed)?;
            }
        }

        self.services
            .metrics
            .update_queue_depth("documents", self.queue.len());
        Ok(())
    }
}

impl AgentLoop for DocumentStuffer {
    fn name(&self) -> &str {
        "document-stuffer"
    }

    fn run_once(&mut self) -> AgentResult<()> {
        let interrupt = self.services.interrupt.clone();
        let intervals = self.services.intervals.clone();

        if !self.queue.check_if_empty(self.worker_count) {
            return interrupt.sleep(intervals.stuffer_busy());
        }
        let needed = Instant::now();
        self.adapt_amount(needed);

        let start = Instant::now();
        let batch = self
            .services
            .store
            .get_next_documents(self.amount, now_millis())?;
        let end = Instant::now();
        // Claimed documents not yet on the queue go back to the store, even on panic
        let store = self.services.store.clone();
        let mut claimed = ClaimedBatch::new(batch.documents, move |dd: &DocumentDescription| {
            if let Err(err) = store.reset_document(dd, 0, DocumentAction::Rescan, None, None) {
                error!(
                    document = %dd.document_identifier,
                    error = %err,
                    "Failed to return claimed document"
                );
            }
        });
        self.last_query = Some(LastQuery {
            start,
            end,
            full: claimed.len() == self.amount,
        });

        self.services
            .tracker
            .assess_minimum_depth(&batch.depth_priorities)?;
        interrupt.check()?;

        if claimed.len() == 0 {
            return interrupt.sleep(intervals.stuffer_idle());
        }

        debug!(
            count = claimed.len(),
            amount = self.amount,
            "Stuffer found documents to queue"
        );
        self.queue_documents(&mut claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn amount_after(previous: usize, lowest: usize, query_ms: u64, drain_ms: u64, full: bool) -> usize {
        let start = Instant::now();
        let end = start + Duration::from_millis(query_ms);
        let needed = end + Duration::from_millis(drain_ms);
        next_stuff_amount(previous, lowest, Some(LastQuery { start, end, full }), needed)
    }

    #[test]
    fn test_slow_query_doubles_amount() {
        assert_eq!(amount_after(50, 50, 100, 50, true), 100);
    }

    #[test]
    fn test_fast_query_halves_amount_to_floor() {
        assert_eq!(amount_after(400, 50, 10, 1000, true), 200);
        assert_eq!(amount_after(60, 50, 10, 1000, true), 50);
    }

    #[test]
    fn test_partial_result_keeps_amount() {
        assert_eq!(amount_after(80, 50, 100, 50, false), 80);
        assert_eq!(next_stuff_amount(80, 50, None, Instant::now()), 80);
    }

    #[test]
    fn test_moderate_drain_keeps_amount() {
        // 100ms query, 300ms drain: neither slower than the drain nor 4x faster
        assert_eq!(amount_after(80, 50, 100, 300, true), 80);
    }

    #[test]
    fn test_fallback_connector_uses_default_bin() {
        let info = ConnectorInfo::fallback();
        assert_eq!(info.max_documents, 1);
        assert_eq!(info.bin_names("http://example.com/"), vec![DEFAULT_BIN.to_string()]);
    }
}
