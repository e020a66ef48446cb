//! Requeue of documents whose inherited (carrydown) data changed.

use crate::tracker::QueueTracker;
use crawler_domain::ports::{JobStore, RepositoryConnector};
use crawler_domain::{AgentResult, DocumentDescription, RepositoryConnection, DEFAULT_BIN};
use tracing::debug;

/// Bins for a document, or the default bin when no connector is at hand.
pub fn bins_for(connector: Option<&dyn RepositoryConnector>, document_identifier: &str) -> Vec<String> {
    match connector {
        Some(connector) => connector.bin_names(document_identifier),
        None => vec![DEFAULT_BIN.to_string()],
    }
}

/// Give every candidate a fresh priority and ask the store to requeue it.
/// Priorities the store declines are released back to the tracker.
pub fn requeue_documents_due_to_carrydown(
    store: &dyn JobStore,
    candidates: &[DocumentDescription],
    connector: Option<&dyn RepositoryConnector>,
    connection: &RepositoryConnection,
    tracker: &QueueTracker,
    current_time: i64,
) -> AgentResult<()> {
    if candidates.is_empty() {
        return Ok(());
    }

    let bins: Vec<Vec<String>> = candidates
        .iter()
        .map(|dd| bins_for(connector, &dd.document_identifier))
        .collect();
    let priorities: Vec<f64> = bins
        .iter()
        .map(|b| tracker.calculate_priority(b, connection))
        .collect();

    let used = store.carrydown_change_document_multiple(candidates, current_time, &priorities)?;

    for ((bins, priority), used) in bins.iter().zip(&priorities).zip(&used) {
        if !used {
            tracker.note_priority_not_used(bins, connection, *priority);
        }
    }

    debug!(
        connection = %connection.name,
        requeued = candidates.len(),
        "Requeued documents due to carrydown change"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawler_domain::JobId;
    use crawler_testing::{create_test_connection, DocumentStatus, InMemoryJobStore, JobBuilder};

    #[test]
    fn test_bins_without_connector_use_default_bin() {
        assert_eq!(bins_for(None, "http://a.example/"), vec![DEFAULT_BIN.to_string()]);
    }

    #[test]
    fn test_only_idle_documents_are_requeued() {
        let store = InMemoryJobStore::new();
        store.insert_job(JobBuilder::new(1).build());
        let busy = store.insert_pending(JobId(1), "http://a.example/busy");
        store.get_next_documents(10, i64::MAX).unwrap();
        let idle = store.insert_pending(JobId(1), "http://a.example/idle");
        let tracker = QueueTracker::new();

        requeue_documents_due_to_carrydown(
            &store,
            &[busy.clone(), idle.clone()],
            None,
            &create_test_connection("web"),
            &tracker,
            1_000,
        )
        .unwrap();

        let idle = store.document_state(idle.id).unwrap();
        assert_eq!(idle.status, DocumentStatus::Pending);
        assert_eq!(idle.check_time, Some(1_000));
        assert!(idle.priority.is_some());

        let busy = store.document_state(busy.id).unwrap();
        assert_eq!(busy.status, DocumentStatus::Active);
        assert_eq!(busy.priority, None);
    }

    #[test]
    fn test_no_candidates_skips_the_store() {
        let store = InMemoryJobStore::new();
        requeue_documents_due_to_carrydown(
            &store,
            &[],
            None,
            &create_test_connection("web"),
            &QueueTracker::new(),
            0,
        )
        .unwrap();
        assert_eq!(store.calls("carrydown_change_document_multiple"), 0);
    }
}
