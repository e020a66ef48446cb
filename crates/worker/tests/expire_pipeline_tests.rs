//! Expire stuffer and expire workers on continuous jobs.

mod common;

use common::Harness;
use crawler_common::now_millis;
use crawler_domain::{
    ConnectorError, DocumentAction, DocumentDescription, JobId, JobStatus, ServiceInterruption,
};
use crawler_testing::{DocumentStatus, JobBuilder};
use crawler_worker::queue::DocumentCleanupQueue;
use crawler_worker::stuffer::ExpireStuffer;
use crawler_worker::workers::ExpireWorker;
use crawler_worker::AgentLoop;
use std::sync::Arc;

struct Expiry {
    harness: Harness,
    queue: Arc<DocumentCleanupQueue>,
    indexed: DocumentDescription,
    unindexed: DocumentDescription,
}

impl Expiry {
    fn new() -> Self {
        let harness = Harness::new(JobBuilder::new(1).continuous(Some(60_000), Some(30_000)).build());
        let indexed = harness
            .store
            .insert_expiring(DocumentDescription::new(JobId(1), "http://a.example/indexed"), true);
        let unindexed = harness
            .store
            .insert_expiring(DocumentDescription::new(JobId(1), "http://a.example/never"), false);
        Self {
            harness,
            queue: Arc::new(DocumentCleanupQueue::new(5.0)),
            indexed,
            unindexed,
        }
    }

    fn run(&self) {
        let services = self.harness.services.clone();
        ExpireStuffer::new(services.clone(), self.queue.clone(), 1, 5)
            .run_once()
            .unwrap();
        assert_eq!(self.queue.len(), 2);
        ExpireWorker::new(0, services, self.queue.clone()).run_once().unwrap();
    }
}

#[test]
fn test_only_indexed_documents_reach_the_output() {
    let expiry = Expiry::new();
    expiry.run();

    let deleted = expiry.harness.output.deleted();
    assert_eq!(
        deleted,
        vec![("web".to_string(), expiry.indexed.document_identifier_hash.clone())]
    );
    assert_eq!(expiry.harness.store.document_count(), 0);
    assert_eq!(expiry.harness.services.metrics.documents_expired(), 2);
}

#[test]
fn test_interruption_requeues_indexed_documents() {
    let expiry = Expiry::new();
    let retry_at = now_millis() + 60_000;
    expiry
        .harness
        .output
        .push_outcome(Err(ConnectorError::ServiceInterruption(
            ServiceInterruption::new("index busy", retry_at).with_retry_budget(2),
        )));
    expiry.run();

    let state = expiry.harness.store.document_state(expiry.indexed.id).unwrap();
    assert_eq!(state.status, DocumentStatus::Pending);
    assert_eq!(state.action, DocumentAction::Remove);
    assert_eq!(state.check_time, Some(retry_at));
    assert_eq!(state.description.fail_retry_count, Some(1));

    // Nothing to remove from the index, so it expires regardless
    assert!(expiry.harness.store.document_state(expiry.unindexed.id).is_none());
    assert_eq!(expiry.harness.services.metrics.documents_requeued(), 1);
}

#[test]
fn test_hard_failure_with_abort_stops_the_job() {
    let expiry = Expiry::new();
    expiry
        .harness
        .output
        .push_outcome(Err(ConnectorError::ServiceInterruption(
            ServiceInterruption::new("index gone", now_millis())
                .with_retry_budget(0)
                .aborting_on_fail(),
        )));
    expiry.run();

    let store = &expiry.harness.store;
    assert_eq!(store.job_status(JobId(1)), Some(JobStatus::Aborting));
    assert!(store
        .abort_message(JobId(1))
        .unwrap()
        .contains("failure expiring document"));
    // The guard puts both back for a later pass
    for dd in [&expiry.indexed, &expiry.unindexed] {
        let state = store.document_state(dd.id).unwrap();
        assert_eq!(state.status, DocumentStatus::Pending);
        assert_eq!(state.action, DocumentAction::Remove);
    }
}

#[test]
fn test_output_failure_aborts_the_job() {
    let expiry = Expiry::new();
    expiry
        .harness
        .output
        .push_outcome(Err(ConnectorError::Failure("bad index".to_string())));
    expiry.run();

    assert_eq!(
        expiry.harness.store.job_status(JobId(1)),
        Some(JobStatus::Aborting)
    );
    assert_eq!(expiry.harness.store.document_count(), 2);
}

#[test]
fn test_unavailable_connection_postpones_expiration() {
    let expiry = Expiry::new();
    let services = expiry.harness.services.clone();
    ExpireStuffer::new(services.clone(), expiry.queue.clone(), 1, 5)
        .run_once()
        .unwrap();
    expiry.harness.registry.set_connection_unavailable("web", true);

    ExpireWorker::new(0, services, expiry.queue.clone()).run_once().unwrap();

    let store = &expiry.harness.store;
    assert_eq!(store.job_status(JobId(1)), Some(JobStatus::Active));
    assert_eq!(expiry.harness.output.call_count(), 0);
    for dd in [&expiry.indexed, &expiry.unindexed] {
        let state = store.document_state(dd.id).unwrap();
        assert_eq!(state.status, DocumentStatus::Pending);
        assert_eq!(state.action, DocumentAction::Remove);
    }
}
