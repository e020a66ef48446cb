//! Document stuffer and worker, run one iteration at a time against the
//! in-memory store.

mod common;

use common::Harness;
use crawler_common::now_millis;
use crawler_domain::activity::{ACTIVITY_DOCUMENT_DELETE, ACTIVITY_FETCH};
use crawler_domain::{
    AgentError, DocumentAction, DocumentDescription, JobDescription, JobId, JobStatus,
    ServiceInterruption, StoreError,
};
use crawler_testing::{DocumentStatus, JobBuilder, ProcessOutcome};
use crawler_worker::queue::DocumentQueue;
use crawler_worker::stuffer::DocumentStuffer;
use crawler_worker::workers::{recheck_schedule, DocumentWorker};
use crawler_worker::AgentLoop;
use proptest::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

const HOST: &str = "a.example";

struct Pipeline {
    harness: Harness,
    queue: Arc<DocumentQueue>,
    stuffer: DocumentStuffer,
    worker: DocumentWorker,
    documents: Vec<DocumentDescription>,
}

impl Pipeline {
    fn new(job: JobDescription, count: usize) -> Self {
        let harness = Harness::new(job);
        let documents = (0..count)
            .map(|i| harness.store.insert_pending(JobId(1), &format!("http://{HOST}/{i}")))
            .collect();
        Self::from_harness(harness, documents)
    }

    fn from_harness(harness: Harness, documents: Vec<DocumentDescription>) -> Self {
        let queue = Arc::new(DocumentQueue::new(5.0));
        let stuffer = DocumentStuffer::new(harness.services.clone(), queue.clone(), 10, 1.0);
        let worker = DocumentWorker::new(0, harness.services.clone(), queue.clone());
        Self {
            harness,
            queue,
            stuffer,
            worker,
            documents,
        }
    }

    fn stuff(&mut self) {
        self.stuffer.run_once().unwrap();
        assert_eq!(self.queue.len(), self.documents.len());
    }

    fn status_count(&self, status: DocumentStatus) -> usize {
        self.harness.store.count_with_status(status)
    }

    fn assert_tracker_idle(&self) {
        let tracker = &self.harness.services.tracker;
        assert_eq!(tracker.queued_count(HOST), 0);
        assert_eq!(tracker.active_count(HOST), 0);
    }
}

#[test]
fn test_documents_flow_to_completion() {
    let mut pipeline = Pipeline::new(JobBuilder::new(1).build(), 3);
    pipeline.stuff();
    assert_eq!(pipeline.harness.services.tracker.queued_count(HOST), 3);
    assert_eq!(pipeline.status_count(DocumentStatus::Active), 3);

    pipeline.worker.run_once().unwrap();

    assert_eq!(pipeline.status_count(DocumentStatus::Completed), 3);
    assert_eq!(pipeline.harness.connector.processed().len(), 3);
    assert_eq!(pipeline.harness.logger.count_of(ACTIVITY_FETCH), 3);
    assert_eq!(pipeline.harness.services.metrics.documents_completed(), 3);
    pipeline.assert_tracker_idle();
}

#[test]
fn test_connector_panic_releases_claimed_documents() {
    let mut pipeline = Pipeline::new(JobBuilder::new(1).build(), 4);
    pipeline
        .harness
        .connector
        .push_outcome(ProcessOutcome::Panic("boom".to_string()));
    pipeline.stuff();

    let outcome = catch_unwind(AssertUnwindSafe(|| pipeline.worker.run_once()));
    assert!(outcome.is_err());

    assert_eq!(pipeline.status_count(DocumentStatus::Active), 0);
    assert_eq!(pipeline.status_count(DocumentStatus::Pending), 4);
    pipeline.assert_tracker_idle();
}

#[test]
fn test_interruption_requeues_with_decremented_budget() {
    let mut pipeline = Pipeline::new(JobBuilder::new(1).build(), 2);
    let retry_at = now_millis() + 60_000;
    pipeline.harness.connector.push_outcome(ProcessOutcome::Interrupt(
        ServiceInterruption::new("rate limited", retry_at).with_retry_budget(3),
    ));
    pipeline.stuff();
    pipeline.worker.run_once().unwrap();

    for dd in &pipeline.documents {
        let state = pipeline.harness.store.document_state(dd.id).unwrap();
        assert_eq!(state.status, DocumentStatus::Pending);
        assert_eq!(state.check_time, Some(retry_at));
        assert_eq!(state.description.fail_retry_count, Some(2));
    }
    assert_eq!(pipeline.harness.services.metrics.documents_requeued(), 2);
    assert_eq!(pipeline.harness.store.job_status(JobId(1)), Some(JobStatus::Active));
    pipeline.assert_tracker_idle();
}

#[test]
fn test_exhausted_budget_with_abort_aborts_job() {
    let harness = Harness::new(JobBuilder::new(1).build());
    let documents = vec![harness.store.insert_document(
        DocumentDescription::new(JobId(1), format!("http://{HOST}/tired")).with_failure(None, Some(0)),
    )];
    let mut pipeline = Pipeline::from_harness(harness, documents);
    pipeline.harness.connector.push_outcome(ProcessOutcome::Interrupt(
        ServiceInterruption::new("still down", now_millis()).aborting_on_fail(),
    ));
    pipeline.stuff();
    pipeline.worker.run_once().unwrap();

    let store = &pipeline.harness.store;
    assert_eq!(store.job_status(JobId(1)), Some(JobStatus::Aborting));
    let message = store.abort_message(JobId(1)).unwrap();
    assert!(message.starts_with("Repeated service interruptions - failure processing document"));
    assert_eq!(pipeline.status_count(DocumentStatus::Pending), 1);
    assert_eq!(pipeline.harness.services.metrics.documents_failed(), 1);
}

#[test]
fn test_exhausted_budget_without_abort_removes_documents() {
    let harness = Harness::new(JobBuilder::new(1).build());
    let documents = (0..3)
        .map(|i| {
            harness.store.insert_document(
                DocumentDescription::new(JobId(1), format!("http://{HOST}/{i}")).with_failure(None, Some(0)),
            )
        })
        .collect();
    let mut pipeline = Pipeline::from_harness(harness, documents);
    pipeline.harness.connector.push_outcome(ProcessOutcome::Interrupt(
        ServiceInterruption::new("gone for good", now_millis()),
    ));
    pipeline.stuff();
    pipeline.worker.run_once().unwrap();

    assert_eq!(pipeline.harness.output.deleted().len(), 3);
    assert_eq!(pipeline.harness.store.document_count(), 0);
    assert_eq!(pipeline.harness.services.metrics.documents_failed(), 3);
    assert_eq!(pipeline.harness.store.job_status(JobId(1)), Some(JobStatus::Active));
}

#[test]
fn test_inactive_job_returns_documents_unprocessed() {
    let mut pipeline = Pipeline::new(JobBuilder::new(1).build(), 3);
    pipeline.stuff();
    pipeline.harness.store.set_job_status(JobId(1), JobStatus::Paused);

    pipeline.worker.run_once().unwrap();

    assert!(pipeline.harness.connector.processed().is_empty());
    assert_eq!(pipeline.status_count(DocumentStatus::Pending), 3);
    pipeline.assert_tracker_idle();
}

#[test]
fn test_deleted_documents_leave_the_index() {
    let mut pipeline = Pipeline::new(JobBuilder::new(1).build(), 2);
    pipeline.harness.connector.push_outcome(ProcessOutcome::Delete);
    pipeline.stuff();
    pipeline.worker.run_once().unwrap();

    let deleted = pipeline.harness.output.deleted();
    assert_eq!(deleted.len(), 2);
    assert!(deleted.iter().all(|(class, _)| class == "web"));
    assert_eq!(pipeline.harness.store.document_count(), 0);
    assert_eq!(pipeline.harness.logger.count_of(ACTIVITY_DOCUMENT_DELETE), 2);
    assert_eq!(pipeline.harness.services.metrics.documents_deleted(), 2);
}

#[test]
fn test_aborted_documents_are_rescanned_immediately() {
    let mut pipeline = Pipeline::new(JobBuilder::new(1).build(), 2);
    pipeline.harness.connector.push_outcome(ProcessOutcome::Abort);
    pipeline.stuff();
    pipeline.worker.run_once().unwrap();

    for dd in &pipeline.documents {
        let state = pipeline.harness.store.document_state(dd.id).unwrap();
        assert_eq!(state.status, DocumentStatus::Pending);
        assert_eq!(state.check_time, Some(0));
    }
}

#[test]
fn test_continuous_job_schedules_rescan() {
    let job = JobBuilder::new(1).continuous(Some(60_000), None).build();
    let mut pipeline = Pipeline::new(job, 2);
    let before = now_millis();
    pipeline.stuff();
    pipeline.worker.run_once().unwrap();

    for dd in &pipeline.documents {
        let state = pipeline.harness.store.document_state(dd.id).unwrap();
        assert_eq!(state.status, DocumentStatus::Pending);
        assert_eq!(state.action, DocumentAction::Rescan);
        assert!(state.check_time.unwrap() >= before + 60_000);
        assert!(state.indexed);
    }
}

#[test]
fn test_connector_failure_aborts_job_and_releases_documents() {
    let mut pipeline = Pipeline::new(JobBuilder::new(1).build(), 2);
    pipeline
        .harness
        .connector
        .push_outcome(ProcessOutcome::Fail("bad credentials".to_string()));
    pipeline.stuff();
    pipeline.worker.run_once().unwrap();

    assert_eq!(pipeline.harness.store.job_status(JobId(1)), Some(JobStatus::Aborting));
    assert_eq!(pipeline.status_count(DocumentStatus::Pending), 2);
    pipeline.assert_tracker_idle();
}

#[test]
fn test_unavailable_repository_requeues_without_aborting() {
    let mut pipeline = Pipeline::new(JobBuilder::new(1).build(), 2);
    pipeline.harness.connector.push_outcome(ProcessOutcome::Unavailable);
    pipeline.stuff();
    pipeline.worker.run_once().unwrap();

    assert_eq!(pipeline.harness.store.job_status(JobId(1)), Some(JobStatus::Active));
    assert_eq!(pipeline.status_count(DocumentStatus::Pending), 2);
    assert_eq!(pipeline.status_count(DocumentStatus::Active), 0);
    pipeline.assert_tracker_idle();
}

#[test]
fn test_missing_connector_keeps_documents_on_default_bin() {
    let harness = Harness::new(JobBuilder::new(1).build());
    harness.registry.remove_repository_connector("web");
    let documents = vec![harness.store.insert_pending(JobId(1), "http://b.example/x")];
    let mut pipeline = Pipeline::from_harness(harness, documents);

    pipeline.stuff();
    let tracker = &pipeline.harness.services.tracker;
    assert_eq!(tracker.queued_count(crawler_domain::DEFAULT_BIN), 1);
    assert_eq!(tracker.queued_count("b.example"), 0);
}

#[test]
fn test_idle_stuffer_waits_before_polling_again() {
    let harness = Harness::new(JobBuilder::new(1).build());
    let mut services = harness.services.clone();
    services.intervals.stuffer_idle_ms = 40;
    let queue = Arc::new(DocumentQueue::new(5.0));
    let mut stuffer = DocumentStuffer::new(services, queue.clone(), 2, 1.0);

    let started = Instant::now();
    stuffer.run_once().unwrap();

    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(harness.store.calls("get_next_documents"), 1);
    assert!(queue.is_empty());
}

#[test]
fn test_store_failure_while_queueing_returns_claimed_documents() {
    let mut pipeline = Pipeline::new(JobBuilder::new(1).build(), 3);
    pipeline
        .harness
        .store
        .fail_next("load_job", StoreError::Connection("gone".to_string()));

    let result = pipeline.stuffer.run_once();

    assert!(matches!(result, Err(AgentError::DatabaseConnection(_))));
    assert_eq!(pipeline.status_count(DocumentStatus::Active), 0);
    assert_eq!(pipeline.status_count(DocumentStatus::Pending), 3);
    assert!(pipeline.queue.is_empty());
    pipeline.assert_tracker_idle();

    pipeline.stuff();
    assert_eq!(pipeline.status_count(DocumentStatus::Active), 3);
}

#[test]
fn test_finished_parent_requeues_carrydown_children() {
    let mut pipeline = Pipeline::new(JobBuilder::new(1).build(), 1);
    pipeline.stuff();
    pipeline.worker.run_once().unwrap();
    let child = pipeline.documents[0].clone();
    assert_eq!(
        pipeline.harness.store.document_status(child.id),
        Some(DocumentStatus::Completed)
    );

    let store = pipeline.harness.store.clone();
    let parent = store.insert_pending(JobId(1), &format!("http://{HOST}/parent"));
    store.set_carrydown_children(&parent, &[child.clone()]);
    let before = now_millis();
    pipeline.stuffer.run_once().unwrap();
    pipeline.worker.run_once().unwrap();

    assert_eq!(store.document_status(parent.id), Some(DocumentStatus::Completed));
    let child = store.document_state(child.id).unwrap();
    assert_eq!(child.status, DocumentStatus::Pending);
    assert_eq!(child.action, DocumentAction::Rescan);
    assert!(child.check_time.unwrap() >= before);
    assert!(child.priority.is_some());
    assert_eq!(store.calls("carrydown_change_document_multiple"), 1);
}

proptest! {
    #[test]
    fn prop_recheck_picks_the_earlier_interval(
        rescan in proptest::option::of(1i64..1_000_000),
        expire in proptest::option::of(1i64..1_000_000),
        now in 0i64..1_000_000_000,
    ) {
        let job = JobBuilder::new(1).continuous(rescan, expire).build();
        let (time, action) = recheck_schedule(&job, now);
        match (rescan, expire) {
            (None, None) => prop_assert_eq!(time, None),
            (Some(r), None) => {
                prop_assert_eq!(time, Some(now + r));
                prop_assert_eq!(action, DocumentAction::Rescan);
            }
            (None, Some(e)) => {
                prop_assert_eq!(time, Some(now + e));
                prop_assert_eq!(action, DocumentAction::Remove);
            }
            (Some(r), Some(e)) => {
                prop_assert_eq!(time, Some(now + r.min(e)));
                let expected = if e < r { DocumentAction::Remove } else { DocumentAction::Rescan };
                prop_assert_eq!(action, expected);
            }
        }
    }
}
