//! Reset rendezvous across real threads.

mod common;

use common::{wait_until, Harness};
use crawler_domain::{AgentError, AgentResult, JobId};
use crawler_testing::{DocumentStatus, JobBuilder};
use crawler_worker::queue::{DocumentCleanupQueue, DocumentQueue};
use crawler_worker::reset::{ResetAction, ResetManager, WorkerReset};
use crawler_worker::stuffer::DocumentStuffer;
use crawler_worker::AgentLoop;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Fail,
    Panic,
}

struct Scripted {
    runs: Arc<AtomicUsize>,
    behaviour: Behaviour,
}

impl Scripted {
    fn new(behaviour: Behaviour) -> (Self, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            Self {
                runs: runs.clone(),
                behaviour,
            },
            runs,
        )
    }
}

impl ResetAction for Scripted {
    fn perform_reset(&self) -> AgentResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        // Give any straggler time to arrive while the action runs
        thread::sleep(Duration::from_millis(10));
        match self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => Err(AgentError::DatabaseConnection("still down".to_string())),
            Behaviour::Panic => panic!("reset action blew up"),
        }
    }
}

/// Every member notes the event and waits; returns each member's result
/// and the number of times the action ran.
fn rendezvous(members: usize, behaviour: Behaviour) -> (Vec<AgentResult<()>>, usize) {
    let (action, runs) = Scripted::new(behaviour);
    let manager = Arc::new(ResetManager::new("test", action));
    // Registered up front so nobody can run the action early
    let registrations: Vec<_> = (0..members).map(|_| manager.register()).collect();
    let handles: Vec<_> = registrations
        .into_iter()
        .enumerate()
        .map(|(i, registration)| {
            let manager = manager.clone();
            thread::spawn(move || {
                let _registration = registration;
                thread::sleep(Duration::from_millis(5 * i as u64));
                manager.note_event();
                manager.wait_for_reset()
            })
        })
        .collect();

    let results = handles
        .into_iter()
        .map(|handle| handle.join().expect("member thread panicked"))
        .collect();
    (results, runs.load(Ordering::SeqCst))
}

#[test]
fn test_action_runs_once_for_all_members() {
    let (results, runs) = rendezvous(6, Behaviour::Succeed);
    assert_eq!(runs, 1);
    assert!(results.iter().all(Result::is_ok));
}

#[test]
fn test_failed_action_is_reported_to_one_member() {
    let (results, runs) = rendezvous(4, Behaviour::Fail);
    assert_eq!(runs, 1);
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
}

#[test]
fn test_panicking_action_still_releases_everyone() {
    let (results, runs) = rendezvous(4, Behaviour::Panic);
    assert_eq!(runs, 1);
    let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], AgentError::Unexpected(_)));
}

#[test]
fn test_departing_member_unblocks_the_rest() {
    let (action, runs) = Scripted::new(Behaviour::Succeed);
    let manager = Arc::new(ResetManager::new("test", action));
    let leaving = manager.register();
    let staying = manager.register();
    manager.note_event();

    let waiter = {
        let manager = manager.clone();
        thread::spawn(move || {
            let _registration = staying;
            manager.wait_for_reset()
        })
    };
    thread::sleep(Duration::from_millis(20));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(!waiter.is_finished());

    drop(leaving);
    waiter.join().unwrap().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_worker_reset_wakes_blocked_consumer_and_returns_documents() {
    let harness = Harness::new(JobBuilder::new(1).build());
    for i in 0..3 {
        harness.store.insert_pending(JobId(1), &format!("http://a.example/{i}"));
    }
    let document_queue = Arc::new(DocumentQueue::new(5.0));
    let expire_queue = Arc::new(DocumentCleanupQueue::new(5.0));
    let tracker = harness.services.tracker.clone();

    // Claimed and queued, but never handed to a worker
    DocumentStuffer::new(harness.services.clone(), document_queue.clone(), 1, 10.0)
        .run_once()
        .unwrap();
    assert_eq!(harness.store.count_with_status(DocumentStatus::Active), 3);
    assert_eq!(tracker.queued_count("a.example"), 3);

    let manager = Arc::new(ResetManager::new(
        "worker",
        WorkerReset {
            store: harness.store.clone(),
            document_queue: document_queue.clone(),
            expire_queue: expire_queue.clone(),
            tracker: tracker.clone(),
        },
    ));

    // An expire worker parked on its empty queue
    let consumer = {
        let registration = manager.register();
        let manager = manager.clone();
        let queue = expire_queue.clone();
        thread::spawn(move || -> AgentResult<()> {
            let _registration = registration;
            assert!(queue.get_documents()?.is_none());
            manager.wait_for_reset()
        })
    };
    let _registration = manager.register();
    thread::sleep(Duration::from_millis(20));

    manager.note_event();
    manager.wait_for_reset().unwrap();
    assert!(wait_until(Duration::from_secs(2), || consumer.is_finished()));
    consumer.join().unwrap().unwrap();

    assert_eq!(harness.store.calls("reset_document_worker_status"), 1);
    assert_eq!(harness.store.count_with_status(DocumentStatus::Active), 0);
    assert_eq!(harness.store.count_with_status(DocumentStatus::Pending), 3);
    assert!(document_queue.is_empty());
    assert_eq!(tracker.queued_count("a.example"), 0);
    assert!(!manager.is_reset_required());
}
