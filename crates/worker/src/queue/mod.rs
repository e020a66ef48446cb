//! In-memory queues between stuffers and worker pools.
//!
//! A stuffer claims documents from the job store and pushes them here in
//! sets; workers pop one set at a time. The queues hold no persistent state:
//! on a reset they are simply drained, since the store puts every claimed
//! document back on its own.

mod delete;
mod document;

pub use delete::{CleanupQueuedDocument, DeleteQueuedDocument, DeleteSet, DocumentCleanupQueue, DocumentDeleteQueue};
pub use document::{DocumentQueue, DocumentSet, QueuedDocument};

use crawler_domain::{AgentError, AgentResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Unit of work handed to one worker.
pub trait QueueSet: Send {
    fn document_count(&self) -> usize;
}

struct QueueState<S> {
    sets: VecDeque<S>,
    documents: usize,
    /// Bumped on every reset so blocked consumers can tell their wait is stale
    epoch: u64,
    /// Consumers get `None` instead of blocking until the next reset
    halted: bool,
    interrupted: bool,
}

/// FIFO of document sets with a low-water check for the producer.
pub struct BoundedQueue<S> {
    state: Mutex<QueueState<S>>,
    available: Condvar,
    space: Condvar,
    low_water_factor: f64,
    high_water_mark: Option<usize>,
}

impl<S: QueueSet> BoundedQueue<S> {
    pub fn new(low_water_factor: f64) -> Self {
        Self {
            state: Mutex::new(QueueState {
                sets: VecDeque::new(),
                documents: 0,
                epoch: 0,
                halted: false,
                interrupted: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
            low_water_factor,
            high_water_mark: None,
        }
    }

    /// Make producers block while the queue holds at least `mark` documents.
    pub fn with_high_water_mark(mut self, mark: usize) -> Self {
        self.high_water_mark = Some(mark);
        self
    }

    pub fn add_documents(&self, set: S) -> AgentResult<()> {
        let mut state = self.state.lock();
        if let Some(mark) = self.high_water_mark {
            while state.documents >= mark && !state.interrupted {
                self.space.wait(&mut state);
            }
        }
        if state.interrupted {
            return Err(AgentError::Interrupted);
        }
        state.documents += set.document_count();
        state.sets.push_back(set);
        self.available.notify_one();
        Ok(())
    }

    /// Block until a set is available.
    ///
    /// Returns `Ok(None)` if the queue was reset while waiting; the caller
    /// should go back and check for a pending reset.
    pub fn get_documents(&self) -> AgentResult<Option<S>> {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        loop {
            if state.interrupted {
                return Err(AgentError::Interrupted);
            }
            if state.epoch != epoch || state.halted {
                return Ok(None);
            }
            if let Some(set) = state.sets.pop_front() {
                state.documents -= set.document_count();
                self.space.notify_all();
                return Ok(Some(set));
            }
            self.available.wait(&mut state);
        }
    }

    /// True when fewer than `low_water_factor * worker_count` documents are queued.
    pub fn check_if_empty(&self, worker_count: usize) -> bool {
        let low_water_mark = (self.low_water_factor * worker_count as f64) as usize;
        self.state.lock().documents < low_water_mark
    }

    /// Drop everything queued and release blocked consumers. Returns the
    /// discarded sets.
    pub fn reset(&self) -> Vec<S> {
        let mut state = self.state.lock();
        let drained: Vec<S> = state.sets.drain(..).collect();
        state.documents = 0;
        state.epoch += 1;
        state.halted = false;
        self.available.notify_all();
        self.space.notify_all();
        drained
    }

    /// Stop handing out sets until the next [`reset`](Self::reset), so that
    /// consumers return to their loop and reach the reset barrier.
    pub fn halt_consumers(&self) {
        let mut state = self.state.lock();
        state.halted = true;
        self.available.notify_all();
    }

    /// Permanently fail every current and future wait with `Interrupted`.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.available.notify_all();
        self.space.notify_all();
    }

    /// Queued documents
    pub fn len(&self) -> usize {
        self.state.lock().documents
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_count(&self) -> usize {
        self.state.lock().sets.len()
    }
}

/// Smallest number of documents a stuffer asks the store for at once.
pub fn lowest_stuff_amount(stuff_amount_factor: f64, worker_count: usize) -> usize {
    ((stuff_amount_factor * worker_count as f64) as usize).max(1)
}
