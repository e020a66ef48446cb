//! Recovery rendezvous for threads sharing a job store connection.
//!
//! When any thread in a group sees the store connection drop, it notes the
//! event. Every registered thread then stops at its next `wait_for_reset`;
//! once all of them are parked, exactly one runs the group's recovery action
//! and everyone resumes. This guarantees no thread is mid-batch while the
//! store returns in-flight documents to the pending state.

use crate::queue::{DocumentCleanupQueue, DocumentDeleteQueue, DocumentQueue};
use crate::tracker::QueueTracker;
use crawler_domain::ports::JobStore;
use crawler_domain::{AgentError, AgentResult};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info};

/// Recovery performed once every registered thread is parked.
pub trait ResetAction: Send + Sync {
    fn perform_reset(&self) -> AgentResult<()>;

    /// Release members blocked somewhere other than the barrier, so they
    /// come round to `wait_for_reset`. Called whenever an event is noted.
    fn wake_waiters(&self) {}
}

#[derive(Default)]
struct BarrierState {
    registered: usize,
    waiting: usize,
    reset_required: bool,
    performing: bool,
    /// Completed recoveries; waiters leave when this changes
    releases: u64,
    interrupted: bool,
}

pub struct ResetManager<A> {
    name: &'static str,
    action: A,
    state: Mutex<BarrierState>,
    changed: Condvar,
}

impl<A: ResetAction> ResetManager<A> {
    pub fn new(name: &'static str, action: A) -> Self {
        Self {
            name,
            action,
            state: Mutex::new(BarrierState::default()),
            changed: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Join the group. The thread leaves when the returned guard drops.
    pub fn register(self: &Arc<Self>) -> Registration
    where
        A: 'static,
    {
        Registration::new(self.clone())
    }

    fn add_member(&self) {
        self.state.lock().registered += 1;
    }

    fn remove_member(&self) {
        let mut state = self.state.lock();
        state.registered = state.registered.saturating_sub(1);
        // The departing thread may have been the last one outstanding
        if state.reset_required && state.waiting >= state.registered {
            self.changed.notify_all();
        }
    }

    /// Request a recovery. Takes effect at every member's next `wait_for_reset`.
    pub fn note_event(&self) {
        {
            let mut state = self.state.lock();
            state.reset_required = true;
            self.changed.notify_all();
        }
        self.action.wake_waiters();
    }

    pub fn is_reset_required(&self) -> bool {
        self.state.lock().reset_required
    }

    /// Park until a pending recovery has been performed. Returns immediately
    /// if none is pending.
    ///
    /// Only the thread that ran the recovery action sees its error.
    pub fn wait_for_reset(&self) -> AgentResult<()> {
        let mut state = self.state.lock();
        if state.interrupted {
            return Err(AgentError::Interrupted);
        }
        if !state.reset_required {
            return Ok(());
        }

        let releases = state.releases;
        state.waiting += 1;
        loop {
            if state.interrupted {
                state.waiting = state.waiting.saturating_sub(1);
                return Err(AgentError::Interrupted);
            }
            if state.releases != releases {
                return Ok(());
            }
            if !state.performing && state.waiting >= state.registered {
                return self.perform(state);
            }
            self.changed.wait(&mut state);
        }
    }

    fn perform(&self, mut state: MutexGuard<'_, BarrierState>) -> AgentResult<()> {
        state.performing = true;
        info!(manager = self.name, "All threads parked, performing reset");

        let result = MutexGuard::unlocked(&mut state, || {
            catch_unwind(AssertUnwindSafe(|| self.action.perform_reset())).unwrap_or_else(|_| {
                Err(AgentError::Unexpected(format!(
                    "{} reset action panicked",
                    self.name
                )))
            })
        });

        state.performing = false;
        state.reset_required = false;
        state.waiting = 0;
        state.releases = state.releases.wrapping_add(1);
        self.changed.notify_all();

        if let Err(e) = &result {
            error!(manager = self.name, error = %e, "Reset action failed");
        }
        result
    }

    /// Fail every current and future wait with `Interrupted`.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.changed.notify_all();
    }
}

/// Object-safe view of a reset manager, so loops can hold any group.
pub trait ResetBarrier: Send + Sync {
    fn note_event(&self);

    fn wait_for_reset(&self) -> AgentResult<()>;

    fn add_member(&self);

    fn remove_member(&self);
}

impl<A: ResetAction> ResetBarrier for ResetManager<A> {
    fn note_event(&self) {
        ResetManager::note_event(self)
    }

    fn wait_for_reset(&self) -> AgentResult<()> {
        ResetManager::wait_for_reset(self)
    }

    fn add_member(&self) {
        ResetManager::add_member(self)
    }

    fn remove_member(&self) {
        ResetManager::remove_member(self)
    }
}

/// Membership in a reset group; leaving happens on drop.
pub struct Registration {
    barrier: Arc<dyn ResetBarrier>,
}

impl Registration {
    pub fn new(barrier: Arc<dyn ResetBarrier>) -> Self {
        barrier.add_member();
        Self { barrier }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.barrier.remove_member();
    }
}

/// Recovery for the document and expire pipelines.
pub struct WorkerReset {
    pub store: Arc<dyn JobStore>,
    pub document_queue: Arc<DocumentQueue>,
    pub expire_queue: Arc<DocumentCleanupQueue>,
    pub tracker: Arc<QueueTracker>,
}

impl ResetAction for WorkerReset {
    fn perform_reset(&self) -> AgentResult<()> {
        self.store.reset_document_worker_status()?;
        for set in self.document_queue.reset() {
            for document in &set.documents {
                self.tracker.remove_record(&document.bin_names);
            }
        }
        self.expire_queue.reset();
        Ok(())
    }

    fn wake_waiters(&self) {
        self.document_queue.halt_consumers();
        self.expire_queue.halt_consumers();
    }
}

/// Recovery for the delete pipeline.
pub struct DeleteReset {
    pub store: Arc<dyn JobStore>,
    pub delete_queue: Arc<DocumentDeleteQueue>,
}

impl ResetAction for DeleteReset {
    fn perform_reset(&self) -> AgentResult<()> {
        self.store.reset_document_delete_worker_status()?;
        self.delete_queue.reset();
        Ok(())
    }

    fn wake_waiters(&self) {
        self.delete_queue.halt_consumers();
    }
}

/// Recovery for the seeding thread.
pub struct SeedingReset {
    pub store: Arc<dyn JobStore>,
}

impl ResetAction for SeedingReset {
    fn perform_reset(&self) -> AgentResult<()> {
        self.store.reset_seeding_worker_status()?;
        Ok(())
    }
}

pub type WorkerResetManager = ResetManager<WorkerReset>;
pub type DeleteResetManager = ResetManager<DeleteReset>;
pub type SeedingResetManager = ResetManager<SeedingReset>;
