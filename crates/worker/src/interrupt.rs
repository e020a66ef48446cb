//! Cooperative shutdown signal shared by every agent thread.

use crawler_domain::{AgentError, AgentResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shutdown flag with an interruptible sleep.
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Clone, Default)]
pub struct InterruptToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    interrupted: Mutex<bool>,
    wake: Condvar,
}

impl InterruptToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown and wake every sleeper.
    pub fn interrupt(&self) {
        let mut interrupted = self.inner.interrupted.lock();
        *interrupted = true;
        self.inner.wake.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        *self.inner.interrupted.lock()
    }

    /// `Err(Interrupted)` once shutdown has been signalled.
    pub fn check(&self) -> AgentResult<()> {
        if self.is_interrupted() {
            Err(AgentError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, returning early with `Err(Interrupted)` on shutdown.
    pub fn sleep(&self, duration: Duration) -> AgentResult<()> {
        let deadline = Instant::now() + duration;
        let mut interrupted = self.inner.interrupted.lock();
        while !*interrupted {
            if self.inner.wake.wait_until(&mut interrupted, deadline).timed_out() {
                break;
            }
        }
        if *interrupted {
            Err(AgentError::Interrupted)
        } else {
            Ok(())
        }
    }
}
