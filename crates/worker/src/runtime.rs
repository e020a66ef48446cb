//! Thread loop shared by every agent role.
//!
//! A role supplies one iteration of work; [`run_agent_loop`] supplies the
//! reset rendezvous, the error dispatch and panic containment, so that no
//! role can die quietly and leave claimed documents behind.

use crate::interrupt::InterruptToken;
use crate::reset::{Registration, ResetBarrier};
use crawler_domain::AgentError;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One agent thread's work.
pub trait AgentLoop: Send {
    /// Thread name, also used in logs
    fn name(&self) -> &str;

    /// Perform one unit of work. Pending resets have already been waited for.
    fn run_once(&mut self) -> Result<(), AgentError>;

    /// Extra recovery after a job store connection error. Runs before the
    /// event is noted with the reset group.
    fn on_database_error(&mut self) {}
}

/// Called for setup errors no retry can fix. The agent binary exits the
/// process; tests record the call instead.
pub type FatalHook = Arc<dyn Fn(&AgentError) + Send + Sync>;

/// Fatal hook that terminates the process.
pub fn exit_process_hook() -> FatalHook {
    Arc::new(|err: &AgentError| {
        error!(error = %err, "Fatal setup error, exiting");
        std::process::exit(1);
    })
}

/// What a loop needs besides its role.
#[derive(Clone)]
pub struct LoopContext {
    pub interrupt: InterruptToken,
    /// Reset group the role belongs to, if any
    pub reset: Option<Arc<dyn ResetBarrier>>,
    /// Pause after a job store connection error
    pub database_backoff: Duration,
    pub fatal: FatalHook,
}

impl LoopContext {
    pub fn new(interrupt: InterruptToken, database_backoff: Duration, fatal: FatalHook) -> Self {
        Self {
            interrupt,
            reset: None,
            database_backoff,
            fatal,
        }
    }

    pub fn with_reset(mut self, reset: Arc<dyn ResetBarrier>) -> Self {
        self.reset = Some(reset);
        self
    }
}

/// Run `role` until interrupted or a fatal setup error.
pub fn run_agent_loop<L: AgentLoop + ?Sized>(role: &mut L, ctx: &LoopContext) {
    loop {
        if ctx.interrupt.is_interrupted() {
            break;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if let Some(reset) = &ctx.reset {
                reset.wait_for_reset()?;
            }
            role.run_once()
        }));

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                error!(
                    role = role.name(),
                    panic = %panic_message(panic.as_ref()),
                    "Thread iteration panicked, continuing"
                );
                if ctx.interrupt.sleep(ctx.database_backoff).is_err() {
                    break;
                }
                continue;
            }
        };

        match result {
            Ok(()) => {}
            Err(AgentError::Interrupted) => break,
            Err(AgentError::DatabaseConnection(message)) => {
                role.on_database_error();
                if let Some(reset) = &ctx.reset {
                    reset.note_event();
                }
                error!(
                    role = role.name(),
                    error = %message,
                    "Aborting and restarting due to database connection reset"
                );
                if ctx.interrupt.sleep(ctx.database_backoff).is_err() {
                    break;
                }
            }
            Err(AgentError::ServiceInterruption(si)) => {
                warn!(role = role.name(), interruption = %si, "Service interruption");
            }
            Err(err @ AgentError::SetupFatal(_)) => {
                error!(role = role.name(), error = %err, "Setup error");
                (ctx.fatal)(&err);
                break;
            }
            Err(AgentError::RepositoryConnection(message)) => {
                warn!(role = role.name(), error = %message, "Repository connection unavailable");
            }
            Err(err @ AgentError::Unexpected(_)) => {
                error!(role = role.name(), error = %err, "Exception tossed, continuing");
            }
        }
    }
    debug!(role = role.name(), "Loop finished");
}

/// Start `role` on its own named thread. Registration with the reset group
/// happens before the thread starts, so a recovery cannot run while the new
/// thread is still on its way in.
pub fn spawn_role<L>(mut role: L, ctx: LoopContext) -> std::io::Result<JoinHandle<()>>
where
    L: AgentLoop + 'static,
{
    let registration = ctx.reset.clone().map(Registration::new);
    let name = role.name().to_string();

    thread::Builder::new().name(name).spawn(move || {
        let _registration = registration;
        info!(role = role.name(), "Thread started");
        run_agent_loop(&mut role, &ctx);
        info!(role = role.name(), "Thread stopped");
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
