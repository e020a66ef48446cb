use crate::runtime::AgentLoop;
use crate::services::AgentServices;
use crawler_domain::AgentResult;
use tracing::debug;

/// Lets pooled connectors release idle resources.
pub struct IdleCleanupThread {
    services: AgentServices,
}

impl IdleCleanupThread {
    pub fn new(services: AgentServices) -> Self {
        Self { services }
    }
}

impl AgentLoop for IdleCleanupThread {
    fn name(&self) -> &str {
        "idle-cleanup"
    }

    fn run_once(&mut self) -> AgentResult<()> {
        self.services.connectors.poll_all()?;
        debug!("Polled connectors");
        self.services
            .interrupt
            .sleep(self.services.intervals.idle_cleanup_poll())
    }
}
