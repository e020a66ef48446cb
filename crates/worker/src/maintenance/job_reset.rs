use super::reprioritize_all_documents;
use crate::runtime::AgentLoop;
use crate::services::AgentServices;
use crawler_common::now_millis;
use crawler_domain::activity::{ACTIVITY_JOB_CONTINUE, ACTIVITY_JOB_END, ACTIVITY_JOB_STOP};
use crawler_domain::{ActivityRecord, AgentResult, JobDescription};
use tracing::debug;

/// Moves jobs through their stop, resume and completion transitions, and
/// reprioritizes the queue after any stop.
pub struct JobResetThread {
    services: AgentServices,
}

impl JobResetThread {
    pub fn new(services: AgentServices) -> Self {
        Self { services }
    }

    fn record_history(&self, jobs: &[JobDescription], activity_type: &str) {
        for job in jobs {
            self.services.activity_logger.record_activity(ActivityRecord::new(
                job.connection_name.clone(),
                activity_type,
                job.history_label(),
            ));
        }
    }
}

impl AgentLoop for JobResetThread {
    fn name(&self) -> &str {
        "job-reset"
    }

    fn run_once(&mut self) -> AgentResult<()> {
        let store = self.services.store.as_ref();
        let current_time = now_millis();

        let stops = store.finish_job_stops(current_time)?;
        let resumes = store.finish_job_resumes(current_time)?;
        let completions = store.reset_jobs(current_time)?;

        // The store will not report these transitions again
        self.record_history(&stops, ACTIVITY_JOB_STOP);
        self.record_history(&resumes, ACTIVITY_JOB_CONTINUE);
        self.record_history(&completions, ACTIVITY_JOB_END);

        // A stop invalidates every priority handed out so far
        if !stops.is_empty() {
            debug!(jobs = stops.len(), "Job reset thread reprioritizing documents");
            reprioritize_all_documents(&self.services)?;
        }

        self.services
            .interrupt
            .sleep(self.services.intervals.job_reset_poll())
    }
}
