use crate::activity::SeedingActivity;
use crate::runtime::AgentLoop;
use crate::services::AgentServices;
use crawler_common::datetime::{format_millis, until_millis};
use crawler_common::now_millis;
use crawler_domain::ports::JobStore;
use crawler_domain::{AgentError, AgentResult, ConnectorError, JobSeedingRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Jobs claimed for seeding in one pass. Any job not brought to a final
/// disposition is taken back out of the seeding state, even on panic.
struct SeedingRound<'a> {
    store: &'a dyn JobStore,
    records: Vec<JobSeedingRecord>,
    released: bool,
}

impl<'a> SeedingRound<'a> {
    fn new(store: &'a dyn JobStore, records: Vec<JobSeedingRecord>) -> Self {
        Self {
            store,
            records,
            released: false,
        }
    }

    /// Reset unstarted jobs, reporting the last failure.
    fn finish(mut self) -> AgentResult<()> {
        self.released = true;
        let mut failure = None;
        for record in self.records.iter().filter(|r| !r.was_started()) {
            debug!(job_id = %record.job_id, "Aborting reseed");
            match self.store.reset_seed_job(record.job_id) {
                Ok(()) => {}
                Err(err) => {
                    let err = AgentError::from(err);
                    if err.is_interrupted() {
                        return Err(err);
                    }
                    failure = Some(err);
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

impl Drop for SeedingRound<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for record in self.records.iter().filter(|r| !r.was_started()) {
            if let Err(err) = self.store.reset_seed_job(record.job_id) {
                error!(job_id = %record.job_id, error = %err, "Failed to reset seeding job");
            }
        }
    }
}

/// Enumerates seeds for jobs the store reports as due.
pub struct SeedingThread {
    services: AgentServices,
}

impl SeedingThread {
    pub fn new(services: AgentServices) -> Self {
        Self { services }
    }

    /// Seed one job. `wait` shrinks to the earliest requested retry.
    fn seed_job(
        &self,
        record: &mut JobSeedingRecord,
        current_time: i64,
        wait: &mut Duration,
    ) -> AgentResult<()> {
        let services = &self.services;
        let store = services.store.as_ref();
        let job = store.load_job(record.job_id)?;
        let connection = services.connectors.repository_connection(&job.connection_name)?;
        let connector = match services.connectors.repository_connector(&job.connection_name) {
            Ok(connector) => connector,
            Err(err) => {
                let err = AgentError::from(err);
                if err.must_propagate() {
                    return Err(err);
                }
                warn!(job_id = %job.id, error = %err, "No connector for seeding, skipping job");
                return Ok(());
            }
        };

        debug!(job_id = %job.id, "Getting seeds");
        let mut activity = SeedingActivity::new(
            job.id,
            services.store.clone(),
            services.tracker.clone(),
            connector.clone(),
            Arc::new(connection),
            services.activity_logger.clone(),
        );
        let result = connector
            .add_seed_documents(
                &mut activity,
                &job.specification,
                record.synch_time,
                current_time,
                job.job_type,
            )
            .and_then(|()| {
                activity
                    .done_seeding(connector.is_partial_seeding())
                    .map_err(ConnectorError::from)
            });

        match result {
            Ok(()) => {
                store.note_job_seeded(job.id, current_time)?;
                services.metrics.increment_jobs_seeded();
                debug!(job_id = %job.id, "Successfully seeded job");
            }
            Err(ConnectorError::ServiceInterruption(si)) => {
                if !si.job_inactive_abort {
                    warn!(
                        job_id = %job.id,
                        connection = %job.connection_name,
                        interruption = %si,
                        "Seeding service interruption"
                    );
                }
                if si.is_hard_failure(record.fail_time, record.fail_retry_count) {
                    if si.abort_on_fail {
                        let message = format!(
                            "Repeated service interruptions during seeding: {}",
                            si.message
                        );
                        if store.error_abort(job.id, &message)? {
                            error!(job_id = %job.id, error = %message, "Aborting job");
                        }
                    } else {
                        store.note_job_seeded(job.id, current_time)?;
                    }
                } else {
                    store.retry_seeding(
                        record,
                        si.next_fail_time(record.fail_time),
                        si.next_retry_budget(record.fail_retry_count),
                    )?;
                    debug!(
                        job_id = %job.id,
                        retry_at = %format_millis(si.retry_at),
                        "Seeding will be retried"
                    );
                    let retry_wait = until_millis(si.retry_at, current_time).unwrap_or(Duration::ZERO);
                    *wait = (*wait).min(retry_wait);
                }
            }
            Err(err) => return Err(err.into()),
        }
        record.note_started();
        Ok(())
    }
}

impl AgentLoop for SeedingThread {
    fn name(&self) -> &str {
        "seeding"
    }

    fn run_once(&mut self) -> AgentResult<()> {
        let store = self.services.store.as_ref();
        let interrupt = &self.services.interrupt;
        let current_time = now_millis();
        let mut wait = self.services.intervals.seeding_poll();

        let records = store.get_jobs_ready_for_seeding(current_time)?;
        if records.is_empty() {
            debug!("Seeding thread found nothing to do");
            return interrupt.sleep(wait);
        }
        debug!(jobs = records.len(), "Seeding thread found jobs to seed");

        let mut round = SeedingRound::new(store, records);
        for record in round.records.iter_mut() {
            match self.seed_job(record, current_time, &mut wait) {
                Ok(()) => {}
                Err(err) if err.must_propagate() => return Err(err),
                Err(AgentError::RepositoryConnection(message)) => {
                    // Left unstarted, so the round hands the job back for reseeding
                    warn!(job_id = %record.job_id, error = %message, "Connection unavailable, seeding postponed");
                }
                Err(err) => {
                    if store.error_abort(record.job_id, &err.to_string())? {
                        error!(job_id = %record.job_id, error = %err, "Seeding failed, aborting job");
                    }
                    record.note_started();
                }
            }
        }
        round.finish()?;

        interrupt.sleep(wait)
    }
}
