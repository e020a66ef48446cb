//! Housekeeping threads, and the reprioritization sweep they share with
//! agent startup.

mod idle_cleanup;
mod job_reset;
mod seeding;

pub use idle_cleanup::IdleCleanupThread;
pub use job_reset::JobResetThread;
pub use seeding::SeedingThread;

use crate::carrydown::bins_for;
use crate::services::AgentServices;
use crate::stuffer::JobCache;
use crawler_common::now_millis;
use crawler_domain::ports::RepositoryConnector;
use crawler_domain::{AgentError, AgentResult, DocumentDescription, RepositoryConnection};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Documents fetched per reprioritization round trip
pub const REPRIORITIZATION_BATCH_SIZE: usize = 10_000;

/// Connections and connectors looked up while writing priorities.
pub(crate) struct PriorityContext<'a> {
    services: &'a AgentServices,
    jobs: JobCache<'a>,
    connections: HashMap<String, Arc<RepositoryConnection>>,
    connectors: HashMap<String, Option<Arc<dyn RepositoryConnector>>>,
}

impl<'a> PriorityContext<'a> {
    pub(crate) fn new(services: &'a AgentServices) -> Self {
        Self {
            services,
            jobs: JobCache::new(services.store.as_ref()),
            connections: HashMap::new(),
            connectors: HashMap::new(),
        }
    }

    fn connection(&mut self, name: &str) -> AgentResult<Arc<RepositoryConnection>> {
        if let Some(connection) = self.connections.get(name) {
            return Ok(connection.clone());
        }
        let connection = match self.services.connectors.repository_connection(name) {
            Ok(connection) => connection,
            Err(err) => {
                let err = AgentError::from(err);
                if err.must_propagate() {
                    return Err(err);
                }
                warn!(connection = name, error = %err, "Connection unavailable, prioritizing without throttles");
                RepositoryConnection::new(name, "")
            }
        };
        let connection = Arc::new(connection);
        self.connections.insert(name.to_string(), connection.clone());
        Ok(connection)
    }

    fn connector(&mut self, name: &str) -> AgentResult<Option<Arc<dyn RepositoryConnector>>> {
        if let Some(connector) = self.connectors.get(name) {
            return Ok(connector.clone());
        }
        let connector = match self.services.connectors.repository_connector(name) {
            Ok(connector) => Some(connector),
            Err(err) => {
                let err = AgentError::from(err);
                if err.is_interrupted() {
                    return Err(err);
                }
                debug!(connection = name, error = %err, "No connector, using default bin");
                None
            }
        };
        self.connectors.insert(name.to_string(), connector.clone());
        Ok(connector)
    }
}

/// Compute fresh priorities for `documents` and store them.
pub(crate) fn write_document_priorities(
    context: &mut PriorityContext<'_>,
    documents: &[DocumentDescription],
    current_time: i64,
) -> AgentResult<()> {
    let mut priorities = Vec::with_capacity(documents.len());
    for dd in documents {
        let job = context.jobs.get(dd.job_id)?;
        let connection = context.connection(&job.connection_name)?;
        let connector = context.connector(&job.connection_name)?;
        let bins = bins_for(connector.as_deref(), &dd.document_identifier);
        priorities.push(context.services.tracker.calculate_priority(&bins, &connection));
    }
    context
        .services
        .store
        .write_document_priorities(current_time, documents, &priorities)?;
    Ok(())
}

/// Forget every priority the tracker handed out and recompute them for all
/// documents not yet processed. Depth assessments wait until this returns.
pub fn reprioritize_all_documents(services: &AgentServices) -> AgentResult<()> {
    let started = Instant::now();
    let _sweep = services.tracker.reset_sweep();
    let current_time = now_millis();
    let mut context = PriorityContext::new(services);
    let mut total = 0;

    loop {
        services.interrupt.check()?;
        let documents = services
            .store
            .get_next_not_yet_processed_reprioritization_documents(
                current_time,
                REPRIORITIZATION_BATCH_SIZE,
            )?;
        if documents.is_empty() {
            break;
        }
        total += documents.len();
        write_document_priorities(&mut context, &documents, current_time)?;
    }

    info!(
        documents = total,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Reprioritized documents"
    );
    Ok(())
}
