//! Scripted connectors and a connector registry for tests.

use crawler_domain::activity::{ACTIVITY_DOCUMENT_DELETE, ACTIVITY_FETCH};
use crawler_domain::ports::{
    ConnectorRegistry, ConnectorResult, OutputConnector, ProcessActivity, RepositoryConnector,
    SeedActivity,
};
use crawler_domain::{
    ActivityRecord, ConnectorError, DocumentDescription, JobDescription, JobType,
    RepositoryConnection, ServiceInterruption, DEFAULT_BIN,
};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Host part of a URL-like identifier, used as its bin.
pub fn host_bin(document_identifier: &str) -> String {
    let rest = document_identifier
        .split_once("://")
        .map_or(document_identifier, |(_, rest)| rest);
    match rest.split('/').next() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => DEFAULT_BIN.to_string(),
    }
}

/// What the connector does with the next batch it is handed.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Fetch every document
    Complete,
    /// Report every document gone from the repository
    Delete,
    /// Abort every document
    Abort,
    Interrupt(ServiceInterruption),
    Fail(String),
    /// The repository cannot be reached right now
    Unavailable,
    Panic(String),
}

/// Repository connector that replays scripted outcomes. Unscripted batches
/// complete normally.
pub struct ScriptedRepositoryConnector {
    connection_name: String,
    max_documents: usize,
    partial_seeding: bool,
    seeds: Mutex<Vec<String>>,
    seed_outcomes: Mutex<VecDeque<ConnectorResult<()>>>,
    process_outcomes: Mutex<VecDeque<ProcessOutcome>>,
    processed: Mutex<Vec<String>>,
    polls: AtomicUsize,
}

impl ScriptedRepositoryConnector {
    pub fn new(connection_name: impl Into<String>) -> Self {
        Self {
            connection_name: connection_name.into(),
            max_documents: 1,
            partial_seeding: false,
            seeds: Mutex::new(Vec::new()),
            seed_outcomes: Mutex::new(VecDeque::new()),
            process_outcomes: Mutex::new(VecDeque::new()),
            processed: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn with_max_documents(mut self, max_documents: usize) -> Self {
        self.max_documents = max_documents;
        self
    }

    pub fn with_partial_seeding(mut self) -> Self {
        self.partial_seeding = true;
        self
    }

    pub fn with_seeds<I, S>(self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seeds.lock().extend(seeds.into_iter().map(Into::into));
        self
    }

    /// Script the next batch.
    pub fn push_outcome(&self, outcome: ProcessOutcome) {
        self.process_outcomes.lock().push_back(outcome);
    }

    /// Script the next seeding pass.
    pub fn push_seed_outcome(&self, outcome: ConnectorResult<()>) {
        self.seed_outcomes.lock().push_back(outcome);
    }

    /// Identifiers of every document handed to the connector, in order.
    pub fn processed(&self) -> Vec<String> {
        self.processed.lock().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl RepositoryConnector for ScriptedRepositoryConnector {
    fn bin_names(&self, document_identifier: &str) -> Vec<String> {
        vec![host_bin(document_identifier)]
    }

    fn max_document_request(&self) -> usize {
        self.max_documents
    }

    fn is_partial_seeding(&self) -> bool {
        self.partial_seeding
    }

    fn add_seed_documents(
        &self,
        activity: &mut dyn SeedActivity,
        _specification: &IndexMap<String, String>,
        _last_sync_time: i64,
        _current_time: i64,
        _job_type: JobType,
    ) -> ConnectorResult<()> {
        if let Some(outcome) = self.seed_outcomes.lock().pop_front() {
            outcome?;
        }
        let seeds = self.seeds.lock().clone();
        for seed in &seeds {
            activity.add_seed_document(seed)?;
        }
        Ok(())
    }

    fn process_documents(
        &self,
        documents: &[DocumentDescription],
        job: &JobDescription,
        activity: &mut dyn ProcessActivity,
    ) -> ConnectorResult<()> {
        self.processed
            .lock()
            .extend(documents.iter().map(|dd| dd.document_identifier.clone()));
        let outcome = self
            .process_outcomes
            .lock()
            .pop_front()
            .unwrap_or(ProcessOutcome::Complete);

        match outcome {
            ProcessOutcome::Complete => {
                for dd in documents {
                    activity.record_activity(
                        ActivityRecord::new(
                            job.connection_name.clone(),
                            ACTIVITY_FETCH,
                            dd.document_identifier.clone(),
                        )
                        .with_result("OK", "fetched"),
                    );
                }
                Ok(())
            }
            ProcessOutcome::Delete => {
                for dd in documents {
                    activity.delete_document(&dd.document_identifier);
                }
                Ok(())
            }
            ProcessOutcome::Abort => {
                for dd in documents {
                    activity.abort_document(&dd.document_identifier);
                }
                Ok(())
            }
            ProcessOutcome::Interrupt(si) => Err(ConnectorError::ServiceInterruption(si)),
            ProcessOutcome::Fail(message) => Err(ConnectorError::Failure(message)),
            ProcessOutcome::Unavailable => Err(ConnectorError::Unavailable(self.connection_name.clone())),
            ProcessOutcome::Panic(message) => {
                panic!("{} connector panicked: {message}", self.connection_name)
            }
        }
    }

    fn poll(&self) -> ConnectorResult<()> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Output connector that records every deletion.
#[derive(Default)]
pub struct RecordingOutputConnector {
    deleted: Mutex<Vec<(String, String)>>,
    outcomes: Mutex<VecDeque<ConnectorResult<()>>>,
    calls: AtomicUsize,
}

impl RecordingOutputConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next delete call.
    pub fn push_outcome(&self, outcome: ConnectorResult<()>) {
        self.outcomes.lock().push_back(outcome);
    }

    /// `(document class, identifier hash)` of every deleted document.
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OutputConnector for RecordingOutputConnector {
    fn delete_documents(
        &self,
        document_class: &str,
        document_hashes: &[String],
    ) -> ConnectorResult<Vec<ActivityRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(outcome) = self.outcomes.lock().pop_front() {
            outcome?;
        }
        let mut deleted = self.deleted.lock();
        Ok(document_hashes
            .iter()
            .map(|hash| {
                deleted.push((document_class.to_string(), hash.clone()));
                ActivityRecord::new(document_class, ACTIVITY_DOCUMENT_DELETE, hash.clone())
                    .with_result("OK", "deleted")
            })
            .collect())
    }
}

/// Registry over fixed connection and connector maps.
#[derive(Default)]
pub struct MockConnectorRegistry {
    connections: RwLock<HashMap<String, RepositoryConnection>>,
    repository_connectors: RwLock<HashMap<String, Arc<dyn RepositoryConnector>>>,
    output_connectors: RwLock<HashMap<String, Arc<dyn OutputConnector>>>,
    unavailable: RwLock<HashSet<String>>,
    poll_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MockConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(
        self,
        connection: RepositoryConnection,
        connector: Arc<dyn RepositoryConnector>,
    ) -> Self {
        self.repository_connectors
            .write()
            .insert(connection.name.clone(), connector);
        self.connections.write().insert(connection.name.clone(), connection);
        self
    }

    /// A connection whose connector cannot be instantiated.
    pub fn with_connection_only(self, connection: RepositoryConnection) -> Self {
        self.connections.write().insert(connection.name.clone(), connection);
        self
    }

    pub fn with_output(self, name: impl Into<String>, connector: Arc<dyn OutputConnector>) -> Self {
        self.output_connectors.write().insert(name.into(), connector);
        self
    }

    pub fn remove_repository_connector(&self, connection_name: &str) {
        self.repository_connectors.write().remove(connection_name);
    }

    pub fn remove_output_connector(&self, connection_name: &str) {
        self.output_connectors.write().remove(connection_name);
    }

    /// Lookups of `name` fail as if its repository were briefly down.
    pub fn set_connection_unavailable(&self, name: &str, unavailable: bool) {
        let mut names = self.unavailable.write();
        if unavailable {
            names.insert(name.to_string());
        } else {
            names.remove(name);
        }
    }

    pub fn poll_count(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl ConnectorRegistry for MockConnectorRegistry {
    fn repository_connection(&self, name: &str) -> ConnectorResult<RepositoryConnection> {
        if self.unavailable.read().contains(name) {
            return Err(ConnectorError::Unavailable(name.to_string()));
        }
        self.connections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectorError::Failure(format!("No such connection: {name}")))
    }

    fn repository_connector(&self, connection_name: &str) -> ConnectorResult<Arc<dyn RepositoryConnector>> {
        self.repository_connectors
            .read()
            .get(connection_name)
            .cloned()
            .ok_or_else(|| ConnectorError::Unavailable(connection_name.to_string()))
    }

    fn output_connector(&self, connection_name: &str) -> ConnectorResult<Arc<dyn OutputConnector>> {
        self.output_connectors
            .read()
            .get(connection_name)
            .cloned()
            .ok_or_else(|| ConnectorError::Unavailable(connection_name.to_string()))
    }

    fn poll_all(&self) -> ConnectorResult<()> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        for connector in self.repository_connectors.read().values() {
            connector.poll()?;
        }
        for connector in self.output_connectors.read().values() {
            connector.poll()?;
        }
        Ok(())
    }

    fn close_all(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_bin() {
        assert_eq!(host_bin("http://a.example/x/y"), "a.example");
        assert_eq!(host_bin("b.example/z"), "b.example");
        assert_eq!(host_bin("/relative"), DEFAULT_BIN);
    }

    #[test]
    fn test_registry_reports_missing_connector_as_unavailable() {
        let registry = MockConnectorRegistry::new()
            .with_connection_only(RepositoryConnection::new("web", "scripted"));
        assert!(registry.repository_connection("web").is_ok());
        assert!(matches!(
            registry.repository_connector("web"),
            Err(ConnectorError::Unavailable(_))
        ));
    }
}
