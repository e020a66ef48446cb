//! Shared wiring for the agent integration tests.

#![allow(dead_code)]

use crawler_common::IntervalConfig;
use crawler_domain::JobDescription;
use crawler_testing::{
    create_test_connection, InMemoryJobStore, MockConnectorRegistry, RecordingActivityLogger,
    RecordingOutputConnector, ScriptedRepositoryConnector,
};
use crawler_worker::AgentServices;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Store, connectors and services around a single `web` connection that
/// indexes into `index`.
pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub connector: Arc<ScriptedRepositoryConnector>,
    pub output: Arc<RecordingOutputConnector>,
    pub registry: Arc<MockConnectorRegistry>,
    pub logger: Arc<RecordingActivityLogger>,
    pub services: AgentServices,
}

impl Harness {
    pub fn new(job: JobDescription) -> Self {
        Self::with_connector(job, ScriptedRepositoryConnector::new("web").with_max_documents(10))
    }

    pub fn with_connector(job: JobDescription, connector: ScriptedRepositoryConnector) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        store.insert_job(job);
        let connector = Arc::new(connector);
        let output = Arc::new(RecordingOutputConnector::new());
        let registry = Arc::new(
            MockConnectorRegistry::new()
                .with_repository(create_test_connection("web"), connector.clone())
                .with_output("index", output.clone()),
        );
        let logger = Arc::new(RecordingActivityLogger::new());
        let services = AgentServices::new(store.clone(), registry.clone())
            .with_activity_logger(logger.clone())
            .with_intervals(IntervalConfig::default().scaled(1_000));
        Self {
            store,
            connector,
            output,
            registry,
            logger,
            services,
        }
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
