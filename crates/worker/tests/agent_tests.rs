//! Whole-agent lifecycle with every thread role running.

mod common;

use common::wait_until;
use crawler_domain::ports::{ConfigurationSection, ConfigurationStore};
use crawler_domain::{AgentError, JobId, JobStatus, StoreError};
use crawler_testing::{
    create_test_config, create_test_connection, DocumentStatus, InMemoryConfigurationStore,
    InMemoryJobStore, JobBuilder, MockConnectorRegistry, RecordingActivityLogger,
    RecordingOutputConnector, ScriptedRepositoryConnector,
};
use crawler_worker::{export_configuration, import_configuration, Agent, AgentServices, ExportError, FatalHook};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SETTLE: Duration = Duration::from_secs(10);

struct Fixture {
    store: Arc<InMemoryJobStore>,
    registry: Arc<MockConnectorRegistry>,
    fatal_errors: Arc<Mutex<Vec<String>>>,
    agent: Agent,
}

impl Fixture {
    fn new(seeds: &[&str]) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        store.insert_job(JobBuilder::new(1).build());
        if !seeds.is_empty() {
            store.schedule_seeding(JobId(1));
        }
        let connector = Arc::new(
            ScriptedRepositoryConnector::new("web")
                .with_max_documents(4)
                .with_seeds(seeds.iter().copied()),
        );
        let registry = Arc::new(
            MockConnectorRegistry::new()
                .with_repository(create_test_connection("web"), connector)
                .with_output("index", Arc::new(RecordingOutputConnector::new())),
        );
        let services = AgentServices::new(store.clone(), registry.clone())
            .with_activity_logger(Arc::new(RecordingActivityLogger::new()));

        let fatal_errors = Arc::new(Mutex::new(Vec::new()));
        let recorded = fatal_errors.clone();
        let fatal: FatalHook = Arc::new(move |err: &AgentError| recorded.lock().push(err.to_string()));
        let agent = Agent::new(create_test_config(2), services).with_fatal_hook(fatal);

        Self {
            store,
            registry,
            fatal_errors,
            agent,
        }
    }
}

#[test]
fn test_seeded_job_runs_to_completion() {
    let seeds: Vec<String> = (0..12)
        .map(|i| format!("http://host{}.example/{i}", i % 3))
        .collect();
    let seeds: Vec<&str> = seeds.iter().map(String::as_str).collect();
    let mut fixture = Fixture::new(&seeds);

    fixture.agent.start().unwrap();
    assert!(fixture.agent.is_running());

    let store = fixture.store.clone();
    assert!(wait_until(SETTLE, || {
        store.count_with_status(DocumentStatus::Completed) == 12
    }));
    assert!(wait_until(SETTLE, || {
        store.job_status(JobId(1)) == Some(JobStatus::Inactive)
    }));

    let tracker = fixture.agent.services().tracker.clone();
    fixture.agent.stop();
    assert!(!fixture.agent.is_running());
    assert_eq!(fixture.agent.live_threads(), 0);
    for host in ["host0.example", "host1.example", "host2.example"] {
        assert_eq!(tracker.queued_count(host), 0);
        assert_eq!(tracker.active_count(host), 0);
    }
    assert_eq!(fixture.agent.services().metrics.jobs_seeded(), 1);
    assert!(fixture.fatal_errors.lock().is_empty());
}

#[test]
fn test_start_spawns_every_role_and_stop_closes_connectors_once() {
    let mut fixture = Fixture::new(&[]);
    fixture.agent.start().unwrap();
    // A second start is a no-op
    fixture.agent.start().unwrap();

    // Stuffer and two workers, expire stuffer and worker, delete stuffer
    // and worker, seeding, job reset, idle cleanup
    assert_eq!(fixture.agent.live_threads(), 10);

    fixture.agent.stop();
    fixture.agent.stop();
    assert_eq!(fixture.registry.close_count(), 1);
    assert_eq!(fixture.store.calls("prepare_for_start"), 1);
}

#[test]
fn test_stopped_agent_cannot_restart() {
    let mut fixture = Fixture::new(&[]);
    fixture.agent.start().unwrap();
    fixture.agent.stop();

    let err = fixture.agent.start().unwrap_err();
    assert!(matches!(err, AgentError::SetupFatal(_)));
    assert_eq!(fixture.store.calls("prepare_for_start"), 1);
}

#[test]
fn test_stop_before_start_does_nothing() {
    let mut fixture = Fixture::new(&[]);
    fixture.agent.stop();
    assert_eq!(fixture.registry.close_count(), 0);
}

#[test]
fn test_startup_failure_is_reported() {
    let mut fixture = Fixture::new(&[]);
    fixture
        .store
        .fail_next("prepare_for_start", StoreError::Connection("refused".to_string()));

    let err = fixture.agent.start().unwrap_err();
    assert!(matches!(err, AgentError::DatabaseConnection(_)));
    assert!(!fixture.agent.is_running());
}

#[test]
fn test_setup_error_reaches_the_fatal_hook() {
    let mut fixture = Fixture::new(&[]);
    fixture
        .store
        .fail_next("get_next_documents", StoreError::Setup("schema missing".to_string()));

    fixture.agent.start().unwrap();
    let fatal_errors = fixture.fatal_errors.clone();
    assert!(wait_until(SETTLE, || !fatal_errors.lock().is_empty()));
    fixture.agent.stop();

    let errors = fixture.fatal_errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("schema missing"));
}

#[test]
fn test_lost_connection_resets_the_worker_group() {
    let mut fixture = Fixture::new(&[]);
    for i in 0..6 {
        fixture
            .store
            .insert_pending(JobId(1), &format!("http://a.example/{i}"));
    }
    fixture
        .store
        .fail_next("get_next_documents", StoreError::Connection("reset by peer".to_string()));

    fixture.agent.start().unwrap();
    let store = fixture.store.clone();
    assert!(wait_until(SETTLE, || store.calls("reset_document_worker_status") >= 1));
    // The pipeline carries on after the recovery
    assert!(wait_until(SETTLE, || {
        store.count_with_status(DocumentStatus::Completed) == 6
    }));
    fixture.agent.stop();

    assert_eq!(store.calls("reset_document_delete_worker_status"), 0);
    assert!(fixture.fatal_errors.lock().is_empty());
}

#[test]
fn test_deleted_job_documents_leave_the_index() {
    let mut fixture = Fixture::new(&[]);
    let store = fixture.store.clone();
    for i in 0..7 {
        store.insert_pending(JobId(1), &format!("http://a.example/{i}"));
    }
    store.set_job_status(JobId(1), JobStatus::Inactive);
    store.mark_job_for_deletion(JobId(1));

    fixture.agent.start().unwrap();
    assert!(wait_until(SETTLE, || store.document_count() == 0));
    fixture.agent.stop();
}

fn sample_configuration() -> InMemoryConfigurationStore {
    InMemoryConfigurationStore::new()
        .with_section(ConfigurationSection::Outputs, r#"[{"name":"index"}]"#)
        .with_section(ConfigurationSection::Connections, r#"[{"name":"web"}]"#)
        .with_section(ConfigurationSection::Jobs, r#"[{"id":1}]"#)
}

#[test]
fn test_export_writes_sections_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.zip");
    export_configuration(&sample_configuration(), &path).unwrap();

    let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(names, ["outputs", "authorities", "connections", "jobs"]);

    let mut jobs = String::new();
    archive
        .by_name("jobs")
        .unwrap()
        .read_to_string(&mut jobs)
        .unwrap();
    assert_eq!(jobs, r#"[{"id":1}]"#);
}

#[test]
fn test_import_restores_an_export() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.zip");
    let source = sample_configuration();
    export_configuration(&source, &path).unwrap();

    let target = InMemoryConfigurationStore::new();
    import_configuration(&target, &path).unwrap();

    assert_eq!(target.imported(), ConfigurationSection::ALL.to_vec());
    for section in ConfigurationSection::ALL {
        assert_eq!(
            target.export_section(section).unwrap(),
            source.export_section(section).unwrap()
        );
    }
}

#[test]
fn test_failed_export_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.zip");
    let store = sample_configuration();
    store.fail_export_of(ConfigurationSection::Connections);

    let err = export_configuration(&store, &path).unwrap_err();
    assert!(matches!(err, ExportError::Store(_)));
    assert!(!path.exists());
}

#[test]
fn test_import_rejects_unknown_entries_before_writing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("foreign.zip");
    {
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("jobs", options).unwrap();
        writer.write_all(b"[]").unwrap();
        writer.start_file("passwords", options).unwrap();
        writer.write_all(b"hunter2").unwrap();
        writer.finish().unwrap();
    }

    let target = InMemoryConfigurationStore::new();
    let err = import_configuration(&target, &path).unwrap_err();
    assert!(matches!(err, ExportError::UnknownEntry(ref name) if name == "passwords"));
    assert!(target.imported().is_empty());
}

#[test]
fn test_agent_without_configuration_store_cannot_export() {
    let fixture = Fixture::new(&[]);
    let dir = TempDir::new().unwrap();
    let err = fixture
        .agent
        .export_configuration(&dir.path().join("config.zip"))
        .unwrap_err();
    assert!(matches!(err, ExportError::NoConfigurationStore));
}

#[test]
fn test_agent_exports_through_its_configuration_store() {
    let fixture = Fixture::new(&[]);
    let configuration = Arc::new(sample_configuration());
    let agent = fixture.agent.with_configuration_store(configuration.clone());
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.zip");

    agent.export_configuration(&path).unwrap();
    agent.import_configuration(&path).unwrap();
    assert_eq!(configuration.imported().len(), 4);
}
