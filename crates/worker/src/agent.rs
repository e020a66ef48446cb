//! The agent: owns the queues and reset groups, starts every thread role
//! and shuts them all down again.

use crate::maintenance::{reprioritize_all_documents, IdleCleanupThread, JobResetThread, SeedingThread};
use crate::queue::{DocumentCleanupQueue, DocumentDeleteQueue, DocumentQueue};
use crate::reset::{
    DeleteReset, DeleteResetManager, ResetBarrier, SeedingReset, SeedingResetManager, WorkerReset,
    WorkerResetManager,
};
use crate::runtime::{exit_process_hook, spawn_role, AgentLoop, FatalHook, LoopContext};
use crate::services::AgentServices;
use crate::stuffer::{DeleteStuffer, DocumentStuffer, ExpireStuffer};
use crate::workers::{DeleteWorker, DocumentWorker, ExpireWorker};
use crawler_common::CrawlerConfig;
use crawler_domain::ports::{ConfigurationSection, ConfigurationStore};
use crawler_domain::{AgentError, AgentResult, StoreError};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};
use zip::write::SimpleFileOptions;

/// Configuration archive errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("No configuration store attached")]
    NoConfigurationStore,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown archive entry: {0}")]
    UnknownEntry(String),
}

/// Everything that exists only while the agent runs.
struct RunningAgent {
    document_queue: Arc<DocumentQueue>,
    delete_queue: Arc<DocumentDeleteQueue>,
    expire_queue: Arc<DocumentCleanupQueue>,
    worker_reset: Arc<WorkerResetManager>,
    delete_reset: Arc<DeleteResetManager>,
    seeding_reset: Arc<SeedingResetManager>,
    handles: Vec<JoinHandle<()>>,
}

impl RunningAgent {
    fn interrupt(&self) {
        self.document_queue.interrupt();
        self.delete_queue.interrupt();
        self.expire_queue.interrupt();
        self.worker_reset.interrupt();
        self.delete_reset.interrupt();
        self.seeding_reset.interrupt();
    }
}

enum AgentState {
    Idle,
    Running(RunningAgent),
    Stopped,
}

/// The crawler agent.
pub struct Agent {
    config: CrawlerConfig,
    services: AgentServices,
    configuration_store: Option<Arc<dyn ConfigurationStore>>,
    fatal: FatalHook,
    state: AgentState,
}

impl Agent {
    /// The agent's threads sleep according to `config.intervals`, which
    /// replace whatever `services` carried.
    pub fn new(config: CrawlerConfig, services: AgentServices) -> Self {
        let services = services.with_intervals(config.intervals.clone());
        Self {
            config,
            services,
            configuration_store: None,
            fatal: exit_process_hook(),
            state: AgentState::Idle,
        }
    }

    pub fn with_configuration_store(mut self, store: Arc<dyn ConfigurationStore>) -> Self {
        self.configuration_store = Some(store);
        self
    }

    /// Replace the default fatal hook, which exits the process.
    pub fn with_fatal_hook(mut self, fatal: FatalHook) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn services(&self) -> &AgentServices {
        &self.services
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, AgentState::Running(_))
    }

    /// Number of agent threads still alive.
    pub fn live_threads(&self) -> usize {
        match &self.state {
            AgentState::Running(running) => {
                running.handles.iter().filter(|h| !h.is_finished()).count()
            }
            _ => 0,
        }
    }

    /// Recover leftovers of a previous run, recompute priorities, and start
    /// every thread. Starting a running agent does nothing; a stopped agent
    /// cannot be restarted.
    pub fn start(&mut self) -> AgentResult<()> {
        match self.state {
            AgentState::Running(_) => return Ok(()),
            AgentState::Stopped => {
                return Err(AgentError::SetupFatal(
                    "Agent has been stopped and cannot be restarted".to_string(),
                ))
            }
            AgentState::Idle => {}
        }
        let config = &self.config;
        info!(
            threads = config.threads,
            delete_threads = config.delete_threads,
            expire_threads = config.expire_threads,
            "Starting crawler agent"
        );

        self.services.store.prepare_for_start()?;
        reprioritize_all_documents(&self.services)?;

        let services = &self.services;
        let store = services.store.clone();
        let document_queue = Arc::new(DocumentQueue::new(config.low_water_factor));
        let delete_queue = Arc::new(DocumentDeleteQueue::new(config.low_water_factor));
        let expire_queue = Arc::new(DocumentCleanupQueue::new(config.low_water_factor));
        let worker_reset = Arc::new(WorkerResetManager::new(
            "worker",
            WorkerReset {
                store: store.clone(),
                document_queue: document_queue.clone(),
                expire_queue: expire_queue.clone(),
                tracker: services.tracker.clone(),
            },
        ));
        let delete_reset = Arc::new(DeleteResetManager::new(
            "delete",
            DeleteReset {
                store: store.clone(),
                delete_queue: delete_queue.clone(),
            },
        ));
        let seeding_reset = Arc::new(SeedingResetManager::new(
            "seeding",
            SeedingReset { store },
        ));

        let mut running = RunningAgent {
            document_queue,
            delete_queue,
            expire_queue,
            worker_reset,
            delete_reset,
            seeding_reset,
            handles: Vec::new(),
        };

        if let Err(err) = self.spawn_all(&mut running) {
            error!(error = %err, "Failed to start agent threads");
            self.state = AgentState::Running(running);
            self.stop();
            return Err(AgentError::SetupFatal(format!(
                "Could not start agent thread: {err}"
            )));
        }

        info!(threads = running.handles.len(), "Crawler agent started");
        self.state = AgentState::Running(running);
        Ok(())
    }

    fn spawn_all(&self, running: &mut RunningAgent) -> std::io::Result<()> {
        let config = &self.config;
        let services = &self.services;
        let context = LoopContext::new(
            services.interrupt.clone(),
            services.intervals.database_backoff(),
            self.fatal.clone(),
        );
        let worker_context = context
            .clone()
            .with_reset(running.worker_reset.clone() as Arc<dyn ResetBarrier>);
        let delete_context = context
            .clone()
            .with_reset(running.delete_reset.clone() as Arc<dyn ResetBarrier>);
        let seeding_context = context
            .clone()
            .with_reset(running.seeding_reset.clone() as Arc<dyn ResetBarrier>);
        let handles = &mut running.handles;

        spawn_into(
            handles,
            DocumentStuffer::new(
                services.clone(),
                running.document_queue.clone(),
                config.threads,
                config.stuff_amount_factor,
            ),
            &worker_context,
        )?;
        for index in 0..config.threads {
            spawn_into(
                handles,
                DocumentWorker::new(index, services.clone(), running.document_queue.clone()),
                &worker_context,
            )?;
        }

        spawn_into(
            handles,
            ExpireStuffer::new(
                services.clone(),
                running.expire_queue.clone(),
                config.expire_threads,
                config.delete_batch_size,
            ),
            &worker_context,
        )?;
        for index in 0..config.expire_threads {
            spawn_into(
                handles,
                ExpireWorker::new(index, services.clone(), running.expire_queue.clone()),
                &worker_context,
            )?;
        }

        spawn_into(
            handles,
            DeleteStuffer::new(
                services.clone(),
                running.delete_queue.clone(),
                config.delete_threads,
                config.delete_batch_size,
            ),
            &delete_context,
        )?;
        for index in 0..config.delete_threads {
            spawn_into(
                handles,
                DeleteWorker::new(index, services.clone(), running.delete_queue.clone()),
                &delete_context,
            )?;
        }

        spawn_into(handles, SeedingThread::new(services.clone()), &seeding_context)?;
        spawn_into(handles, JobResetThread::new(services.clone()), &context)?;
        spawn_into(handles, IdleCleanupThread::new(services.clone()), &context)?;
        Ok(())
    }

    /// Interrupt every thread, wait for all of them to exit and release the
    /// connectors. Safe to call more than once.
    pub fn stop(&mut self) {
        let running = match std::mem::replace(&mut self.state, AgentState::Stopped) {
            AgentState::Running(running) => running,
            other => {
                self.state = other;
                return;
            }
        };
        info!("Shutting down crawler agent");

        self.services.interrupt.interrupt();
        self.services.tracker.interrupt();
        running.interrupt();

        let grace = self.services.intervals.shutdown_grace();
        loop {
            let alive = running.handles.iter().filter(|h| !h.is_finished()).count();
            if alive == 0 {
                break;
            }
            debug!(alive, "Waiting for agent threads to exit");
            std::thread::sleep(grace);
        }

        for handle in running.handles {
            let name = handle.thread().name().unwrap_or("agent").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "Agent thread ended with a panic");
            }
        }

        self.services.connectors.close_all();
        info!("Crawler agent stopped");
    }

    /// Write every configuration section into a zip archive at `path`. A
    /// failed export leaves no file behind.
    pub fn export_configuration(&self, path: &Path) -> Result<(), ExportError> {
        let store = self
            .configuration_store
            .as_deref()
            .ok_or(ExportError::NoConfigurationStore)?;
        export_configuration(store, path)
    }

    /// Replace configuration from an archive written by `export_configuration`.
    pub fn import_configuration(&self, path: &Path) -> Result<(), ExportError> {
        let store = self
            .configuration_store
            .as_deref()
            .ok_or(ExportError::NoConfigurationStore)?;
        import_configuration(store, path)
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_into<L>(
    handles: &mut Vec<JoinHandle<()>>,
    role: L,
    context: &LoopContext,
) -> std::io::Result<()>
where
    L: AgentLoop + 'static,
{
    handles.push(spawn_role(role, context.clone())?);
    Ok(())
}

/// Write sections in [`ConfigurationSection::ALL`] order, one archive entry each.
pub fn export_configuration(store: &dyn ConfigurationStore, path: &Path) -> Result<(), ExportError> {
    let result = write_archive(store, path);
    if result.is_err() {
        if let Err(err) = std::fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "Could not remove partial export");
            }
        }
    }
    result
}

fn write_archive(store: &dyn ConfigurationStore, path: &Path) -> Result<(), ExportError> {
    let mut archive = zip::ZipWriter::new(File::create(path)?);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for section in ConfigurationSection::ALL {
        let data = store.export_section(section)?;
        archive.start_file(section.entry_name(), options)?;
        archive.write_all(&data)?;
        debug!(section = section.entry_name(), bytes = data.len(), "Exported section");
    }
    archive.finish()?;
    info!(path = %path.display(), "Configuration exported");
    Ok(())
}

/// Import every entry of an archive. All entry names are checked before
/// anything is written to the store.
pub fn import_configuration(store: &dyn ConfigurationStore, path: &Path) -> Result<(), ExportError> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;

    let mut sections = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let name = archive.by_index(index)?.name().to_string();
        let section = ConfigurationSection::from_entry_name(&name)
            .ok_or(ExportError::UnknownEntry(name))?;
        sections.push((index, section));
    }

    for (index, section) in sections {
        let mut data = Vec::new();
        archive.by_index(index)?.read_to_end(&mut data)?;
        store.import_section(section, &data)?;
        debug!(section = section.entry_name(), bytes = data.len(), "Imported section");
    }
    info!(path = %path.display(), "Configuration imported");
    Ok(())
}
