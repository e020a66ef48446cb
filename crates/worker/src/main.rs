//! Crawler Agent
//!
//! Runs the crawler agent's thread pools. Production deployments embed the
//! agent with their own job store and connectors; this binary validates
//! configuration and can run the agent against an in-memory demo store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crawler_common::config::{
    DELETE_THREADS_PROPERTY, EXPIRE_THREADS_PROPERTY, THREADS_PROPERTY,
};
use crawler_common::telemetry::init_from_config;
use crawler_common::CrawlerConfig;
use crawler_domain::ports::ConfigurationSection;
use crawler_domain::JobId;
use crawler_testing::{
    create_test_connection, InMemoryConfigurationStore, InMemoryJobStore, JobBuilder,
    MockConnectorRegistry, RecordingOutputConnector, ScriptedRepositoryConnector,
};
use crawler_worker::{Agent, AgentServices};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "crawler-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "CRAWLER_CONFIG")]
    config: Option<PathBuf>,

    /// Document worker threads
    #[arg(short, long, env = "CRAWLER_THREADS")]
    threads: Option<usize>,

    /// Delete worker threads
    #[arg(long, env = "CRAWLER_DELETE_THREADS")]
    delete_threads: Option<usize>,

    /// Expire worker threads
    #[arg(long, env = "CRAWLER_EXPIRE_THREADS")]
    expire_threads: Option<usize>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "CRAWLER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, env = "CRAWLER_JSON_LOGS")]
    json: bool,

    /// Print metrics interval (seconds)
    #[arg(long, env = "METRICS_INTERVAL", default_value = "60")]
    metrics_interval: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then print it
    CheckConfig,

    /// Crawl a set of seed URLs with an in-memory store until interrupted
    Demo {
        /// Seed document identifiers
        #[arg(long, num_args = 1.., default_values_t = vec!["http://localhost/".to_string()])]
        seeds: Vec<String>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Write the demo configuration archive here on shutdown
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let mut telemetry = config.telemetry.clone();
    if let Some(level) = &args.log_level {
        telemetry.log_level = level.clone();
    }
    telemetry.json_logging |= args.json;
    init_from_config(&telemetry)?;

    match args.command {
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Demo {
            seeds,
            duration,
            export,
        } => run_demo(config, seeds, duration, export, args.metrics_interval).await,
    }
}

fn load_config(args: &Args) -> Result<CrawlerConfig> {
    let overrides = [
        (THREADS_PROPERTY, args.threads),
        (DELETE_THREADS_PROPERTY, args.delete_threads),
        (EXPIRE_THREADS_PROPERTY, args.expire_threads),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.map(|v| (key, v.to_string())));

    CrawlerConfig::build(args.config.as_deref(), overrides).context("Invalid agent configuration")
}

async fn run_demo(
    config: CrawlerConfig,
    seeds: Vec<String>,
    duration: Option<u64>,
    export: Option<PathBuf>,
    metrics_interval: u64,
) -> Result<()> {
    let job = JobBuilder::new(1).with_description("demo").build();
    let store = Arc::new(InMemoryJobStore::new());
    store.insert_job(job.clone());
    store.schedule_seeding(JobId(1));

    let connector = Arc::new(ScriptedRepositoryConnector::new("web").with_seeds(seeds));
    let registry = Arc::new(
        MockConnectorRegistry::new()
            .with_repository(create_test_connection("web"), connector)
            .with_output("index", Arc::new(RecordingOutputConnector::new())),
    );
    let configuration = Arc::new(
        InMemoryConfigurationStore::new()
            .with_section(ConfigurationSection::Jobs, serde_json::to_vec(&[&job])?)
            .with_section(
                ConfigurationSection::Connections,
                serde_json::to_vec(&[create_test_connection("web")])?,
            ),
    );

    let services = AgentServices::new(store, registry);
    let metrics = services.metrics.clone();
    let mut agent = Agent::new(config, services).with_configuration_store(configuration);

    info!("Starting crawler agent demo");
    let mut agent = tokio::task::spawn_blocking(move || agent.start().map(|()| agent))
        .await?
        .context("Agent failed to start")?;

    let metrics_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval.max(1)));
        loop {
            interval.tick().await;
            let snapshot = metrics.snapshot();
            info!(
                documents_processed = snapshot.documents_processed,
                documents_completed = snapshot.documents_completed,
                documents_requeued = snapshot.documents_requeued,
                documents_failed = snapshot.documents_failed,
                jobs_seeded = snapshot.jobs_seeded,
                avg_batch_ms = snapshot.average_duration.map(|d| d.as_millis()).unwrap_or(0),
                "Agent metrics"
            );
        }
    });

    let limit = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        }
        _ = limit => info!("Demo duration elapsed"),
    }

    metrics_handle.abort();
    let agent = tokio::task::spawn_blocking(move || {
        agent.stop();
        agent
    })
    .await?;

    if let Some(path) = export {
        agent
            .export_configuration(&path)
            .with_context(|| format!("Failed to export configuration to {}", path.display()))?;
    }

    info!("Crawler agent shut down gracefully");
    Ok(())
}
