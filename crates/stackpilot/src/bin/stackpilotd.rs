//! `stackpilotd`: discovers compose projects and runs the GitOps scheduler.
//!
//! Usage: `stackpilotd [config.yaml]` (or `STACKPILOT_CONFIG`).

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use stackpilot::gitops::CliGitClient;
use stackpilot::{
    load_config, Database, DockerCli, EngineConfig, EventSink, GitOpsSyncEngine, LogEventSink,
    LogFormat, OrchestratorDeps, ProjectOrchestrator, Settings, SettingsProvider,
    StackpilotError, SyncScheduler,
};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(format: LogFormat) {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json()),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(fmt::layer()),
        ),
    };
    if let Err(e) = result {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
}

fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STACKPILOT_CONFIG").ok());

    let config = match config_path {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };

    init_logging(config.log_format);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: EngineConfig) -> Result<(), StackpilotError> {
    log::info!("Starting stackpilotd v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::open(&config.database_path)?;
    let settings: Arc<dyn SettingsProvider> = Arc::new(Settings::new(config.clone()));
    let docker = Arc::new(DockerCli::default());
    let events: Arc<dyn EventSink> = Arc::new(LogEventSink);

    let orchestrator = Arc::new(ProjectOrchestrator::new(OrchestratorDeps {
        db,
        compose: docker.clone(),
        containers: docker,
        settings,
        events: Arc::clone(&events),
    }));

    match orchestrator.sync_projects_from_filesystem().await {
        Ok(report) => log::info!(
            "Project scan: {} added, {} removed, {} unchanged",
            report.added.len(),
            report.removed.len(),
            report.unchanged
        ),
        Err(e) => log::warn!("Project scan failed: {}", e),
    }

    let work_dir = config
        .git_work_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("stackpilot-git"));
    let git = Arc::new(CliGitClient::new(
        work_dir,
        Duration::from_secs(config.git_timeout_secs),
    ));
    let engine = Arc::new(GitOpsSyncEngine::new(orchestrator, git, events));

    let scheduler = SyncScheduler::new(engine, Duration::from_secs(config.scheduler_interval_secs));
    let (trigger_tx, trigger_rx) = broadcast::channel(16);
    let handle = scheduler.start(trigger_rx);

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        log::error!("Failed to install Ctrl-C handler, stopping: {}", e);
    }

    stop_rx.recv().await;
    log::info!("Shutting down");
    scheduler.stop();
    drop(trigger_tx);
    if let Err(e) = handle.await {
        log::error!("GitOps scheduler task failed: {}", e);
    }
    Ok(())
}
