use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use super::ServeSettings;
use crate::core::orchestrator::{AgentOrchestrator, OrchestratorConfig};
use crate::core::store::SqliteAgentStore;
use crate::core::terminal;
use crate::core::vault::CredentialsVault;
use crate::core::worker::DefaultWorkerFactory;
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging::StreamMakeWriter;

/// Optional `daemon.toml` in the data directory. Command-line flags override
/// anything set here.
#[derive(Debug, Default, serde::Deserialize)]
struct DaemonFileConfig {
    api_host: Option<String>,
    api_port: Option<u16>,
    api_token: Option<String>,
}

fn data_dir(settings: &ServeSettings) -> Result<PathBuf> {
    match &settings.data_dir {
        Some(dir) => Ok(dir.clone()),
        None => dirs::home_dir()
            .map(|home| home.join(".aviary"))
            .context("could not determine home directory; pass --data-dir"),
    }
}

fn load_file_config(dir: &PathBuf) -> DaemonFileConfig {
    let path = dir.join("daemon.toml");
    match std::fs::read_to_string(&path) {
        Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
            terminal::print_warn(&format!("Ignoring malformed daemon.toml: {}", e));
            DaemonFileConfig::default()
        }),
        Err(_) => DaemonFileConfig::default(),
    }
}

pub async fn run_serve(mut settings: ServeSettings) -> Result<()> {
    terminal::print_banner();

    let dir = data_dir(&settings)?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data dir {}", dir.display()))?;

    // File config fills in only what the flags left at their defaults.
    let file_config = load_file_config(&dir);
    let defaults = ServeSettings::default();
    if settings.api_host == defaults.api_host
        && let Some(host) = file_config.api_host
    {
        settings.api_host = host;
    }
    if settings.api_port == defaults.api_port
        && let Some(port) = file_config.api_port
    {
        settings.api_port = port;
    }
    if settings.api_token.is_none() {
        settings.api_token = file_config.api_token;
    }

    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(StreamMakeWriter {
            sender: log_tx.clone(),
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    info!("Starting aviary daemon (data dir: {})", dir.display());

    let store = Arc::new(SqliteAgentStore::open(dir.join("aviary.db"))?);
    let vault = Arc::new(CredentialsVault::new(store.get_db()));
    vault.initialize().await?;

    let factory = Arc::new(DefaultWorkerFactory::new());
    let orchestrator = Arc::new(AgentOrchestrator::new(
        store.clone(),
        factory,
        vault.clone(),
        OrchestratorConfig::default(),
    ));

    // Reattach whatever was running before the last shutdown, then hand the
    // rest to the monitors.
    orchestrator.startup_recovery().await;
    orchestrator.run_monitors().await;
    let resident = orchestrator.running_count().await;

    let server = ApiServer::new(ApiServerConfig {
        orchestrator: orchestrator.clone(),
        store,
        vault,
        log_tx,
        api_host: settings.api_host.clone(),
        api_port: settings.api_port,
        api_token: settings.api_token,
    });

    terminal::GuideSection::new("Daemon")
        .status("Data dir", &dir.display().to_string())
        .status("Version", env!("CARGO_PKG_VERSION"))
        .print();
    terminal::print_status("Agents resident", &resident.to_string());
    terminal::print_link(
        "API",
        &format!("http://{}:{}", settings.api_host, settings.api_port),
    );
    terminal::print_success("aviary is up");
    terminal::print_info("Press Ctrl-C to stop");

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
