//! Moor orchestrator daemon.
//!
//! Wires the full stack together: settings, SQLite store, protocol engine,
//! and the HTTP/WebSocket server, then runs until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use moor_core::logging::init_logging;
use moor_engine::{InstructionRouter, SyncConfig, SyncEngine};
use moor_server::{AppState, ConnectionManager, ReadinessTracker};
use moor_store::SessionStore;

#[derive(Parser, Debug)]
#[command(name = "moor-agentd", about = "Moor session orchestrator daemon")]
struct Cli {
    /// Address to bind the HTTP/WebSocket server to.
    #[arg(long)]
    bind: Option<String>,

    /// Path to the SQLite database. Defaults to ~/.moor/moor.db.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Path to the settings file. Defaults to ~/.moor/settings.json.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn default_db_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".moor").join("moor.db")
    }

    fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(Self::default_db_path)
    }
}

fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => moor_settings::load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => moor_settings::load_settings().context("loading settings")?,
    };
    moor_settings::init_settings(settings.clone());

    init_logging("info,moor=debug", cli.json_logs);

    let db_path = cli.db_path();
    ensure_parent_dir(&db_path)?;
    let pool = moor_store::new_pool(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    let store = Arc::new(SessionStore::new(pool));

    let readiness = Arc::new(ReadinessTracker::new(settings.sync.ready_grace()));
    let connections = Arc::new(ConnectionManager::new(Arc::clone(&readiness)));
    let engine = SyncEngine::new(
        store,
        Arc::clone(&connections) as Arc<dyn InstructionRouter>,
        SyncConfig::from(&settings.sync),
    )
    .context("initializing engine")?;

    let state = AppState {
        engine: Arc::clone(&engine),
        connections,
        readiness,
    };

    let bind_addr = cli.bind.unwrap_or_else(|| settings.server.bind_addr.clone());
    info!(db = %db_path.display(), addr = %bind_addr, "starting moor-agentd");

    tokio::select! {
        result = moor_server::serve(&bind_addr, state) => {
            result.context("server exited")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    engine.shutdown();
    Ok(())
}
