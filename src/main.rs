//! paramtrain — strategy parameter training core.
//!
//! Wires configuration, the durable store, the job broker, the worker pool,
//! and the thin job-submission HTTP surface together. Exchange connectivity,
//! the dashboard UI, and auth are external collaborators (spec §1) and are
//! not started here.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paramtrain_backend::config::Config;
use paramtrain_backend::db::Db;
use paramtrain_backend::job::broker::Broker;
use paramtrain_backend::market_data::NoBackfill;
use paramtrain_backend::{api, AppState};

/// Overrides the environment-derived `Config`; unset flags fall back to the
/// same env vars `Config::from_env` already reads.
#[derive(Debug, Parser)]
#[command(name = "paramtrain", about = "Strategy parameter training core")]
struct Cli {
    #[arg(long, env = "PARAMTRAIN_DB_PATH")]
    db_path: Option<String>,

    #[arg(long, env = "PARAMTRAIN_BIND_ADDR")]
    bind_addr: Option<String>,
}

fn load_env() {
    let _ = dotenvy::dotenv();
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    for candidate in [manifest_dir.join(".env"), manifest_dir.join("../.env")] {
        if candidate.exists() {
            let _ = dotenvy::from_path(&candidate);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "paramtrain_backend=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(db_path) = cli.db_path {
        config.database_path = db_path;
    }
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    let config = Arc::new(config);

    info!(db_path = %config.database_path, pool_size = config.pool_size, worker_cap = config.worker_cap, "starting paramtrain");

    let db = Arc::new(Db::open(&config.database_path).context("failed to open durable store")?);
    let broker = Broker::new();

    let state = AppState::new(config.clone(), db.clone(), broker.clone());

    // No live exchange backfill collaborator is wired in this binary (spec
    // §1: exchange connectivity is out of scope); jobs whose lookback window
    // isn't already resident in `market_data` fail with DATA_UNAVAILABLE.
    paramtrain_backend::start_workers(&state, Arc::new(NoBackfill));

    let app = api::router(state);
    let listener = TcpListener::bind(&config.bind_addr).await.with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "job API listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
