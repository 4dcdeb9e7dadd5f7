//! Strategy-parameter training core: job queue & worker runtime, backtest
//! engine, parameter optimizer family, and configuration writer / lifecycle
//! gate (spec §1). Exposes `AppState`, the shared handle every worker and
//! HTTP handler is threaded through, plus the library modules that make it
//! up. The HTTP surface, dashboard UI, and exchange connectivity remain
//! external collaborators (spec §1) — this crate only ships the thin `api`
//! router needed to exercise the job lifecycle end to end.

pub mod api;
pub mod backtest;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod market_data;
pub mod optimizer;
pub mod strategy;
pub mod walk_forward;

use std::sync::Arc;

use config::Config;
use db::Db;
use job::broker::Broker;
use market_data::Backfill;

/// Process-wide state: the broker connection and the worker pool's shared
/// handles. No other global mutable state (Design Note §9) — `Config` is
/// constructed once in `main` and threaded through here.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Db>,
    pub broker: Arc<Broker>,
}

impl AppState {
    pub fn new(config: Arc<Config>, db: Arc<Db>, broker: Arc<Broker>) -> Self {
        Self { config, db, broker }
    }
}

/// Spawns the fixed worker pool against the given backfill collaborator.
/// Split out of `main` so integration tests can start the same runtime
/// against an in-memory database.
pub fn start_workers(state: &AppState, backfill: Arc<dyn Backfill>) {
    job::worker::recover_stale_jobs(&state.db);
    job::worker::spawn_pool(state.config.clone(), state.db.clone(), state.broker.clone(), backfill);
}
