//! Durable store: `market_data`, `training_jobs`, `trained_configurations`
//! (spec §6, logical tables). Grounded on the teacher's
//! `signals/db_storage.rs` — WAL mode, a single `SCHEMA_SQL` batch run on
//! open, and a `parking_lot`-guarded `Connection` shared across the worker
//! pool and the HTTP handlers.

use crate::domain::{Candle, Job, JobStage, JobStatus, OptimizerKind, Regime, Timeframe, TrainedConfiguration};
use crate::error::AppResult;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS market_data (
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    open_time INTEGER NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    PRIMARY KEY (exchange, symbol, timeframe, open_time)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS training_jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    strategy TEXT NOT NULL,
    exchange TEXT NOT NULL,
    pair TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    regime TEXT NOT NULL,
    optimizer_kind TEXT NOT NULL,
    iteration_budget INTEGER NOT NULL,
    lookback_days INTEGER NOT NULL,
    random_seed INTEGER,
    progress REAL NOT NULL DEFAULT 0,
    current_iteration INTEGER NOT NULL DEFAULT 0,
    total_iterations INTEGER NOT NULL DEFAULT 0,
    current_stage TEXT NOT NULL DEFAULT 'loading_data',
    best_score REAL,
    submitted_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER,
    error_message TEXT,
    produced_configuration_id TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_training_jobs_status ON training_jobs(status, submitted_at);

CREATE TABLE IF NOT EXISTS trained_configurations (
    id TEXT PRIMARY KEY,
    strategy TEXT NOT NULL,
    exchange TEXT NOT NULL,
    pair TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    regime TEXT NOT NULL,
    status TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    parameters_json TEXT NOT NULL,
    metrics_json TEXT NOT NULL,
    validation_json TEXT NOT NULL,
    circuit_breakers_json TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_trained_configurations_context
    ON trained_configurations(strategy, exchange, pair, timeframe, regime, created_at DESC);
"#;

pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

fn to_unix(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_unix(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

impl Db {
    pub fn open(path: &str) -> AppResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    // ─── market_data ────────────────────────────────────────────────────

    pub fn load_candles(&self, exchange: &str, symbol: &str, timeframe: Timeframe, from: DateTime<Utc>, to: DateTime<Utc>) -> AppResult<Vec<Candle>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT open_time, open, high, low, close, volume FROM market_data
             WHERE exchange = ?1 AND symbol = ?2 AND timeframe = ?3 AND open_time >= ?4 AND open_time <= ?5
             ORDER BY open_time ASC",
        )?;
        let rows = stmt.query_map(params![exchange, symbol, timeframe.as_str(), to_unix(from), to_unix(to)], |row| {
            Ok(Candle {
                open_time: from_unix(row.get(0)?),
                open: row.get(1)?,
                high: row.get(2)?,
                low: row.get(3)?,
                close: row.get(4)?,
                volume: row.get(5)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn upsert_candles(&self, exchange: &str, symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> AppResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO market_data (exchange, symbol, timeframe, open_time, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(exchange, symbol, timeframe, open_time) DO UPDATE SET
                    open=excluded.open, high=excluded.high, low=excluded.low, close=excluded.close, volume=excluded.volume",
            )?;
            for c in candles {
                stmt.execute(params![exchange, symbol, timeframe.as_str(), to_unix(c.open_time), c.open, c.high, c.low, c.close, c.volume])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ─── training_jobs ──────────────────────────────────────────────────

    pub fn insert_job(&self, job: &Job) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO training_jobs (
                id, status, strategy, exchange, pair, timeframe, regime, optimizer_kind,
                iteration_budget, lookback_days, random_seed, progress, current_iteration,
                total_iterations, current_stage, best_score, submitted_at, started_at,
                completed_at, error_message, produced_configuration_id
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
            params![
                job.id.to_string(),
                status_str(job.status),
                job.spec.strategy,
                job.spec.exchange,
                job.spec.pair,
                job.spec.timeframe.as_str(),
                job.spec.regime.as_str(),
                optimizer_str(job.spec.optimizer),
                job.spec.iteration_budget,
                job.spec.lookback_days,
                job.spec.random_seed.map(|s| s as i64),
                job.progress,
                job.current_iteration,
                job.total_iterations,
                job.current_stage.as_str(),
                job.best_score_so_far,
                to_unix(job.submitted_at),
                job.started_at.map(to_unix),
                job.completed_at.map(to_unix),
                job.error_message,
                job.produced_configuration_id.map(|u| u.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Mirrors lifecycle + progress columns. Per spec §5 "no two writers
    /// share a column" — this single call covers every column that any
    /// writer (claiming worker, progress-mirror writer) may touch, since in
    /// this crate both concerns funnel through `job::mirror`.
    pub fn update_job(&self, job: &Job) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE training_jobs SET
                status = ?2, progress = ?3, current_iteration = ?4, total_iterations = ?5,
                current_stage = ?6, best_score = ?7, started_at = ?8, completed_at = ?9,
                error_message = ?10, produced_configuration_id = ?11
             WHERE id = ?1",
            params![
                job.id.to_string(),
                status_str(job.status),
                job.progress,
                job.current_iteration,
                job.total_iterations,
                job.current_stage.as_str(),
                job.best_score_so_far,
                job.started_at.map(to_unix),
                job.completed_at.map(to_unix),
                job.error_message,
                job.produced_configuration_id.map(|u| u.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn load_job(&self, id: uuid::Uuid) -> AppResult<Option<Job>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM training_jobs WHERE id = ?1")?;
        let mut rows = stmt.query(params![id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_job(row)?))
        } else {
            Ok(None)
        }
    }

    /// Jobs left RUNNING with no live worker claim — used at worker startup
    /// for crash recovery (spec §4.7).
    pub fn load_stale_running_jobs(&self) -> AppResult<Vec<Job>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM training_jobs WHERE status = 'RUNNING'")?;
        let rows = stmt.query_map([], |row| row_to_job(row))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── trained_configurations ─────────────────────────────────────────

    pub fn insert_configuration(&self, config: &TrainedConfiguration) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trained_configurations (
                id, strategy, exchange, pair, timeframe, regime, status, is_active,
                parameters_json, metrics_json, validation_json, circuit_breakers_json,
                created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                config.id.to_string(),
                config.strategy,
                config.context.exchange,
                config.context.pair,
                config.context.timeframe.as_str(),
                config.context.regime.as_str(),
                config.lifecycle_stage.as_str(),
                config.is_active as i64,
                serde_json::to_string(&config.parameters).map_err(anyhow::Error::from)?,
                serde_json::to_string(&config.metrics).map_err(anyhow::Error::from)?,
                serde_json::to_string(&config.validation).map_err(anyhow::Error::from)?,
                serde_json::to_string(&config.circuit_breakers).map_err(anyhow::Error::from)?,
                to_unix(config.created_at),
                to_unix(config.updated_at),
            ],
        )?;
        Ok(())
    }
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "PENDING",
        JobStatus::Running => "RUNNING",
        JobStatus::Completed => "COMPLETED",
        JobStatus::Failed => "FAILED",
        JobStatus::Cancelled => "CANCELLED",
    }
}

fn parse_status(s: &str) -> JobStatus {
    match s {
        "RUNNING" => JobStatus::Running,
        "COMPLETED" => JobStatus::Completed,
        "FAILED" => JobStatus::Failed,
        "CANCELLED" => JobStatus::Cancelled,
        _ => JobStatus::Pending,
    }
}

fn optimizer_str(kind: OptimizerKind) -> &'static str {
    match kind {
        OptimizerKind::Grid => "grid",
        OptimizerKind::Random => "random",
        OptimizerKind::Bayesian => "bayesian",
    }
}

fn parse_stage(s: &str) -> JobStage {
    match s {
        "optimizing" => JobStage::Optimizing,
        "validating" => JobStage::Validating,
        "saving" => JobStage::Saving,
        "done" => JobStage::Done,
        _ => JobStage::LoadingData,
    }
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    use crate::domain::JobSpec;
    let id: String = row.get("id")?;
    let spec = JobSpec {
        strategy: row.get("strategy")?,
        exchange: row.get("exchange")?,
        pair: row.get("pair")?,
        timeframe: Timeframe::parse(&row.get::<_, String>("timeframe")?).unwrap_or(Timeframe::H1),
        regime: Regime::parse(&row.get::<_, String>("regime")?).unwrap_or(Regime::Sideways),
        optimizer: match row.get::<_, String>("optimizer_kind")?.as_str() {
            "grid" => OptimizerKind::Grid,
            "bayesian" => OptimizerKind::Bayesian,
            _ => OptimizerKind::Random,
        },
        iteration_budget: row.get("iteration_budget")?,
        lookback_days: row.get("lookback_days")?,
        random_seed: row.get::<_, Option<i64>>("random_seed")?.map(|s| s as u64),
    };
    let produced_configuration_id: Option<String> = row.get("produced_configuration_id")?;

    Ok(Job {
        id: uuid::Uuid::parse_str(&id).unwrap_or_default(),
        submitted_at: from_unix(row.get("submitted_at")?),
        started_at: row.get::<_, Option<i64>>("started_at")?.map(from_unix),
        completed_at: row.get::<_, Option<i64>>("completed_at")?.map(from_unix),
        status: parse_status(&row.get::<_, String>("status")?),
        spec,
        progress: row.get("progress")?,
        current_iteration: row.get("current_iteration")?,
        total_iterations: row.get("total_iterations")?,
        current_stage: parse_stage(&row.get::<_, String>("current_stage")?),
        best_score_so_far: row.get("best_score")?,
        error_message: row.get("error_message")?,
        produced_configuration_id: produced_configuration_id.and_then(|s| uuid::Uuid::parse_str(&s).ok()),
    })
}
