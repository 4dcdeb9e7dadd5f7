//! Job submission/status/progress/cancel surface (spec §6). Grounded on the
//! teacher's `api/routes.rs` handler shape (Query/State extractors, `Json`
//! responses, a plain `&'static str` health check) and its `CorsLayer`/
//! `TraceLayer` wiring in `main.rs`, trimmed to the four endpoints this
//! system actually needs.

use crate::domain::{Job, JobSpec, JobStatus, OptimizerKind, Regime, Timeframe};
use crate::error::AppError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/jobs", post(submit_job))
        .route("/api/jobs/:id", get(get_job_status))
        .route("/api/jobs/:id/progress", get(get_job_progress))
        .route("/api/jobs/:id/cancel", post(cancel_job))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "paramtrain operational"
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::DataUnavailable(_) | AppError::InsufficientData(_) | AppError::InsufficientHistory(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::MalformedSignal(_) | AppError::EmptyFrame => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::WorkerCrashed => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) | AppError::Sqlite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.user_message() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

// ─── submit ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub strategy: String,
    pub exchange: String,
    pub pair: String,
    pub timeframe: String,
    pub regime: String,
    pub optimizer: String,
    pub iteration_budget: u32,
    pub lookback_days: u32,
    pub random_seed: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
}

/// Validates and enqueues a job spec (spec §6). Invalid specs never reach a
/// worker — they fail here with `VALIDATION_ERROR` and nothing is persisted.
async fn submit_job(State(state): State<AppState>, Json(req): Json<SubmitJobRequest>) -> Result<Json<SubmitJobResponse>, AppError> {
    let spec = validate_spec(req)?;

    let id = Uuid::new_v4();
    let job = Job::new(id, spec, Utc::now());
    state.db.insert_job(&job)?;
    state.broker.submit(job);

    Ok(Json(SubmitJobResponse { job_id: id }))
}

fn validate_spec(req: SubmitJobRequest) -> Result<JobSpec, AppError> {
    // Existence of the named strategy is itself part of validation.
    crate::strategy::lookup(&req.strategy)?;

    let timeframe = Timeframe::parse(&req.timeframe).ok_or_else(|| AppError::ValidationError(format!("unknown timeframe: {}", req.timeframe)))?;
    let regime = Regime::parse(&req.regime).ok_or_else(|| AppError::ValidationError(format!("unknown regime: {}", req.regime)))?;
    let optimizer = OptimizerKind::parse(&req.optimizer).ok_or_else(|| AppError::ValidationError(format!("unknown optimizer: {}", req.optimizer)))?;

    if !(1..=2000).contains(&req.iteration_budget) {
        return Err(AppError::ValidationError("iteration_budget must be in 1..=2000".to_string()));
    }
    if !(30..=730).contains(&req.lookback_days) {
        return Err(AppError::ValidationError("lookback_days must be in 30..=730".to_string()));
    }
    if req.exchange.trim().is_empty() || req.pair.trim().is_empty() {
        return Err(AppError::ValidationError("exchange and pair must be non-empty".to_string()));
    }

    Ok(JobSpec {
        strategy: req.strategy,
        exchange: req.exchange,
        pair: req.pair,
        timeframe,
        regime,
        optimizer,
        iteration_budget: req.iteration_budget,
        lookback_days: req.lookback_days,
        random_seed: req.random_seed,
    })
}

// ─── status ─────────────────────────────────────────────────────────────────

async fn get_job_status(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Job>, AppError> {
    Ok(Json(load_job(&state, id)?))
}

// ─── progress ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct JobProgressResponse {
    pub progress: f64,
    pub current_iteration: u32,
    pub total_iterations: u32,
    pub current_stage: &'static str,
    pub best_score_so_far: Option<f64>,
    pub is_complete: bool,
}

async fn get_job_progress(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<JobProgressResponse>, AppError> {
    let job = load_job(&state, id)?;
    Ok(Json(JobProgressResponse {
        progress: job.progress,
        current_iteration: job.current_iteration,
        total_iterations: job.total_iterations,
        current_stage: job.current_stage.as_str(),
        best_score_so_far: job.best_score_so_far,
        is_complete: job.status.is_terminal(),
    }))
}

// ─── cancel ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    pub status: &'static str,
}

/// Idempotent (spec §6/§8): repeated calls return whatever the current
/// status is without error, even after the job has already reached a
/// terminal state.
async fn cancel_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<CancelJobResponse>, AppError> {
    let status = state.broker.cancel(id).ok_or_else(|| AppError::ValidationError(format!("no such job: {id}")))?;

    // The PENDING->CANCELLED transition happens in the broker with nobody
    // else left to mirror it; every other transition is the worker's to
    // persist once it observes the intent.
    if status.is_terminal() {
        if let Some(job) = state.broker.snapshot(id) {
            let _ = state.db.update_job(&job);
        }
    }

    Ok(Json(CancelJobResponse { status: status_str(status) }))
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

/// The broker is authoritative for in-flight jobs; fall back to the durable
/// mirror for anything the broker has never held (e.g. after a restart).
fn load_job(state: &AppState, id: Uuid) -> Result<Job, AppError> {
    if let Some(job) = state.broker.snapshot(id) {
        return Ok(job);
    }
    state.db.load_job(id)?.ok_or_else(|| AppError::ValidationError(format!("no such job: {id}")))
}
