//! Worker pool (spec §4.7): a fixed number of async tasks drain the broker's
//! queue; the CPU-bound training pipeline itself runs on `spawn_blocking` so
//! it never stalls the tokio runtime's scheduler while an optimizer runs for
//! minutes. Crash recovery runs once at startup before any worker is spawned.

use super::broker::Broker;
use super::mirror::ProgressMirror;
use crate::config::Config;
use crate::db::Db;
use crate::domain::{JobStatus, JobStage};
use crate::error::AppError;
use crate::job::pipeline;
use crate::market_data::Backfill;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Moves any job left RUNNING by a prior, crashed process to FAILED (spec
/// §4.7). Must run before workers start pulling so a resurrected job never
/// races a fresh claim of the same id.
pub fn recover_stale_jobs(db: &Db) {
    let stale = match db.load_stale_running_jobs() {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::error!(error = %e, "failed to scan for stale running jobs at startup");
            return;
        }
    };
    for mut job in stale {
        tracing::warn!(job_id = %job.id, "recovering job left RUNNING by a crashed worker");
        job.status = JobStatus::Failed;
        job.error_message = Some(AppError::WorkerCrashed.user_message());
        job.completed_at = Some(Utc::now());
        if let Err(e) = db.update_job(&job) {
            tracing::error!(job_id = %job.id, error = %e, "failed to persist crash recovery");
        }
    }
}

pub fn spawn_pool(config: Arc<Config>, db: Arc<Db>, broker: Arc<Broker>, backfill: Arc<dyn Backfill>) {
    for worker_id in 0..config.pool_size {
        let config = config.clone();
        let db = db.clone();
        let broker = broker.clone();
        let backfill = backfill.clone();
        tokio::spawn(async move {
            worker_loop(worker_id, config, db, broker, backfill).await;
        });
    }
}

async fn worker_loop(worker_id: usize, config: Arc<Config>, db: Arc<Db>, broker: Arc<Broker>, backfill: Arc<dyn Backfill>) {
    while let Some(id) = broker.next().await {
        let Some(job) = broker.snapshot(id) else { continue };
        // Cancelled while still queued, or a duplicate wake-up: skip.
        if job.status != JobStatus::Pending {
            continue;
        }

        broker.mutate(id, |j| {
            j.status = JobStatus::Running;
            j.started_at = Some(Utc::now());
        });
        if let Some(running) = broker.snapshot(id) {
            if let Err(e) = db.update_job(&running) {
                tracing::error!(worker_id, job_id = %id, error = %e, "failed to mirror RUNNING transition");
            }
        }

        let outcome = run_pipeline_blocking(id, config.clone(), db.clone(), broker.clone(), backfill.clone()).await;

        match outcome {
            Ok(Some(configuration_id)) => {
                broker.mutate(id, |j| {
                    j.status = JobStatus::Completed;
                    j.completed_at = Some(Utc::now());
                    j.produced_configuration_id = Some(configuration_id);
                });
            }
            Ok(None) => {
                broker.mutate(id, |j| {
                    j.status = JobStatus::Cancelled;
                    j.completed_at = Some(Utc::now());
                });
            }
            Err(err) => {
                tracing::warn!(worker_id, job_id = %id, error = %err, "training job failed");
                broker.mutate(id, |j| {
                    j.status = JobStatus::Failed;
                    j.completed_at = Some(Utc::now());
                    j.error_message = Some(err.user_message());
                });
            }
        }

        if let Some(finished) = broker.snapshot(id) {
            if let Err(e) = db.update_job(&finished) {
                tracing::error!(worker_id, job_id = %id, error = %e, "failed to mirror terminal job state");
            }
        }
    }
}

async fn run_pipeline_blocking(
    id: Uuid,
    config: Arc<Config>,
    db: Arc<Db>,
    broker: Arc<Broker>,
    backfill: Arc<dyn Backfill>,
) -> Result<Option<Uuid>, AppError> {
    let spec = match broker.snapshot(id) {
        Some(job) => job.spec,
        None => return Err(AppError::WorkerCrashed),
    };

    let join_result = tokio::task::spawn_blocking(move || {
        let broker_for_cancel = broker.clone();
        let cancelled = move || broker_for_cancel.is_cancel_requested(id);

        let broker_for_progress = broker.clone();
        let mut mirror = ProgressMirror::new(db.clone(), config.progress_throttle_pct);
        let on_progress = move |stage: JobStage, progress: f64, current_iteration: u32, total_iterations: u32, best: Option<f64>| {
            broker_for_progress.mutate(id, |j| {
                j.current_stage = stage;
                j.progress = progress;
                j.current_iteration = current_iteration;
                j.total_iterations = total_iterations;
                if best.is_some() {
                    j.best_score_so_far = best;
                }
            });
            if let Some(snapshot) = broker_for_progress.snapshot(id) {
                let _ = mirror.observe(&snapshot);
            }
        };

        pipeline::run(&spec, db.as_ref(), backfill.as_ref(), config.worker_cap, &config.default_backtest, Utc::now(), on_progress, &cancelled)
    })
    .await;

    match join_result {
        Ok(Ok(Some(configuration))) => Ok(Some(configuration.id)),
        Ok(Ok(None)) => Ok(None),
        Ok(Err(app_err)) => Err(app_err),
        Err(_join_err) => Err(AppError::WorkerCrashed),
    }
}
