//! Durable mirror of one job's progress (spec §4.7). Pairs a [`ProgressGate`]
//! with the [`Db`] handle so the worker loop has a single call site per
//! progress tick; lifecycle-column writes (RUNNING/terminal transitions) go
//! straight through `Db::update_job` without throttling since those happen
//! at most a handful of times per job.

use super::progress::ProgressGate;
use crate::db::Db;
use crate::domain::Job;
use crate::error::AppResult;
use std::sync::Arc;

pub struct ProgressMirror {
    db: Arc<Db>,
    gate: ProgressGate,
    threshold_pct: f64,
}

impl ProgressMirror {
    pub fn new(db: Arc<Db>, threshold_pct: f64) -> Self {
        Self { db, gate: ProgressGate::new(), threshold_pct }
    }

    /// Mirrors `job` to the durable store if the throttle gate lets it
    /// through (spec §4.7). A suppressed observation is not an error; the
    /// in-memory broker remains the source of truth for it until the next
    /// write does cross the threshold.
    pub fn observe(&mut self, job: &Job) -> AppResult<()> {
        if self.gate.should_write(job.progress, job.current_stage, self.threshold_pct) {
            self.db.update_job(job)?;
        }
        Ok(())
    }
}
