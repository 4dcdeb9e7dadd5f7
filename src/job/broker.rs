//! Ephemeral, authoritative-for-"in-flight" job broker. A `tokio::mpsc`
//! channel is the queue pull suspension point (spec §5); a `parking_lot`
//! map holds live job state and per-job cancellation intent. The broker
//! never touches the durable store itself — that is `job::mirror`'s job.

use crate::domain::{Job, JobStatus};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

pub struct Broker {
    jobs: RwLock<HashMap<Uuid, Job>>,
    cancel_intents: RwLock<HashMap<Uuid, bool>>,
    tx: mpsc::UnboundedSender<Uuid>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Uuid>>,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self { jobs: RwLock::new(HashMap::new()), cancel_intents: RwLock::new(HashMap::new()), tx, rx: AsyncMutex::new(rx) })
    }

    /// Enqueues a job already created in PENDING (spec §4.7: "the same
    /// record id is used to enqueue a work item into the broker").
    pub fn submit(&self, job: Job) {
        let id = job.id;
        self.jobs.write().insert(id, job);
        // The receiver is never dropped before the broker itself, so this
        // can only fail during shutdown, at which point the send is moot.
        let _ = self.tx.send(id);
    }

    /// The queue-pull suspension point (spec §5a). Returns `None` only once
    /// the broker's sender has been dropped, i.e. at shutdown.
    pub async fn next(&self) -> Option<Uuid> {
        self.rx.lock().await.recv().await
    }

    pub fn snapshot(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    pub fn mutate(&self, id: Uuid, f: impl FnOnce(&mut Job)) {
        if let Some(job) = self.jobs.write().get_mut(&id) {
            f(job);
        }
    }

    pub fn is_cancel_requested(&self, id: Uuid) -> bool {
        self.cancel_intents.read().get(&id).copied().unwrap_or(false)
    }

    /// Idempotent (spec §8). PENDING is marked CANCELLED immediately;
    /// RUNNING only has its cancellation intent recorded, since the worker
    /// still owns the transition to the CANCELLED terminal state; terminal
    /// states are a no-op. Returns the job's status as of this call.
    pub fn cancel(&self, id: Uuid) -> Option<JobStatus> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id)?;
        match job.status {
            JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                Some(JobStatus::Cancelled)
            }
            JobStatus::Running => {
                self.cancel_intents.write().insert(id, true);
                Some(JobStatus::Running)
            }
            terminal => Some(terminal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobSpec, OptimizerKind, Regime, Timeframe};

    fn spec() -> JobSpec {
        JobSpec {
            strategy: "liquidity_sweep".into(),
            exchange: "binanceus".into(),
            pair: "BTC/USDT".into(),
            timeframe: Timeframe::H1,
            regime: Regime::Sideways,
            optimizer: OptimizerKind::Random,
            iteration_budget: 20,
            lookback_days: 90,
            random_seed: Some(1),
        }
    }

    #[tokio::test]
    async fn submitted_job_is_retrievable_from_the_queue() {
        let broker = Broker::new();
        let id = Uuid::new_v4();
        broker.submit(Job::new(id, spec(), Utc::now()));
        let popped = broker.next().await.unwrap();
        assert_eq!(popped, id);
        assert_eq!(broker.snapshot(id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn cancelling_a_pending_job_is_immediate() {
        let broker = Broker::new();
        let id = Uuid::new_v4();
        broker.submit(Job::new(id, spec(), Utc::now()));
        assert_eq!(broker.cancel(id), Some(JobStatus::Cancelled));
        // Idempotent: a second cancel is a no-op that reports the same state.
        assert_eq!(broker.cancel(id), Some(JobStatus::Cancelled));
    }

    #[test]
    fn cancelling_a_running_job_only_sets_intent() {
        let broker = Broker::new();
        let id = Uuid::new_v4();
        broker.submit(Job::new(id, spec(), Utc::now()));
        broker.mutate(id, |j| j.status = JobStatus::Running);
        assert_eq!(broker.cancel(id), Some(JobStatus::Running));
        assert!(broker.is_cancel_requested(id));
    }
}
