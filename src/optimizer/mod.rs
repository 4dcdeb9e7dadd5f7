//! Parameter optimizer family (spec §4.4): grid, random, and Bayesian search
//! behind one `optimize` contract, each emitting fine-grained progress
//! events. Design Note §9: "the standard wait-for-all-then-report pattern is
//! insufficient" — `parallel` below exposes a per-task completion hook so
//! progress stays smooth even when many backtests run concurrently.

pub mod bayesian;
pub mod grid;
pub mod parallel;
pub mod random;

use crate::domain::{ParameterSpace, ParameterVector};

/// One evaluated point in the search history.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub parameters: ParameterVector,
    pub score: f64,
}

/// `progress_cb(completed, total, best_score_so_far)`. Called after each
/// evaluation with monotonically non-decreasing `completed` (spec §4.4).
pub type ProgressCb<'a> = dyn Fn(u32, u32, Option<f64>) + Send + Sync + 'a;

/// Sentinel score for degenerate parameter vectors (sample_size < 10, spec
/// §4.4) and for strategy/backtest errors that are localized rather than
/// fatal (spec §7).
pub const SENTINEL_LOW_SCORE: f64 = -1.0e9;

pub trait Optimizer {
    fn kind(&self) -> crate::domain::OptimizerKind;

    /// Runs the search. `objective_fn` wraps a backtest and must be safe to
    /// call concurrently for Grid/Random; Bayesian calls it sequentially.
    /// `cancelled` is polled at least once per iteration (spec §5) — the
    /// search must stop and return whatever history has accumulated so far,
    /// without treating cancellation as an error.
    fn optimize(
        &self,
        space: &ParameterSpace,
        budget: u32,
        objective_fn: &(dyn Fn(&ParameterVector) -> f64 + Send + Sync),
        progress_cb: &ProgressCb,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> OptimizeOutcome;
}

pub struct OptimizeOutcome {
    pub best_parameters: Option<ParameterVector>,
    pub best_score: f64,
    pub history: Vec<Evaluation>,
    pub cancelled: bool,
}

/// Atomically updates `best_bits` to `score` if `score` is higher than the
/// value currently stored, and returns the winning value either way. Used by
/// Grid/Random's `on_complete` hooks so `progress_cb`'s `best_score_so_far`
/// reflects the running best mid-run rather than only after every task has
/// already landed (spec §4.4).
pub(crate) fn atomic_max_f64(best_bits: &std::sync::atomic::AtomicU64, score: f64) -> f64 {
    let mut current = best_bits.load(std::sync::atomic::Ordering::SeqCst);
    loop {
        let current_score = f64::from_bits(current);
        if score <= current_score {
            return current_score;
        }
        match best_bits.compare_exchange_weak(current, score.to_bits(), std::sync::atomic::Ordering::SeqCst, std::sync::atomic::Ordering::SeqCst) {
            Ok(_) => return score,
            Err(actual) => current = actual,
        }
    }
}
