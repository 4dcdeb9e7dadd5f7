//! Grid search (spec §4.4): enumerates the Cartesian product of per-parameter
//! grids, continuous domains discretized by a caller-supplied step count or
//! a default of 10 points per axis. Deterministic order of enumeration;
//! evaluation runs in parallel via `optimizer::parallel`.

use super::{Evaluation, Optimizer, OptimizeOutcome, ProgressCb, SENTINEL_LOW_SCORE};
use crate::domain::{OptimizerKind, ParamDomain, ParamValue, ParameterSpace, ParameterVector};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

pub struct GridSearch {
    pub worker_cap: usize,
    /// Points-per-axis for continuous domains; defaults to 10 (spec §4.4).
    pub points_per_axis: usize,
}

impl GridSearch {
    pub fn new(worker_cap: usize) -> Self {
        Self { worker_cap, points_per_axis: 10 }
    }

    fn axis_values(&self, domain: &ParamDomain) -> Vec<ParamValue> {
        match domain {
            ParamDomain::Continuous { lo, hi } => {
                let n = self.points_per_axis.max(1);
                if n == 1 {
                    vec![ParamValue::Float(*lo)]
                } else {
                    (0..n)
                        .map(|i| ParamValue::Float(lo + (hi - lo) * (i as f64) / ((n - 1) as f64)))
                        .collect()
                }
            }
            ParamDomain::Integer { lo, hi } => (*lo..=*hi).map(ParamValue::Int).collect(),
            ParamDomain::Discrete { values } => values.clone(),
        }
    }

    fn enumerate(&self, space: &ParameterSpace) -> Vec<ParameterVector> {
        let names: Vec<&String> = space.names().collect();
        let axes: Vec<Vec<ParamValue>> = names.iter().map(|n| self.axis_values(&space.domains[*n])).collect();

        let mut combos: Vec<ParameterVector> = vec![ParameterVector::new()];
        for (name, values) in names.iter().zip(axes.iter()) {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for v in values {
                    let mut c = combo.clone();
                    c.insert((*name).clone(), *v);
                    next.push(c);
                }
            }
            combos = next;
        }
        combos
    }
}

impl Optimizer for GridSearch {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Grid
    }

    fn optimize(
        &self,
        space: &ParameterSpace,
        budget: u32,
        objective_fn: &(dyn Fn(&ParameterVector) -> f64 + Send + Sync),
        progress_cb: &ProgressCb,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> OptimizeOutcome {
        let mut combos = self.enumerate(space);
        // Budget caps the grid the same way it caps other optimizers, so a
        // caller-chosen iteration_budget is always respected.
        combos.truncate(budget as usize);
        let total = combos.len() as u32;

        let completed = AtomicU32::new(0);
        let best_bits = AtomicU64::new(SENTINEL_LOW_SCORE.to_bits());
        let history = Mutex::new(Vec::with_capacity(combos.len()));

        let results = super::parallel::map_with_progress(
            &combos,
            self.worker_cap,
            |params| {
                if cancelled() {
                    return None;
                }
                Some(objective_fn(params))
            },
            |_idx, score| {
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let best = match *score {
                    Some(s) => super::atomic_max_f64(&best_bits, s),
                    None => f64::from_bits(best_bits.load(Ordering::SeqCst)),
                };
                progress_cb(done, total, if done > 0 { Some(best) } else { None });
            },
        );

        let mut best_parameters = None;
        let mut best_score = SENTINEL_LOW_SCORE;
        let mut was_cancelled = false;
        for (params, score) in combos.into_iter().zip(results.into_iter()) {
            match score {
                Some(score) => {
                    history.lock().unwrap().push(Evaluation { parameters: params.clone(), score });
                    if score > best_score {
                        best_score = score;
                        best_parameters = Some(params);
                        best_bits.store(best_score.to_bits(), Ordering::SeqCst);
                    }
                }
                None => was_cancelled = true,
            }
        }

        OptimizeOutcome {
            best_parameters,
            best_score,
            history: history.into_inner().unwrap(),
            cancelled: was_cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_deterministic_cartesian_product() {
        let space = ParameterSpace::new()
            .with("a", ParamDomain::Integer { lo: 0, hi: 2 })
            .with("b", ParamDomain::Discrete { values: vec![ParamValue::Float(1.0), ParamValue::Float(2.0)] });
        let grid = GridSearch::new(2);
        let combos = grid.enumerate(&space);
        assert_eq!(combos.len(), 3 * 2);
    }

    #[test]
    fn progress_reaches_total_exactly_once() {
        let space = ParameterSpace::new().with("a", ParamDomain::Integer { lo: 0, hi: 4 });
        let grid = GridSearch::new(2);
        let completions = std::sync::Mutex::new(Vec::new());
        let outcome = grid.optimize(
            &space,
            100,
            &|params| params.get("a").unwrap().as_f64(),
            &|completed, total, _best| completions.lock().unwrap().push((completed, total)),
            &|| false,
        );
        let log = completions.into_inner().unwrap();
        assert_eq!(log.last().unwrap().0, log.last().unwrap().1);
        let mut prev = 0;
        for (completed, _) in &log {
            assert!(*completed >= prev);
            prev = *completed;
        }
        assert_eq!(outcome.best_score, 4.0);
    }
}
