//! Random search (spec §4.4): uniformly samples `budget` independent
//! parameter vectors. Parallel evaluation; seed is configurable for
//! reproducibility — with a fixed seed, two runs produce bit-identical
//! histories (spec §5 determinism, spec §8 testable property).

use super::{Evaluation, Optimizer, OptimizeOutcome, ProgressCb, SENTINEL_LOW_SCORE};
use crate::domain::{OptimizerKind, ParamDomain, ParamValue, ParameterSpace, ParameterVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

pub struct RandomSearch {
    pub worker_cap: usize,
    pub seed: u64,
}

impl RandomSearch {
    pub fn new(worker_cap: usize, seed: Option<u64>) -> Self {
        Self { worker_cap, seed: seed.unwrap_or(0) }
    }

    /// Draws `n` independent vectors from a single seeded RNG, in sequence —
    /// this sequential draw (not per-task RNGs) is what makes the history
    /// reproducible regardless of how many worker threads evaluate it.
    fn sample(&self, space: &ParameterSpace, n: u32) -> Vec<ParameterVector> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut out = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let mut v = ParameterVector::new();
            for (name, domain) in &space.domains {
                let value = match domain {
                    ParamDomain::Continuous { lo, hi } => ParamValue::Float(rng.gen_range(*lo..=*hi)),
                    ParamDomain::Integer { lo, hi } => ParamValue::Int(rng.gen_range(*lo..=*hi)),
                    ParamDomain::Discrete { values } => values[rng.gen_range(0..values.len())],
                };
                v.insert(name.clone(), value);
            }
            out.push(v);
        }
        out
    }
}

impl Optimizer for RandomSearch {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Random
    }

    fn optimize(
        &self,
        space: &ParameterSpace,
        budget: u32,
        objective_fn: &(dyn Fn(&ParameterVector) -> f64 + Send + Sync),
        progress_cb: &ProgressCb,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> OptimizeOutcome {
        let vectors = self.sample(space, budget);
        let total = vectors.len() as u32;

        let completed = AtomicU32::new(0);
        let best_bits = AtomicU64::new(SENTINEL_LOW_SCORE.to_bits());
        let history = Mutex::new(Vec::with_capacity(vectors.len()));

        let results = super::parallel::map_with_progress(
            &vectors,
            self.worker_cap,
            |params| if cancelled() { None } else { Some(objective_fn(params)) },
            |_idx, score| {
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let best = match *score {
                    Some(s) => super::atomic_max_f64(&best_bits, s),
                    None => f64::from_bits(best_bits.load(Ordering::SeqCst)),
                };
                progress_cb(done, total, Some(best));
            },
        );

        let mut best_parameters = None;
        let mut best_score = SENTINEL_LOW_SCORE;
        let mut was_cancelled = false;
        for (params, score) in vectors.into_iter().zip(results.into_iter()) {
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

        OptimizeOutcome { best_parameters, best_score, history: history.into_inner().unwrap(), cancelled: was_cancelled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_seed_is_deterministic() {
        let space = ParameterSpace::new()
            .with("a", ParamDomain::Continuous { lo: 0.0, hi: 1.0 })
            .with("b", ParamDomain::Integer { lo: 0, hi: 100 });
        let s1 = RandomSearch::new(4, Some(42)).sample(&space, 20);
        let s2 = RandomSearch::new(4, Some(42)).sample(&space, 20);
        assert_eq!(s1.len(), s2.len());
        for (a, b) in s1.iter().zip(s2.iter()) {
            assert_eq!(a, b);
        }
    }
}
