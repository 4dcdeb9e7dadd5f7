//! Bayesian optimizer (spec §4.4): sequentially fits a Gaussian-Process
//! surrogate over (parameters, score) history and proposes the next point by
//! maximizing Expected Improvement. Sequential by construction — cannot be
//! parallelized across iterations, unlike grid/random (spec §5).
//!
//! The GP is a swappable collaborator behind the same `optimize` contract
//! (Design Note §9); this module is the default implementation.

use super::{Evaluation, Optimizer, OptimizeOutcome, ProgressCb, SENTINEL_LOW_SCORE};
use crate::domain::{OptimizerKind, ParamDomain, ParamValue, ParameterSpace, ParameterVector};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::collections::BTreeMap;

/// Points sampled (Random) to seed the GP before Bayesian proposals begin
/// (spec §4.4, default N=10).
const DEFAULT_SEED_POINTS: u32 = 10;
const GP_NOISE: f64 = 1.0e-6;
const GP_LENGTH_SCALE: f64 = 1.0;
const GP_SIGNAL_VARIANCE: f64 = 1.0;
const CANDIDATE_POOL_SIZE: usize = 256;

pub struct BayesianOptimizer {
    pub seed: u64,
    pub seed_points: u32,
}

impl BayesianOptimizer {
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed: seed.unwrap_or(0), seed_points: DEFAULT_SEED_POINTS }
    }
}

/// Normalizes a parameter vector to a point in [0, 1]^d against `space`, in
/// the space's deterministic (BTreeMap) name order, so the GP operates over
/// a fixed-dimension unit hypercube regardless of mixed continuous/integer/
/// discrete domains.
fn to_unit_point(space: &ParameterSpace, params: &ParameterVector) -> Vec<f64> {
    space
        .domains
        .iter()
        .map(|(name, domain)| {
            let value = params.get(name).copied();
            match domain {
                ParamDomain::Continuous { lo, hi } => {
                    let v = value.map(|v| v.as_f64()).unwrap_or(*lo);
                    if (hi - lo).abs() < f64::EPSILON { 0.0 } else { (v - lo) / (hi - lo) }
                }
                ParamDomain::Integer { lo, hi } => {
                    let v = value.map(|v| v.as_i64()).unwrap_or(*lo);
                    if hi == lo { 0.0 } else { (v - lo) as f64 / (hi - lo) as f64 }
                }
                ParamDomain::Discrete { values } => {
                    let idx = value.and_then(|v| values.iter().position(|x| *x == v)).unwrap_or(0);
                    if values.len() <= 1 { 0.0 } else { idx as f64 / (values.len() - 1) as f64 }
                }
            }
        })
        .collect()
}

fn from_unit_point(space: &ParameterSpace, point: &[f64]) -> ParameterVector {
    let mut out = BTreeMap::new();
    for ((name, domain), u) in space.domains.iter().zip(point.iter()) {
        let u = u.clamp(0.0, 1.0);
        let value = match domain {
            ParamDomain::Continuous { lo, hi } => ParamValue::Float(lo + u * (hi - lo)),
            ParamDomain::Integer { lo, hi } => {
                let span = (hi - lo) as f64;
                ParamValue::Int((*lo as f64 + (u * span).round()) as i64)
            }
            ParamDomain::Discrete { values } => {
                let last = values.len().saturating_sub(1);
                let idx = if last == 0 { 0 } else { ((u * last as f64).round() as usize).min(last) };
                values[idx]
            }
        };
        out.insert(name.clone(), value);
    }
    out
}

fn rbf_kernel(a: &[f64], b: &[f64]) -> f64 {
    let sq_dist: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    GP_SIGNAL_VARIANCE * (-sq_dist / (2.0 * GP_LENGTH_SCALE * GP_LENGTH_SCALE)).exp()
}

/// Gaussian-Process posterior mean/std at `query`, fit on `points`/`scores`
/// via a Cholesky-factored kernel solve (nalgebra).
fn gp_predict(points: &[Vec<f64>], scores: &[f64], query: &[f64]) -> Option<(f64, f64)> {
    let n = points.len();
    if n == 0 {
        return None;
    }
    let mean_y = scores.iter().sum::<f64>() / n as f64;

    let mut k = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            k[(i, j)] = rbf_kernel(&points[i], &points[j]) + if i == j { GP_NOISE } else { 0.0 };
        }
    }
    let chol = k.clone().cholesky()?;
    let y = DVector::from_iterator(n, scores.iter().map(|s| s - mean_y));
    let alpha = chol.solve(&y);

    let k_star = DVector::from_iterator(n, points.iter().map(|p| rbf_kernel(p, query)));
    let mean = mean_y + k_star.dot(&alpha);

    let v = chol.l().solve_lower_triangular(&k_star)?;
    let k_star_star = rbf_kernel(query, query);
    let variance = (k_star_star - v.dot(&v)).max(1.0e-12);
    Some((mean, variance.sqrt()))
}

/// Expected Improvement acquisition function, maximizing over `best_so_far`.
fn expected_improvement(mean: f64, std: f64, best_so_far: f64) -> f64 {
    if std <= 0.0 {
        return 0.0;
    }
    let z = (mean - best_so_far) / std;
    let normal = Normal::new(0.0, 1.0).expect("standard normal is always valid");
    let improvement = mean - best_so_far;
    improvement * normal.cdf(z) + std * normal.pdf(z)
}

impl Optimizer for BayesianOptimizer {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Bayesian
    }

    fn optimize(
        &self,
        space: &ParameterSpace,
        budget: u32,
        objective_fn: &(dyn Fn(&ParameterVector) -> f64 + Send + Sync),
        progress_cb: &ProgressCb,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> OptimizeOutcome {
        let dims = space.domains.len();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let seed_points = self.seed_points.min(budget);

        let mut points: Vec<Vec<f64>> = Vec::new();
        let mut scores: Vec<f64> = Vec::new();
        let mut history: Vec<Evaluation> = Vec::new();
        let mut best_score = SENTINEL_LOW_SCORE;
        let mut best_parameters: Option<ParameterVector> = None;
        let mut was_cancelled = false;

        for i in 0..budget {
            if cancelled() {
                was_cancelled = true;
                break;
            }

            let unit_point = if i < seed_points || points.is_empty() {
                // Latin-Hypercube-style seeding: jitter within the i-th stratum
                // of each axis so the first N points spread across the space
                // rather than clustering (spec §4.4: "Random or LHS" seeding).
                (0..dims)
                    .map(|_| {
                        let stratum = i as f64 / seed_points.max(1) as f64;
                        let next_stratum = (i as f64 + 1.0) / seed_points.max(1) as f64;
                        rng.gen_range(stratum..next_stratum.max(stratum + 1.0e-9))
                    })
                    .collect::<Vec<f64>>()
            } else {
                match propose_next(space, &points, &scores, best_score, &mut rng) {
                    Some(p) => p,
                    None => {
                        // Numerical failure in the surrogate: fall back to a
                        // random sample for this iteration (spec §7).
                        tracing::warn!("bayesian surrogate fit failed; falling back to random sample");
                        (0..dims).map(|_| rng.gen_range(0.0..1.0)).collect()
                    }
                }
            };

            let params = from_unit_point(space, &unit_point);
            let score = objective_fn(&params);

            points.push(unit_point);
            scores.push(score);
            history.push(Evaluation { parameters: params.clone(), score });
            if score > best_score {
                best_score = score;
                best_parameters = Some(params);
            }

            // Sequential: progress fires once per iteration (spec §4.4).
            progress_cb(i + 1, budget, Some(best_score));
        }

        OptimizeOutcome { best_parameters, best_score, history, cancelled: was_cancelled }
    }
}

/// Proposes the next unit-cube point by maximizing EI over a random
/// candidate pool (a standard, cheap stand-in for continuous acquisition
/// maximization that keeps this module free of a second optimizer
/// dependency).
fn propose_next(space: &ParameterSpace, points: &[Vec<f64>], scores: &[f64], best_so_far: f64, rng: &mut ChaCha8Rng) -> Option<Vec<f64>> {
    let dims = space.domains.len();
    let mut best_candidate = None;
    let mut best_ei = f64::NEG_INFINITY;

    for _ in 0..CANDIDATE_POOL_SIZE {
        let candidate: Vec<f64> = (0..dims).map(|_| rng.gen_range(0.0..1.0)).collect();
        let (mean, std) = gp_predict(points, scores, &candidate)?;
        let ei = expected_improvement(mean, std, best_so_far);
        if ei > best_ei {
            best_ei = ei;
            best_candidate = Some(candidate);
        }
    }
    best_candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_history_with_fixed_seed() {
        let space = ParameterSpace::new()
            .with("a", ParamDomain::Continuous { lo: 0.0, hi: 10.0 })
            .with("b", ParamDomain::Integer { lo: 0, hi: 10 });
        let objective = |p: &ParameterVector| -(p.get("a").unwrap().as_f64() - 5.0).powi(2);

        let run = |seed: u64| {
            let opt = BayesianOptimizer::new(Some(seed));
            opt.optimize(&space, 15, &objective, &|_, _, _| {}, &|| false)
        };
        let r1 = run(7);
        let r2 = run(7);
        assert_eq!(r1.history.len(), r2.history.len());
        for (a, b) in r1.history.iter().zip(r2.history.iter()) {
            assert_eq!(a.parameters, b.parameters);
            assert!((a.score - b.score).abs() < 1e-12);
        }
    }

    #[test]
    fn progress_fires_once_per_iteration() {
        let space = ParameterSpace::new().with("a", ParamDomain::Continuous { lo: 0.0, hi: 1.0 });
        let opt = BayesianOptimizer::new(Some(1));
        let calls = std::sync::Mutex::new(Vec::new());
        let outcome = opt.optimize(
            &space,
            12,
            &|p| p.get("a").unwrap().as_f64(),
            &|completed, total, _best| calls.lock().unwrap().push((completed, total)),
            &|| false,
        );
        let log = calls.into_inner().unwrap();
        assert_eq!(log.len(), 12);
        assert_eq!(log.last().unwrap().0, log.last().unwrap().1);
        assert!(outcome.best_score > 0.9);
    }
}
