//! The training pipeline itself (spec §4.7): market data → optimizer search
//! over backtests → walk-forward validation → lifecycle classification and
//! persistence. Cooperative cancellation is checked at the checkpoints spec
//! §5 names: inside every optimizer iteration (the optimizer implementations
//! already do this), before the validator, and before the writer.

use crate::backtest::{self, BacktestConfig};
use crate::config::DefaultBacktestConfig;
use crate::db::Db;
use crate::domain::{JobSpec, JobStage, OptimizerKind, ParameterVector, TrainedConfiguration, TrainingContext, ValidationMetrics};
use crate::error::{AppError, AppResult};
use crate::lifecycle;
use crate::market_data::{Backfill, MarketDataAccessor};
use crate::optimizer::bayesian::BayesianOptimizer;
use crate::optimizer::grid::GridSearch;
use crate::optimizer::random::RandomSearch;
use crate::optimizer::{Optimizer, SENTINEL_LOW_SCORE};
use crate::strategy;
use crate::walk_forward::{self, WalkForwardConfig};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Below this trade count a parameter vector is treated as degenerate (spec
/// §4.4) and scored at the sentinel rather than trusted.
const MIN_TRADE_SAMPLE: usize = 10;

fn backtest_config_for(default_backtest: &DefaultBacktestConfig, time_exit_candles: u32) -> BacktestConfig {
    BacktestConfig {
        fee_rate: default_backtest.fee_rate,
        slippage_rate: default_backtest.slippage_rate,
        initial_balance: default_backtest.initial_balance,
        risk_per_trade: default_backtest.risk_per_trade,
        max_concurrent_positions: default_backtest.max_concurrent_positions,
        time_exit_candles,
    }
}

/// Runs one job spec end to end. Returns `Ok(None)` on cooperative
/// cancellation (not an error, spec §7) and `Ok(Some(configuration))` on
/// success; the configuration is already persisted by the time this returns.
pub fn run(
    spec: &JobSpec,
    db: &Db,
    backfill: &dyn Backfill,
    worker_cap: usize,
    default_backtest: &DefaultBacktestConfig,
    now: DateTime<Utc>,
    mut on_progress: impl FnMut(JobStage, f64, u32, u32, Option<f64>),
    cancelled: &(dyn Fn() -> bool + Send + Sync),
) -> AppResult<Option<TrainedConfiguration>> {
    on_progress(JobStage::LoadingData, 0.0, 0, spec.iteration_budget, None);

    let accessor = MarketDataAccessor::new(db, backfill);
    let frame = accessor.fetch(&spec.exchange, &spec.pair, spec.timeframe, spec.lookback_days, now)?;

    let strategy = strategy::lookup(&spec.strategy)?;
    let space = strategy.parameter_space();

    let objective_fn = |params: &ParameterVector| -> f64 {
        let instance = match strategy.build(params) {
            Ok(i) => i,
            Err(_) => return SENTINEL_LOW_SCORE,
        };
        let signals = match instance.generate_signals(&frame) {
            Ok(s) => s,
            Err(_) => return SENTINEL_LOW_SCORE,
        };
        let bt_config = backtest_config_for(default_backtest, strategy.time_exit_candles(params));
        match backtest::run(&frame, &signals, &bt_config) {
            Ok((_, metrics)) if metrics.sample_size >= MIN_TRADE_SAMPLE => metrics.sharpe_ratio,
            _ => SENTINEL_LOW_SCORE,
        }
    };

    // `ProgressCb` is `Fn + Send + Sync`, but the caller's `on_progress` is an
    // owned `FnMut`; a `Mutex` bridges the two without assuming anything
    // about which thread calls in (map_with_progress's completion hook does
    // so from a single draining thread, but nothing in the `Optimizer`
    // contract promises that to this module).
    let last_progress_bits = AtomicU64::new(0.0_f64.to_bits());
    let on_progress_mutex = Mutex::new(&mut on_progress);
    let progress_cb = |completed: u32, total: u32, best: Option<f64>| {
        let pct = if total == 0 { 100.0 } else { (completed as f64 / total as f64) * 100.0 };
        last_progress_bits.store(pct.to_bits(), Ordering::SeqCst);
        if let Ok(mut cb) = on_progress_mutex.lock() {
            (*cb)(JobStage::Optimizing, pct, completed, total, best);
        }
    };

    let outcome = match spec.optimizer {
        OptimizerKind::Grid => GridSearch::new(worker_cap).optimize(&space, spec.iteration_budget, &objective_fn, &progress_cb, cancelled),
        OptimizerKind::Random => RandomSearch::new(worker_cap, spec.random_seed).optimize(&space, spec.iteration_budget, &objective_fn, &progress_cb, cancelled),
        OptimizerKind::Bayesian => BayesianOptimizer::new(spec.random_seed).optimize(&space, spec.iteration_budget, &objective_fn, &progress_cb, cancelled),
    };

    if outcome.cancelled {
        return Ok(None);
    }

    let best_parameters = outcome
        .best_parameters
        .ok_or_else(|| AppError::InsufficientData("no parameter vector in the search space produced a tradable backtest".to_string()))?;

    if cancelled() {
        return Ok(None);
    }

    let last_progress = f64::from_bits(last_progress_bits.load(Ordering::SeqCst));
    if let Ok(mut cb) = on_progress_mutex.lock() {
        (*cb)(JobStage::Validating, last_progress, spec.iteration_budget, spec.iteration_budget, Some(outcome.best_score));
    }

    let wf_config = WalkForwardConfig::default();
    let validation_bt_config = backtest_config_for(default_backtest, strategy.time_exit_candles(&best_parameters));
    let validation = walk_forward::validate(&frame, &best_parameters, strategy.as_ref(), &validation_bt_config, &wf_config)?;

    if cancelled() {
        return Ok(None);
    }

    if let Ok(mut cb) = on_progress_mutex.lock() {
        (*cb)(JobStage::Saving, last_progress, spec.iteration_budget, spec.iteration_budget, Some(outcome.best_score));
    }

    let validation_metrics = ValidationMetrics {
        train_metrics: validation.train_metrics,
        test_metrics: validation.test_metrics,
        overfitting_flag: validation.overfitting_flag,
        train_window_days: wf_config.train_days,
        test_window_days: wf_config.test_days,
        gap_days: wf_config.gap_days,
        windows_evaluated: validation.windows_evaluated,
    };

    let context = TrainingContext { exchange: spec.exchange.clone(), pair: spec.pair.clone(), timeframe: spec.timeframe, regime: spec.regime };
    let configuration = lifecycle::compose(&spec.strategy, context, best_parameters, validation.train_metrics, validation_metrics);

    db.insert_configuration(&configuration)?;

    if let Ok(mut cb) = on_progress_mutex.lock() {
        (*cb)(JobStage::Done, last_progress, spec.iteration_budget, spec.iteration_budget, Some(outcome.best_score));
    }

    Ok(Some(configuration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::domain::{Candle, OptimizerKind, Regime, Timeframe};
    use crate::market_data::NoBackfill;
    use chrono::Duration;

    fn seed_candles(db: &Db, exchange: &str, pair: &str, timeframe: Timeframe, now: DateTime<Utc>, days: i64) {
        let hours = days * 24;
        let candles: Vec<Candle> = (0..hours)
            .map(|h| {
                let t = now - Duration::hours(hours - h);
                let wobble = ((h as f64) * 0.37).sin() * 3.0;
                let price = 100.0 + wobble;
                Candle { open_time: t, open: price, high: price + 1.5, low: price - 1.5, close: price + 0.2, volume: 50.0 }
            })
            .collect();
        db.upsert_candles(exchange, pair, timeframe, &candles).unwrap();
    }

    #[test]
    fn happy_path_random_search_produces_a_configuration() {
        let db = Db::open_in_memory().unwrap();
        let now = Utc::now();
        seed_candles(&db, "binanceus", "BTC/USDT", Timeframe::H1, now, 120);

        let spec = JobSpec {
            strategy: "sma_crossover".to_string(),
            exchange: "binanceus".to_string(),
            pair: "BTC/USDT".to_string(),
            timeframe: Timeframe::H1,
            regime: Regime::Sideways,
            optimizer: OptimizerKind::Random,
            iteration_budget: 8,
            lookback_days: 90,
            random_seed: Some(42),
        };

        let mut stages_seen = Vec::new();
        let result = run(&spec, &db, &NoBackfill, 2, &DefaultBacktestConfig::default(), now, |stage, _p, _c, _t, _b| stages_seen.push(stage), &|| false);

        assert!(result.is_ok());
        assert!(stages_seen.contains(&JobStage::LoadingData));
        assert!(stages_seen.contains(&JobStage::Optimizing));
    }

    #[test]
    fn cancellation_mid_optimization_yields_no_configuration() {
        let db = Db::open_in_memory().unwrap();
        let now = Utc::now();
        seed_candles(&db, "binanceus", "BTC/USDT", Timeframe::H1, now, 120);

        let spec = JobSpec {
            strategy: "sma_crossover".to_string(),
            exchange: "binanceus".to_string(),
            pair: "BTC/USDT".to_string(),
            timeframe: Timeframe::H1,
            regime: Regime::Sideways,
            optimizer: OptimizerKind::Random,
            iteration_budget: 8,
            lookback_days: 90,
            random_seed: Some(7),
        };

        let result = run(&spec, &db, &NoBackfill, 2, &DefaultBacktestConfig::default(), now, |_, _, _, _, _| {}, &|| true);
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn degenerate_lookback_surfaces_insufficient_data() {
        let db = Db::open_in_memory().unwrap();
        let now = Utc::now();
        let spec = JobSpec {
            strategy: "liquidity_sweep".to_string(),
            exchange: "binanceus".to_string(),
            pair: "BTC/USDT".to_string(),
            timeframe: Timeframe::H1,
            regime: Regime::Sideways,
            optimizer: OptimizerKind::Random,
            iteration_budget: 10,
            lookback_days: 1,
            random_seed: Some(1),
        };
        let result = run(&spec, &db, &NoBackfill, 2, &DefaultBacktestConfig::default(), now, |_, _, _, _, _| {}, &|| false);
        assert!(matches!(result, Err(AppError::InsufficientData(_))));
    }
}
