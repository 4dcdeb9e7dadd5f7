//! Runtime configuration, loaded once in `main` and threaded through
//! `AppState`. No global/lazy-static config — see Design Note §9.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub bind_addr: String,
    /// Per-job parallel evaluation worker cap. Defaults to available CPUs
    /// (spec §5: "bounded by a per-job worker cap (default = available
    /// CPUs)").
    pub worker_cap: usize,
    /// Size of the worker pool draining the job broker (spec §4.7).
    pub pool_size: usize,
    /// Progress is mirrored to the durable store when |Δprogress| >= this
    /// threshold or the stage changes (spec §4.7).
    pub progress_throttle_pct: f64,
    pub default_backtest: DefaultBacktestConfig,
}

#[derive(Debug, Clone)]
pub struct DefaultBacktestConfig {
    pub fee_rate: f64,
    pub slippage_rate: f64,
    pub initial_balance: f64,
    pub risk_per_trade: f64,
    pub max_concurrent_positions: usize,
}

impl Default for DefaultBacktestConfig {
    fn default() -> Self {
        Self {
            fee_rate: 0.001,
            slippage_rate: 0.0005,
            initial_balance: 10_000.0,
            risk_per_trade: 0.02,
            max_concurrent_positions: 1,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let database_path = env::var("PARAMTRAIN_DB_PATH").unwrap_or_else(|_| "paramtrain.db".to_string());
        let bind_addr = env::var("PARAMTRAIN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());
        let worker_cap = env::var("PARAMTRAIN_WORKER_CAP")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4));
        let pool_size = env::var("PARAMTRAIN_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(4);
        let progress_throttle_pct = env::var("PARAMTRAIN_PROGRESS_THROTTLE_PCT")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|&v| v > 0.0)
            .unwrap_or(0.1);

        Self {
            database_path,
            bind_addr,
            worker_cap,
            pool_size,
            progress_throttle_pct,
            default_backtest: DefaultBacktestConfig::default(),
        }
    }
}
