//! Remaining literal scenarios of spec §8 that are best exercised directly
//! against the validator and lifecycle gate rather than through a full
//! optimizer search: overfit detection (scenario 4) and sample-gated
//! promotion to MATURE (scenario 5).

use chrono::{DateTime, TimeZone, Utc};
use paramtrain_backend::backtest::BacktestConfig;
use paramtrain_backend::domain::{Candle, Direction, MetricVector, OhlcvFrame, ParameterVector, Signal, Timeframe, TrainingContext, ValidationMetrics};
use paramtrain_backend::error::AppResult;
use paramtrain_backend::lifecycle;
use paramtrain_backend::strategy::{Strategy, StrategyInstance};
use paramtrain_backend::walk_forward::{self, WalkForwardConfig};

/// Emits one LONG signal per candle on the first half of whatever frame it's
/// given and nothing on the second half, with a strong winning edge on the
/// first half and a flat/losing edge on the second — this lets a single
/// strategy instance produce a high in-sample Sharpe and a much lower
/// out-of-sample Sharpe depending on which half the validator hands it,
/// without the strategy needing to know about train/test windows itself.
struct RegimeShiftStrategy;
struct RegimeShiftInstance;

impl Strategy for RegimeShiftStrategy {
    fn name(&self) -> &'static str {
        "regime_shift_fixture"
    }
    fn parameter_space(&self) -> paramtrain_backend::domain::ParameterSpace {
        paramtrain_backend::domain::ParameterSpace::new()
    }
    fn build(&self, _parameters: &ParameterVector) -> AppResult<Box<dyn StrategyInstance>> {
        Ok(Box::new(RegimeShiftInstance))
    }
    fn time_exit_candles(&self, _parameters: &ParameterVector) -> u32 {
        3
    }
}

impl StrategyInstance for RegimeShiftInstance {
    fn generate_signals(&self, frame: &OhlcvFrame) -> AppResult<Vec<Signal>> {
        let mut signals = Vec::new();
        for c in frame.candles.iter().step_by(3) {
            // A winning LONG: tight stop, generous take-profit, and the
            // fixture's candle generator (below) makes price drift up
            // steadily in the train window and churn flat in the test
            // window, so this consistently wins pre-shift and barely breaks
            // even post-shift.
            signals.push(Signal {
                direction: Direction::Long,
                entry_price: c.close,
                stop_loss: c.close * 0.98,
                take_profit: c.close * 1.03,
                emitted_at_time: c.open_time,
            });
        }
        Ok(signals)
    }
}

fn hourly_candle(t: DateTime<Utc>, price: f64) -> Candle {
    Candle { open_time: t, open: price, high: price * 1.004, low: price * 0.996, close: price, volume: 10.0 }
}

/// Builds a frame whose first `train_days` trend steadily upward (easy
/// winning trades) and whose remainder chops sideways with no net drift
/// (the walk-forward test windows land here and see a materially worse
/// Sharpe), reproducing spec §8 scenario 4's "in-sample 3.0, held-out 0.4"
/// shape without hand-picking exact ratios.
fn regime_shift_frame(train_days: i64, total_days: i64) -> OhlcvFrame {
    let start = Utc.timestamp_opt(0, 0).unwrap();
    let train_hours = train_days * 24;
    let total_hours = total_days * 24;
    let mut candles = Vec::with_capacity(total_hours as usize);

    for h in 0..total_hours {
        let t = start + chrono::Duration::hours(h);
        let price = if h < train_hours {
            100.0 + (h as f64) * 0.08
        } else {
            let base = 100.0 + (train_hours as f64) * 0.08;
            base + ((h - train_hours) as f64 * 0.6).sin() * 0.5
        };
        candles.push(hourly_candle(t, price));
    }
    OhlcvFrame { exchange: "fixture".into(), symbol: "REG/IME".into(), timeframe: Timeframe::H1, candles }
}

/// Scenario 4 (spec §8): overfitting_flag = true drives lifecycle_stage =
/// PAPER and max_allocation_pct = 0, even though the in-sample metrics alone
/// would otherwise promote the configuration.
#[test]
fn overfit_detection_forces_paper_stage() {
    let frame = regime_shift_frame(90, 160);
    let strategy = RegimeShiftStrategy;
    let wf_config = WalkForwardConfig { train_days: 60, test_days: 10, gap_days: 1, min_windows: 2 };

    let validation = walk_forward::validate(&frame, &ParameterVector::new(), &strategy, &BacktestConfig::default(), &wf_config).unwrap();
    assert!(validation.overfitting_flag, "fixture should reproduce a post-shift Sharpe collapse");

    let validation_metrics = ValidationMetrics {
        train_metrics: validation.train_metrics,
        test_metrics: validation.test_metrics,
        overfitting_flag: validation.overfitting_flag,
        train_window_days: wf_config.train_days,
        test_window_days: wf_config.test_days,
        gap_days: wf_config.gap_days,
        windows_evaluated: validation.windows_evaluated,
    };
    let context = TrainingContext { exchange: "fixture".into(), pair: "REG/IME".into(), timeframe: Timeframe::H1, regime: paramtrain_backend::domain::Regime::Volatile };
    let configuration = lifecycle::compose("regime_shift_fixture", context, ParameterVector::new(), validation.train_metrics, validation_metrics);

    assert_eq!(configuration.lifecycle_stage, paramtrain_backend::domain::LifecycleStage::Paper);
    assert_eq!(configuration.lifecycle_stage.max_allocation_pct(), 0.0);
}

/// Scenario 5 (spec §8): sample_size=150, sharpe=1.8, net_profit>0, no
/// overfit -> MATURE, max_allocation_pct = 10.
#[test]
fn sample_gated_promotion_to_mature_end_to_end() {
    let train_metrics = MetricVector { sample_size: 150, sharpe_ratio: 1.8, net_profit_pct: 22.0, ..Default::default() };
    let validation_metrics = ValidationMetrics {
        train_metrics,
        test_metrics: MetricVector { sample_size: 150, sharpe_ratio: 1.6, net_profit_pct: 18.0, ..Default::default() },
        overfitting_flag: false,
        train_window_days: 60,
        test_window_days: 14,
        gap_days: 1,
        windows_evaluated: 5,
    };
    let context = TrainingContext { exchange: "binanceus".into(), pair: "BTC/USDT".into(), timeframe: Timeframe::H1, regime: paramtrain_backend::domain::Regime::Bull };
    let configuration = lifecycle::compose("sma_crossover", context, ParameterVector::new(), train_metrics, validation_metrics);

    assert_eq!(configuration.lifecycle_stage, paramtrain_backend::domain::LifecycleStage::Mature);
    assert_eq!(configuration.lifecycle_stage.max_allocation_pct(), 10.0);
    assert!(!configuration.is_active, "is_active defaults to false regardless of stage (spec §3)");
}
