//! Strategy plug-ins (spec §4.2). A strategy declares its parameter space
//! and a factory that, given a concrete [`ParameterVector`], produces an
//! object whose only operation is `generate_signals`. Strategies are
//! re-instantiated per backtest — they must not carry state across calls,
//! which `build` enforces by construction (it returns a fresh value).

use crate::domain::{Candle, Direction, OhlcvFrame, ParamDomain, ParameterSpace, ParameterVector, Signal};
use crate::error::{AppError, AppResult};

/// A runnable strategy instance, built fresh from one [`ParameterVector`].
pub trait StrategyInstance {
    /// Must emit signals in strictly non-decreasing `emitted_at_time` order
    /// (spec §4.2) — the backtest engine relies on this and does not re-sort.
    fn generate_signals(&self, frame: &OhlcvFrame) -> AppResult<Vec<Signal>>;
}

/// A named strategy plug-in: declares its space, builds instances from it.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn parameter_space(&self) -> ParameterSpace;
    fn build(&self, parameters: &ParameterVector) -> AppResult<Box<dyn StrategyInstance>>;
    /// `time_exit_candles` is a strategy parameter per spec §4.3's
    /// `BacktestConfig`; strategies expose it so the engine can read it
    /// without hard-coding the parameter's name across strategies.
    fn time_exit_candles(&self, parameters: &ParameterVector) -> u32;
}

/// Looks up a registered strategy by the `strategy` field of a job spec.
pub fn lookup(name: &str) -> AppResult<Box<dyn Strategy>> {
    match name {
        "liquidity_sweep" => Ok(Box::new(LiquiditySweepStrategy)),
        "sma_crossover" => Ok(Box::new(SmaCrossoverStrategy)),
        other => Err(AppError::ValidationError(format!("unknown strategy: {other}"))),
    }
}

fn param_f64(parameters: &ParameterVector, name: &str, default: f64) -> f64 {
    parameters.get(name).map(|v| v.as_f64()).unwrap_or(default)
}

fn param_i64(parameters: &ParameterVector, name: &str, default: i64) -> i64 {
    parameters.get(name).map(|v| v.as_i64()).unwrap_or(default)
}

// ─── liquidity_sweep ────────────────────────────────────────────────────────
//
// Stop-run-and-reclaim: looks for a candle that wicks below the rolling low
// of the last `lookback` candles and closes back above it (a swept-liquidity
// reclaim), entering LONG on the close of that candle with SL below the wick
// and TP a `risk_reward` multiple above entry. Mirror logic for SHORT off the
// rolling high. This is the `LIQUIDITY_SWEEP` strategy named in spec §8
// scenario 1.

pub struct LiquiditySweepStrategy;

impl Strategy for LiquiditySweepStrategy {
    fn name(&self) -> &'static str {
        "liquidity_sweep"
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::new()
            .with("lookback", ParamDomain::Integer { lo: 10, hi: 60 })
            .with("sl_buffer_pct", ParamDomain::Continuous { lo: 0.0005, hi: 0.01 })
            .with("risk_reward", ParamDomain::Continuous { lo: 1.0, hi: 4.0 })
            .with("time_exit_candles", ParamDomain::Integer { lo: 5, hi: 100 })
    }

    fn build(&self, parameters: &ParameterVector) -> AppResult<Box<dyn StrategyInstance>> {
        Ok(Box::new(LiquiditySweepInstance {
            lookback: param_i64(parameters, "lookback", 20).max(2) as usize,
            sl_buffer_pct: param_f64(parameters, "sl_buffer_pct", 0.002),
            risk_reward: param_f64(parameters, "risk_reward", 2.0),
        }))
    }

    fn time_exit_candles(&self, parameters: &ParameterVector) -> u32 {
        param_i64(parameters, "time_exit_candles", 50).max(1) as u32
    }
}

struct LiquiditySweepInstance {
    lookback: usize,
    sl_buffer_pct: f64,
    risk_reward: f64,
}

impl StrategyInstance for LiquiditySweepInstance {
    fn generate_signals(&self, frame: &OhlcvFrame) -> AppResult<Vec<Signal>> {
        let candles = &frame.candles;
        let mut signals = Vec::new();

        for i in self.lookback..candles.len() {
            let window = &candles[i - self.lookback..i];
            let rolling_low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            let rolling_high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
            let c = candles[i];

            if c.low < rolling_low && c.close > rolling_low {
                let entry_price = c.close;
                let stop_loss = c.low * (1.0 - self.sl_buffer_pct);
                let risk = entry_price - stop_loss;
                if risk > 0.0 {
                    signals.push(Signal {
                        direction: Direction::Long,
                        entry_price,
                        stop_loss,
                        take_profit: entry_price + risk * self.risk_reward,
                        emitted_at_time: c.open_time,
                    });
                }
            } else if c.high > rolling_high && c.close < rolling_high {
                let entry_price = c.close;
                let stop_loss = c.high * (1.0 + self.sl_buffer_pct);
                let risk = stop_loss - entry_price;
                if risk > 0.0 {
                    signals.push(Signal {
                        direction: Direction::Short,
                        entry_price,
                        stop_loss,
                        take_profit: entry_price - risk * self.risk_reward,
                        emitted_at_time: c.open_time,
                    });
                }
            }
        }

        Ok(signals)
    }
}

// ─── sma_crossover ──────────────────────────────────────────────────────────
//
// A second, simpler strategy (grounded on `Verdenroz-finance-query`'s
// `SmaCrossover` example) so the registry and the optimizer family are
// demonstrably polymorphic over more than one strategy shape.

pub struct SmaCrossoverStrategy;

impl Strategy for SmaCrossoverStrategy {
    fn name(&self) -> &'static str {
        "sma_crossover"
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::new()
            .with("fast_period", ParamDomain::Integer { lo: 5, hi: 30 })
            .with("slow_period", ParamDomain::Integer { lo: 20, hi: 100 })
            .with("sl_pct", ParamDomain::Continuous { lo: 0.005, hi: 0.03 })
            .with("tp_pct", ParamDomain::Continuous { lo: 0.01, hi: 0.08 })
            .with("time_exit_candles", ParamDomain::Integer { lo: 5, hi: 100 })
    }

    fn build(&self, parameters: &ParameterVector) -> AppResult<Box<dyn StrategyInstance>> {
        let fast = param_i64(parameters, "fast_period", 10).max(1) as usize;
        let slow = param_i64(parameters, "slow_period", 50).max(fast as i64 + 1) as usize;
        Ok(Box::new(SmaCrossoverInstance {
            fast_period: fast,
            slow_period: slow,
            sl_pct: param_f64(parameters, "sl_pct", 0.01),
            tp_pct: param_f64(parameters, "tp_pct", 0.02),
        }))
    }

    fn time_exit_candles(&self, parameters: &ParameterVector) -> u32 {
        param_i64(parameters, "time_exit_candles", 50).max(1) as u32
    }
}

struct SmaCrossoverInstance {
    fast_period: usize,
    slow_period: usize,
    sl_pct: f64,
    tp_pct: f64,
}

fn sma(candles: &[Candle], upto: usize, period: usize) -> Option<f64> {
    if upto + 1 < period {
        return None;
    }
    let slice = &candles[upto + 1 - period..=upto];
    Some(slice.iter().map(|c| c.close).sum::<f64>() / period as f64)
}

impl StrategyInstance for SmaCrossoverInstance {
    fn generate_signals(&self, frame: &OhlcvFrame) -> AppResult<Vec<Signal>> {
        let candles = &frame.candles;
        let mut signals = Vec::new();
        let mut prev_diff: Option<f64> = None;

        for i in 0..candles.len() {
            let (Some(fast), Some(slow)) = (sma(candles, i, self.fast_period), sma(candles, i, self.slow_period))
            else {
                continue;
            };
            let diff = fast - slow;

            if let Some(prev) = prev_diff {
                let entry_price = candles[i].close;
                if prev <= 0.0 && diff > 0.0 {
                    signals.push(Signal {
                        direction: Direction::Long,
                        entry_price,
                        stop_loss: entry_price * (1.0 - self.sl_pct),
                        take_profit: entry_price * (1.0 + self.tp_pct),
                        emitted_at_time: candles[i].open_time,
                    });
                } else if prev >= 0.0 && diff < 0.0 {
                    signals.push(Signal {
                        direction: Direction::Short,
                        entry_price,
                        stop_loss: entry_price * (1.0 + self.sl_pct),
                        take_profit: entry_price * (1.0 - self.tp_pct),
                        emitted_at_time: candles[i].open_time,
                    });
                }
            }
            prev_diff = Some(diff);
        }

        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(t: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            open_time: Utc.timestamp_opt(t * 60, 0).unwrap(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        }
    }

    #[test]
    fn liquidity_sweep_emits_monotonic_signals() {
        let strat = LiquiditySweepStrategy;
        let params = strat.build(&ParameterVector::new()).unwrap();
        let mut candles = Vec::new();
        for i in 0..30 {
            candles.push(candle(i, 100.0, 101.0, 99.0, 100.0));
        }
        // Sweep below the rolling low then reclaim.
        candles.push(candle(30, 100.0, 100.5, 95.0, 99.5));
        let frame = OhlcvFrame {
            exchange: "test".into(),
            symbol: "BTC/USDT".into(),
            timeframe: crate::domain::Timeframe::M1,
            candles,
        };
        let signals = params.generate_signals(&frame).unwrap();
        let mut last = None;
        for s in &signals {
            assert!(s.is_well_formed());
            if let Some(prev) = last {
                assert!(s.emitted_at_time >= prev);
            }
            last = Some(s.emitted_at_time);
        }
    }

    #[test]
    fn unknown_strategy_is_validation_error() {
        assert!(matches!(lookup("nope"), Err(AppError::ValidationError(_))));
    }
}
