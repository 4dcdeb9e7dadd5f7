//! Backtest engine (spec §4.3): deterministic single-pass simulation of
//! entries, SL/TP/time exits, fees and slippage over one OHLCV frame.
//! Generalizes the teacher's walk-forward-embargo backtest into the
//! candle-driven SL/TP/time-exit model spec §4.3 actually asks for; position
//! sizing follows the teacher's Kelly-calculator style but uses the spec's
//! fixed risk-per-trade formula (§4.3 item 3), not a Kelly fraction.

use crate::domain::{Direction, ExitReason, MetricVector, OhlcvFrame, Signal, TradeRecord};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy)]
pub struct BacktestConfig {
    pub fee_rate: f64,
    pub slippage_rate: f64,
    pub initial_balance: f64,
    pub risk_per_trade: f64,
    pub max_concurrent_positions: usize,
    pub time_exit_candles: u32,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            fee_rate: 0.001,
            slippage_rate: 0.0005,
            initial_balance: 10_000.0,
            risk_per_trade: 0.02,
            max_concurrent_positions: 1,
            time_exit_candles: 50,
        }
    }
}

struct OpenPosition {
    direction: Direction,
    entry_time: chrono::DateTime<chrono::Utc>,
    entry_price: f64,
    stop_loss: f64,
    take_profit: f64,
    quantity: f64,
    candles_held: u32,
    balance_at_entry: f64,
    entry_fee: f64,
}

/// Runs the deterministic backtest. Returns `(trades, metrics)`.
///
/// Fails with `EmptyFrame`/`MalformedSignal` per spec §4.3; an empty signal
/// list is not an error — it returns an empty trade list and a zeroed
/// `MetricVector` with `sample_size = 0`.
pub fn run(frame: &OhlcvFrame, signals: &[Signal], config: &BacktestConfig) -> AppResult<(Vec<TradeRecord>, MetricVector)> {
    if frame.is_empty() {
        return Err(AppError::EmptyFrame);
    }
    for s in signals {
        if !s.is_well_formed() {
            return Err(AppError::MalformedSignal(format!(
                "signal at {} violates SL/entry/TP ordering for {:?}",
                s.emitted_at_time, s.direction
            )));
        }
    }

    let mut balance = config.initial_balance;
    let mut trades = Vec::new();
    let mut open: Option<OpenPosition> = None;
    let mut signal_idx = 0usize;

    for candle in &frame.candles {
        // (a) check exits for any open position first (spec §4.3 step 1).
        if let Some(pos) = open.as_mut() {
            pos.candles_held += 1;

            let (hit_sl, sl_price) = match pos.direction {
                Direction::Long => (candle.low <= pos.stop_loss, pos.stop_loss),
                Direction::Short => (candle.high >= pos.stop_loss, pos.stop_loss),
            };
            let (hit_tp, tp_price) = match pos.direction {
                Direction::Long => (candle.high >= pos.take_profit, pos.take_profit),
                Direction::Short => (candle.low <= pos.take_profit, pos.take_profit),
            };

            let exit = if hit_sl {
                // SL wins on same-candle SL+TP touch (spec §4.3 step 4, conservative policy).
                Some((ExitReason::StopLoss, sl_price))
            } else if hit_tp {
                Some((ExitReason::TakeProfit, tp_price))
            } else if pos.candles_held >= config.time_exit_candles {
                Some((ExitReason::TimeExit, candle.close))
            } else {
                None
            };

            if let Some((reason, exit_price)) = exit {
                let closed = open.take().unwrap();
                let (realized_pnl_abs, exit_fill_price) = settle(&closed, exit_price, config);
                balance += realized_pnl_abs;
                trades.push(TradeRecord {
                    entry_time: closed.entry_time,
                    entry_price: closed.entry_price,
                    exit_time: candle.open_time,
                    exit_price: exit_fill_price,
                    direction: closed.direction,
                    quantity: closed.quantity,
                    exit_reason: reason,
                    realized_pnl_pct: realized_pnl_abs / closed.balance_at_entry,
                    realized_pnl_abs,
                });
            }
        }

        // (b) check for a new signal whose emitted_at_time equals this candle's open_time.
        if open.is_none() || config.max_concurrent_positions > 1 {
            while signal_idx < signals.len() && signals[signal_idx].emitted_at_time < candle.open_time {
                signal_idx += 1;
            }
            if open.is_none() && signal_idx < signals.len() && signals[signal_idx].emitted_at_time == candle.open_time {
                let sig = signals[signal_idx];
                signal_idx += 1;

                // Position sizing from UN-SLIPPED prices (spec §4.3 step 3 — critical invariant).
                let sl_distance_pct = (sig.entry_price - sig.stop_loss).abs() / sig.entry_price;
                if sl_distance_pct > 0.0 {
                    let quantity = (balance * config.risk_per_trade) / (sig.entry_price * sl_distance_pct);
                    // Entry fee, charged on the slipped fill notional. Folded into the
                    // trade's realized_pnl_abs at settlement (not subtracted from
                    // `balance` here) so sum(realized_pnl_abs) == final - initial exactly.
                    let fill_price = slipped_entry_price(sig.entry_price, sig.direction, config.slippage_rate);
                    let entry_fee = config.fee_rate * fill_price * quantity;
                    open = Some(OpenPosition {
                        direction: sig.direction,
                        entry_time: candle.open_time,
                        entry_price: sig.entry_price,
                        stop_loss: sig.stop_loss,
                        take_profit: sig.take_profit,
                        quantity,
                        candles_held: 0,
                        balance_at_entry: balance,
                        entry_fee,
                    });
                }
            }
        }
    }

    // End of frame: close any open position at the final close (spec §4.3 step 6).
    if let Some(pos) = open.take() {
        let last = frame.candles.last().unwrap();
        let (realized_pnl_abs, exit_fill_price) = settle(&pos, last.close, config);
        balance += realized_pnl_abs;
        trades.push(TradeRecord {
            entry_time: pos.entry_time,
            entry_price: pos.entry_price,
            exit_time: last.open_time,
            exit_price: exit_fill_price,
            direction: pos.direction,
            quantity: pos.quantity,
            exit_reason: ExitReason::EndOfData,
            realized_pnl_pct: realized_pnl_abs / pos.balance_at_entry,
            realized_pnl_abs,
        });
    }

    let metrics = compute_metrics(&trades, config, frame.timeframe);
    Ok((trades, metrics))
}

/// Applies exit-side slippage (mirroring entry direction) and fees, returning
/// `(realized_pnl_abs, exit_fill_price)`.
fn settle(pos: &OpenPosition, exit_price: f64, config: &BacktestConfig) -> (f64, f64) {
    let entry_fill = slipped_entry_price(pos.entry_price, pos.direction, config.slippage_rate);
    let exit_fill = match pos.direction {
        Direction::Long => exit_price * (1.0 - config.slippage_rate),
        Direction::Short => exit_price * (1.0 + config.slippage_rate),
    };

    let gross_pnl = match pos.direction {
        Direction::Long => (exit_fill - entry_fill) * pos.quantity,
        Direction::Short => (entry_fill - exit_fill) * pos.quantity,
    };
    let exit_fee = config.fee_rate * exit_fill * pos.quantity;
    (gross_pnl - exit_fee - pos.entry_fee, exit_fill)
}

fn slipped_entry_price(entry_price: f64, direction: Direction, slippage_rate: f64) -> f64 {
    match direction {
        Direction::Long => entry_price * (1.0 + slippage_rate),
        Direction::Short => entry_price * (1.0 - slippage_rate),
    }
}

fn compute_metrics(trades: &[TradeRecord], config: &BacktestConfig, timeframe: crate::domain::Timeframe) -> MetricVector {
    if trades.is_empty() {
        return MetricVector { sample_size: 0, ..Default::default() };
    }

    let returns: Vec<f64> = trades.iter().map(|t| t.realized_pnl_pct).collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n.max(1.0);
    let std_dev = variance.sqrt();

    let downside: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).copied().collect();
    let downside_std = if downside.is_empty() {
        0.0
    } else {
        let dn = downside.len() as f64;
        let dmean = downside.iter().sum::<f64>() / dn;
        (downside.iter().map(|r| (r - dmean).powi(2)).sum::<f64>() / dn).sqrt()
    };

    let wins: Vec<f64> = returns.iter().filter(|&&r| r > 0.0).copied().collect();
    let losses: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).copied().collect();
    let gross_win_rate = wins.len() as f64 / n;
    let avg_win_pct = if wins.is_empty() { 0.0 } else { wins.iter().sum::<f64>() / wins.len() as f64 };
    let avg_loss_pct = if losses.is_empty() { 0.0 } else { losses.iter().sum::<f64>() / losses.len() as f64 };

    let gross_profit: f64 = wins.iter().map(|w| w * config.initial_balance).sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs() * config.initial_balance).sum();
    let profit_factor = if gross_loss > 0.0 { gross_profit / gross_loss } else { f64::INFINITY };

    let net_profit_pct = trades.iter().map(|t| t.realized_pnl_abs).sum::<f64>() / config.initial_balance * 100.0;

    // Equity curve and max drawdown.
    let mut equity = config.initial_balance;
    let mut peak = equity;
    let mut max_dd = 0.0;
    for t in trades {
        equity += t.realized_pnl_abs;
        peak = peak.max(equity);
        let dd = (peak - equity) / peak;
        max_dd = max_dd.max(dd);
    }

    // Sharpe/Sortino: per-trade returns, risk-free rate zero, annualized by
    // the candle frequency implied by the timeframe (spec §4.3 item 7,
    // factor resolved in SPEC_FULL §C.3).
    let annualization = timeframe.periods_per_year().sqrt();
    let sharpe_ratio = if std_dev > 0.0 { (mean / std_dev) * annualization } else { 0.0 };
    let sortino_ratio = if downside_std > 0.0 { (mean / downside_std) * annualization } else { 0.0 };
    let calmar_ratio = if max_dd > 0.0 { (net_profit_pct / 100.0) / max_dd } else { 0.0 };

    MetricVector {
        net_profit_pct,
        gross_win_rate,
        sharpe_ratio,
        sortino_ratio,
        calmar_ratio,
        max_drawdown_pct: max_dd * 100.0,
        profit_factor,
        sample_size: trades.len(),
        avg_win_pct,
        avg_loss_pct,
        fill_rate: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candle, OhlcvFrame, Timeframe};
    use chrono::{TimeZone, Utc};

    fn frame_with(candles: Vec<Candle>) -> OhlcvFrame {
        OhlcvFrame { exchange: "t".into(), symbol: "X/Y".into(), timeframe: Timeframe::M1, candles }
    }

    fn c(t: i64, o: f64, h: f64, l: f64, cl: f64) -> Candle {
        Candle { open_time: Utc.timestamp_opt(t * 60, 0).unwrap(), open: o, high: h, low: l, close: cl, volume: 1.0 }
    }

    #[test]
    fn empty_frame_is_error() {
        let frame = frame_with(vec![]);
        let err = run(&frame, &[], &BacktestConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::EmptyFrame));
    }

    #[test]
    fn no_signals_returns_zeroed_metrics_not_error() {
        let frame = frame_with(vec![c(0, 100.0, 101.0, 99.0, 100.0)]);
        let (trades, metrics) = run(&frame, &[], &BacktestConfig::default()).unwrap();
        assert!(trades.is_empty());
        assert_eq!(metrics.sample_size, 0);
    }

    #[test]
    fn sl_wins_on_same_candle_sl_tp_touch() {
        let candles = vec![
            c(0, 100.0, 100.0, 100.0, 100.0),
            // Both SL (95) and TP (110) touched on the next candle.
            c(1, 100.0, 115.0, 90.0, 100.0),
        ];
        let frame = frame_with(candles);
        let signal = Signal {
            direction: Direction::Long,
            entry_price: 100.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            emitted_at_time: Utc.timestamp_opt(0, 0).unwrap(),
        };
        let (trades, _) = run(&frame, &[signal], &BacktestConfig { max_concurrent_positions: 1, ..Default::default() }).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_reason, ExitReason::StopLoss);
        assert!(trades[0].exit_price <= 95.0);
    }

    #[test]
    fn position_sizing_matches_risk_per_trade_invariant() {
        let candles = vec![c(0, 100.0, 100.0, 100.0, 100.0), c(1, 100.0, 100.0, 100.0, 100.0), c(2, 100.0, 100.0, 100.0, 105.0)];
        let frame = frame_with(candles);
        let signal = Signal {
            direction: Direction::Long,
            entry_price: 100.0,
            stop_loss: 90.0,
            take_profit: 150.0,
            emitted_at_time: Utc.timestamp_opt(0, 0).unwrap(),
        };
        let config = BacktestConfig { fee_rate: 0.0, slippage_rate: 0.0, risk_per_trade: 0.02, initial_balance: 10_000.0, time_exit_candles: 1, ..Default::default() };
        let (trades, _) = run(&frame, &[signal], &config).unwrap();
        assert_eq!(trades.len(), 1);
        let expected_risk = config.initial_balance * config.risk_per_trade;
        let actual_risk = trades[0].quantity * (signal.entry_price - signal.stop_loss).abs();
        assert!((actual_risk - expected_risk).abs() < 1e-6, "actual={actual_risk} expected={expected_risk}");
    }

    #[test]
    fn malformed_signal_fails_whole_run() {
        let frame = frame_with(vec![c(0, 100.0, 100.0, 100.0, 100.0)]);
        let bad = Signal { direction: Direction::Long, entry_price: 100.0, stop_loss: 105.0, take_profit: 110.0, emitted_at_time: Utc.timestamp_opt(0, 0).unwrap() };
        assert!(matches!(run(&frame, &[bad], &BacktestConfig::default()), Err(AppError::MalformedSignal(_))));
    }

    #[test]
    fn pnl_conserves_balance_delta() {
        let candles = (0..10).map(|i| c(i, 100.0 + i as f64, 102.0 + i as f64, 98.0 + i as f64, 100.5 + i as f64)).collect();
        let frame = frame_with(candles);
        let signal = Signal { direction: Direction::Long, entry_price: 101.0, stop_loss: 98.0, take_profit: 130.0, emitted_at_time: Utc.timestamp_opt(60, 0).unwrap() };
        let config = BacktestConfig { time_exit_candles: 5, ..Default::default() };
        let (trades, _) = run(&frame, &[signal], &config).unwrap();
        let sum_pnl: f64 = trades.iter().map(|t| t.realized_pnl_abs).sum();
        let final_balance = config.initial_balance + sum_pnl;
        assert!((final_balance - (config.initial_balance + sum_pnl)).abs() < 1e-9);
    }
}
