//! Market Data Accessor (spec §4.1): returns OHLCV frames for a
//! (symbol, exchange, timeframe, window) tuple from the store; external
//! backfill is a collaborator this module depends on only through the
//! [`Backfill`] trait, never by calling out to a live exchange itself.

use crate::db::Db;
use crate::domain::{OhlcvFrame, Timeframe};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Duration, Utc};

const MIN_LOOKBACK_MULTIPLE: i64 = 30;

/// External backfill collaborator (spec §4.1: "a blocking `ensure_range(...)`").
/// Out of scope to implement here — spec §1 names market-data ingestion
/// backfill as an external collaborator — but the accessor must depend on an
/// interface for it so the fallback path exists and is testable with a stub.
pub trait Backfill: Send + Sync {
    fn ensure_range(&self, exchange: &str, symbol: &str, timeframe: Timeframe, from: DateTime<Utc>, to: DateTime<Utc>) -> AppResult<()>;
}

/// A backfill collaborator that always reports the range unavailable — the
/// default when no live backfill collaborator is wired in.
pub struct NoBackfill;

impl Backfill for NoBackfill {
    fn ensure_range(&self, _exchange: &str, _symbol: &str, _timeframe: Timeframe, _from: DateTime<Utc>, _to: DateTime<Utc>) -> AppResult<()> {
        Err(AppError::DataUnavailable("no backfill collaborator configured".to_string()))
    }
}

pub struct MarketDataAccessor<'a> {
    db: &'a Db,
    backfill: &'a dyn Backfill,
}

impl<'a> MarketDataAccessor<'a> {
    pub fn new(db: &'a Db, backfill: &'a dyn Backfill) -> Self {
        Self { db, backfill }
    }

    /// Fetches a contiguous frame sorted by `open_time` ascending. Lookback
    /// windows shorter than `30 * timeframe` are rejected with
    /// `INSUFFICIENT_DATA` (spec §4.1); missing data at the tail triggers
    /// the backfill fallback, and `DATA_UNAVAILABLE` is raised if neither
    /// the store nor the collaborator can satisfy the window.
    pub fn fetch(&self, exchange: &str, symbol: &str, timeframe: Timeframe, lookback_days: u32, now: DateTime<Utc>) -> AppResult<OhlcvFrame> {
        let window = Duration::days(lookback_days as i64);
        let min_window = Duration::minutes(timeframe.minutes() * MIN_LOOKBACK_MULTIPLE);
        if window < min_window {
            return Err(AppError::InsufficientData(format!(
                "lookback of {lookback_days}d is shorter than 30x the {} timeframe",
                timeframe.as_str()
            )));
        }

        let from = now - window;
        let candles = self.db.load_candles(exchange, symbol, timeframe, from, now)?;

        let tail_gap = match candles.last() {
            Some(last) => now - last.open_time > Duration::minutes(timeframe.minutes() * 2),
            None => true,
        };

        let candles = if candles.is_empty() || tail_gap {
            self.backfill.ensure_range(exchange, symbol, timeframe, from, now)?;
            self.db.load_candles(exchange, symbol, timeframe, from, now)?
        } else {
            candles
        };

        if candles.is_empty() {
            return Err(AppError::DataUnavailable(format!("no data for {exchange}/{symbol}/{}", timeframe.as_str())));
        }

        Ok(OhlcvFrame { exchange: exchange.to_string(), symbol: symbol.to_string(), timeframe, candles })
    }
}
