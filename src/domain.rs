//! Shared data-model types (spec §3). Every other module imports from here
//! rather than redeclaring these shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ─── Market data ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ordered sequence of candles for one (exchange, symbol, timeframe).
/// Invariant: `candles` is sorted by `open_time` ascending; gaps are
/// permitted but never interpolated (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvFrame {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
}

impl OhlcvFrame {
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::M1),
            "5m" => Some(Self::M5),
            "15m" => Some(Self::M15),
            "1h" => Some(Self::H1),
            "4h" => Some(Self::H4),
            "1d" => Some(Self::D1),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::H1 => 60,
            Self::H4 => 240,
            Self::D1 => 1440,
        }
    }

    /// Candle-frequency annualization factor for Sharpe, per SPEC_FULL §C.3:
    /// sqrt(periods_per_year), periods_per_year derived from the timeframe.
    pub fn periods_per_year(&self) -> f64 {
        if matches!(self, Self::D1) {
            365.0
        } else {
            (365.0 * 24.0 * 60.0) / self.minutes() as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Regime {
    Bull,
    Bear,
    Sideways,
    Volatile,
}

impl Regime {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bull" => Some(Self::Bull),
            "bear" => Some(Self::Bear),
            "sideways" => Some(Self::Sideways),
            "volatile" => Some(Self::Volatile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bull => "bull",
            Self::Bear => "bear",
            Self::Sideways => "sideways",
            Self::Volatile => "volatile",
        }
    }
}

/// (exchange, pair, timeframe, regime) tuple a job/configuration is scoped to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TrainingContext {
    pub exchange: String,
    pub pair: String,
    pub timeframe: Timeframe,
    pub regime: Regime,
}

// ─── Parameter space ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParamDomain {
    Continuous { lo: f64, hi: f64 },
    Integer { lo: i64, hi: i64 },
    Discrete { values: Vec<ParamValue> },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
}

impl ParamValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            ParamValue::Float(v) => *v,
            ParamValue::Int(v) => *v as f64,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            ParamValue::Float(v) => *v as i64,
            ParamValue::Int(v) => *v,
        }
    }
}

/// Mapping from parameter name to its domain. Every strategy declares its
/// own space (spec §3); optimizers consume it uniformly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParameterSpace {
    pub domains: BTreeMap<String, ParamDomain>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, domain: ParamDomain) -> Self {
        self.domains.insert(name.into(), domain);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.domains.keys()
    }
}

/// Concrete parameter assignment, immutable once dispatched to the backtest
/// engine (spec §3).
pub type ParameterVector = BTreeMap<String, ParamValue>;

// ─── Signals and trades ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub emitted_at_time: DateTime<Utc>,
}

impl Signal {
    /// spec §3 invariant: LONG needs sl < entry < tp; SHORT needs tp < entry < sl.
    pub fn is_well_formed(&self) -> bool {
        match self.direction {
            Direction::Long => self.stop_loss < self.entry_price && self.entry_price < self.take_profit,
            Direction::Short => self.take_profit < self.entry_price && self.entry_price < self.stop_loss,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeExit,
    EndOfData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub direction: Direction,
    pub quantity: f64,
    pub exit_reason: ExitReason,
    pub realized_pnl_pct: f64,
    pub realized_pnl_abs: f64,
}

// ─── Metrics ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct MetricVector {
    pub net_profit_pct: f64,
    pub gross_win_rate: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown_pct: f64,
    pub profit_factor: f64,
    pub sample_size: usize,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub fill_rate: f64,
}

// ─── Jobs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The DAG of spec §8: PENDING -> {RUNNING, CANCELLED}; RUNNING ->
    /// {COMPLETED, FAILED, CANCELLED}.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Cancelled) |
            (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OptimizerKind {
    Grid,
    Random,
    Bayesian,
}

impl OptimizerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grid" => Some(Self::Grid),
            "random" => Some(Self::Random),
            "bayesian" => Some(Self::Bayesian),
            _ => None,
        }
    }
}

/// Bounded stage name mirrored to the job record (spec §4.7: one of
/// "loading_data", "optimizing", "validating", "saving", "done").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStage {
    LoadingData,
    Optimizing,
    Validating,
    Saving,
    Done,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadingData => "loading_data",
            Self::Optimizing => "optimizing",
            Self::Validating => "validating",
            Self::Saving => "saving",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub strategy: String,
    pub exchange: String,
    pub pair: String,
    pub timeframe: Timeframe,
    pub regime: Regime,
    pub optimizer: OptimizerKind,
    pub iteration_budget: u32,
    pub lookback_days: u32,
    pub random_seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub spec: JobSpec,
    pub progress: f64,
    pub current_iteration: u32,
    pub total_iterations: u32,
    pub current_stage: JobStage,
    pub best_score_so_far: Option<f64>,
    pub error_message: Option<String>,
    pub produced_configuration_id: Option<Uuid>,
}

impl Job {
    pub fn new(id: Uuid, spec: JobSpec, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            submitted_at,
            started_at: None,
            completed_at: None,
            status: JobStatus::Pending,
            total_iterations: spec.iteration_budget,
            spec,
            progress: 0.0,
            current_iteration: 0,
            current_stage: JobStage::LoadingData,
            best_score_so_far: None,
            error_message: None,
            produced_configuration_id: None,
        }
    }
}

// ─── Trained configurations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleStage {
    Discovery,
    Validation,
    Mature,
    Decay,
    Paper,
}

impl LifecycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "DISCOVERY",
            Self::Validation => "VALIDATION",
            Self::Mature => "MATURE",
            Self::Decay => "DECAY",
            Self::Paper => "PAPER",
        }
    }

    /// Max allocation percentage per the decision table of spec §4.6.
    pub fn max_allocation_pct(&self) -> f64 {
        match self {
            Self::Paper => 0.0,
            Self::Discovery => 2.0,
            Self::Validation => 5.0,
            Self::Mature => 10.0,
            Self::Decay => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub train_metrics: MetricVector,
    pub test_metrics: MetricVector,
    pub overfitting_flag: bool,
    pub train_window_days: i64,
    pub test_window_days: i64,
    pub gap_days: i64,
    pub windows_evaluated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakers {
    pub max_daily_loss_pct: f64,
    pub max_position_size_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_consecutive_losses: u32,
    pub daily_trade_limit: u32,
    pub cooldown_after_loss_minutes: u32,
    pub min_sharpe_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedConfiguration {
    pub id: Uuid,
    pub strategy: String,
    pub context: TrainingContext,
    pub parameters: ParameterVector,
    pub metrics: MetricVector,
    pub validation: ValidationMetrics,
    pub lifecycle_stage: LifecycleStage,
    pub is_active: bool,
    pub circuit_breakers: CircuitBreakers,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
