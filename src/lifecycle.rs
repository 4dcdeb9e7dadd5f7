//! Configuration writer & lifecycle gate (spec §4.6): classifies a training
//! result into a lifecycle stage by a fixed, top-down decision table, derives
//! the circuit-breaker block SPEC_FULL §B names but spec §4.6 leaves
//! undefined, and persists the resulting `TrainedConfiguration`.

use crate::domain::{CircuitBreakers, LifecycleStage, MetricVector, ParameterVector, TrainedConfiguration, TrainingContext, ValidationMetrics};
use chrono::Utc;
use uuid::Uuid;

/// Classifies `(train_metrics, overfitting_flag)` into a lifecycle stage per
/// spec §4.6's table, evaluated top-down, first match wins.
pub fn classify(train_metrics: &MetricVector, overfitting_flag: bool) -> LifecycleStage {
    if train_metrics.net_profit_pct < 0.0 || train_metrics.sharpe_ratio < 0.5 {
        return LifecycleStage::Paper;
    }
    if overfitting_flag {
        return LifecycleStage::Paper;
    }
    if train_metrics.sample_size < 30 {
        return LifecycleStage::Discovery;
    }
    if train_metrics.sample_size < 100 && train_metrics.sharpe_ratio >= 1.0 {
        return LifecycleStage::Validation;
    }
    if train_metrics.sample_size >= 100 && train_metrics.sharpe_ratio >= 1.5 {
        return LifecycleStage::Mature;
    }
    LifecycleStage::Discovery
}

/// Derives conservative circuit breakers from the assigned stage (SPEC_FULL
/// §B) — tighter guardrails the lower the stage's allocation cap, since a
/// DISCOVERY-stage configuration has the least live track record.
fn derive_circuit_breakers(stage: LifecycleStage, train_metrics: &MetricVector) -> CircuitBreakers {
    let (max_daily_loss_pct, max_drawdown_pct, max_consecutive_losses, daily_trade_limit, cooldown_minutes) = match stage {
        LifecycleStage::Paper | LifecycleStage::Decay => (0.0, 0.0, 0, 0, 1440),
        LifecycleStage::Discovery => (1.0, 5.0, 4, 5, 120),
        LifecycleStage::Validation => (2.0, 8.0, 6, 10, 60),
        LifecycleStage::Mature => (3.0, 12.0, 8, 20, 30),
    };

    CircuitBreakers {
        max_daily_loss_pct,
        max_position_size_pct: stage.max_allocation_pct(),
        max_drawdown_pct,
        max_consecutive_losses,
        daily_trade_limit,
        cooldown_after_loss_minutes: cooldown_minutes,
        min_sharpe_ratio: (train_metrics.sharpe_ratio * 0.5).max(0.0),
    }
}

/// Builds a fresh `TrainedConfiguration` with a never-reused UUID (spec
/// §4.6). Does not persist — persistence is `job::mirror`'s responsibility,
/// mirroring the split of Design Note §9 (ephemeral decision here, durable
/// write at the store boundary).
pub fn compose(
    strategy: &str,
    context: TrainingContext,
    parameters: ParameterVector,
    train_metrics: MetricVector,
    validation: ValidationMetrics,
) -> TrainedConfiguration {
    let stage = classify(&train_metrics, validation.overfitting_flag);
    let circuit_breakers = derive_circuit_breakers(stage, &train_metrics);
    let now = Utc::now();

    TrainedConfiguration {
        id: Uuid::new_v4(),
        strategy: strategy.to_string(),
        context,
        parameters,
        metrics: train_metrics,
        validation,
        lifecycle_stage: stage,
        is_active: false,
        circuit_breakers,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(sample_size: usize, sharpe: f64, net_profit_pct: f64) -> MetricVector {
        MetricVector { sample_size, sharpe_ratio: sharpe, net_profit_pct, ..Default::default() }
    }

    #[test]
    fn negative_profit_or_low_sharpe_is_paper() {
        assert_eq!(classify(&metrics(200, 2.0, -1.0), false), LifecycleStage::Paper);
        assert_eq!(classify(&metrics(200, 0.2, 10.0), false), LifecycleStage::Paper);
    }

    #[test]
    fn overfitting_flag_overrides_everything_else() {
        assert_eq!(classify(&metrics(200, 3.0, 50.0), true), LifecycleStage::Paper);
    }

    #[test]
    fn sample_gated_promotion_to_mature() {
        // Scenario 5, spec §8: sample_size=150, sharpe=1.8, net_profit>0, no overfit.
        let stage = classify(&metrics(150, 1.8, 20.0), false);
        assert_eq!(stage, LifecycleStage::Mature);
        assert_eq!(stage.max_allocation_pct(), 10.0);
    }

    #[test]
    fn small_sample_is_discovery_even_with_good_sharpe() {
        assert_eq!(classify(&metrics(10, 2.0, 20.0), false), LifecycleStage::Discovery);
    }

    #[test]
    fn mid_sample_with_sharpe_above_one_is_validation() {
        assert_eq!(classify(&metrics(60, 1.2, 10.0), false), LifecycleStage::Validation);
    }

    #[test]
    fn large_sample_but_low_sharpe_falls_back_to_discovery() {
        assert_eq!(classify(&metrics(150, 1.1, 10.0), false), LifecycleStage::Discovery);
    }
}
