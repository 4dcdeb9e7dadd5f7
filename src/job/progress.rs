//! Throttle decision for the progress-mirror writer (spec §4.7): write when
//! `|Δprogress| >= threshold` or the stage changed, never on every tick.

use crate::domain::JobStage;

pub struct ProgressGate {
    last_progress: f64,
    last_stage: JobStage,
    primed: bool,
}

impl ProgressGate {
    pub fn new() -> Self {
        Self { last_progress: 0.0, last_stage: JobStage::LoadingData, primed: false }
    }

    /// Returns whether this observation crosses the throttle and, if so,
    /// records it as the new baseline.
    pub fn should_write(&mut self, progress: f64, stage: JobStage, threshold_pct: f64) -> bool {
        let stage_changed = stage != self.last_stage;
        let progress_changed = !self.primed || (progress - self.last_progress).abs() >= threshold_pct;
        if stage_changed || progress_changed {
            self.last_progress = progress;
            self.last_stage = stage;
            self.primed = true;
            true
        } else {
            false
        }
    }
}

impl Default for ProgressGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_always_writes() {
        let mut gate = ProgressGate::new();
        assert!(gate.should_write(0.0, JobStage::LoadingData, 0.1));
    }

    #[test]
    fn small_deltas_are_suppressed_until_threshold_crossed() {
        let mut gate = ProgressGate::new();
        assert!(gate.should_write(0.0, JobStage::Optimizing, 1.0));
        assert!(!gate.should_write(0.3, JobStage::Optimizing, 1.0));
        assert!(gate.should_write(1.2, JobStage::Optimizing, 1.0));
    }

    #[test]
    fn stage_change_always_writes_regardless_of_delta() {
        let mut gate = ProgressGate::new();
        assert!(gate.should_write(50.0, JobStage::Optimizing, 5.0));
        assert!(gate.should_write(50.0, JobStage::Validating, 5.0));
    }
}
