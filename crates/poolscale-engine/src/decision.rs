//! Threshold decision engine — streak-counter hysteresis over metrics.

use tracing::debug;

use poolscale_state::{ResourceLimits, ResourceMetrics, ScalingPolicyConfig};

/// CPU quota granularity, percent-of-one-core units.
const CPU_GRANULARITY: u64 = 50;
/// Memory granularity, GB.
const MEMORY_GRANULARITY_GB: u64 = 8;
/// Task-count granularity.
const TASKS_GRANULARITY: u64 = 25;

/// Outcome of evaluating one metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No action this tick.
    None,
    /// The scale-up condition has held long enough.
    ScaleUp,
    /// The scale-down condition has held long enough.
    ScaleDown,
}

/// Stateful hysteresis evaluator.
///
/// Scale-up is disjunctive (ANY dimension hot triggers, eager by design to
/// protect the host); scale-down is conjunctive (ALL dimensions must be
/// cold, conservative by design). A condition must hold for the configured
/// number of consecutive ticks before the decision fires, and firing does
/// not reset the streaks — the caller calls [`reset`](Self::reset) only
/// after the action was applied successfully, so a failed apply can retry
/// on the next eligible tick.
#[derive(Debug, Default)]
pub struct ThresholdDecisionEngine {
    scale_up_streak: u32,
    scale_down_streak: u32,
}

impl ThresholdDecisionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one metrics snapshot against the current limits and policy.
    pub fn evaluate(
        &mut self,
        metrics: &ResourceMetrics,
        limits: &ResourceLimits,
        policy: &ScalingPolicyConfig,
    ) -> Decision {
        let cpu = metrics.cpu_percent;
        let memory_util = utilization(metrics.memory_gb, limits.memory_gb);
        let process_util = utilization(metrics.process_count as f64, limits.tasks_max);

        let up_holds = cpu > policy.cpu_scale_up_pct
            || memory_util > policy.memory_scale_up_pct
            || process_util > policy.tasks_scale_up_pct;
        let down_holds = cpu < policy.cpu_scale_down_pct
            && memory_util < policy.memory_scale_down_pct
            && process_util < policy.tasks_scale_down_pct;

        // Streaks reset the instant their condition stops holding,
        // independent of whether they had fired.
        if up_holds {
            self.scale_up_streak += 1;
        } else {
            self.scale_up_streak = 0;
        }
        if down_holds {
            self.scale_down_streak += 1;
        } else {
            self.scale_down_streak = 0;
        }

        if up_holds && self.scale_up_streak >= policy.consecutive_scale_up_checks {
            debug!(
                streak = self.scale_up_streak,
                cpu, memory_util, process_util, "scale-up condition persisted"
            );
            return Decision::ScaleUp;
        }
        if down_holds && self.scale_down_streak >= policy.consecutive_scale_down_checks {
            debug!(
                streak = self.scale_down_streak,
                cpu, memory_util, process_util, "scale-down condition persisted"
            );
            return Decision::ScaleDown;
        }
        Decision::None
    }

    /// Zero both streaks. Called after an action was applied successfully.
    pub fn reset(&mut self) {
        self.scale_up_streak = 0;
        self.scale_down_streak = 0;
    }

    /// Current (scale_up, scale_down) streak values.
    pub fn streaks(&self) -> (u32, u32) {
        (self.scale_up_streak, self.scale_down_streak)
    }
}

/// Candidate new limits for a firing direction.
///
/// Each dimension is multiplied by the direction's factor (memory uses its
/// own, gentler factors), rounded to its granularity, then clamped into
/// the policy's `[min, max]` independently.
pub fn compute_new_limits(
    current: ResourceLimits,
    direction: Decision,
    policy: &ScalingPolicyConfig,
) -> ResourceLimits {
    let (factor, memory_factor) = match direction {
        Decision::None => return current,
        Decision::ScaleUp => (policy.scale_up_factor, policy.memory_scale_up_factor),
        Decision::ScaleDown => (policy.scale_down_factor, policy.memory_scale_down_factor),
    };

    let scaled = ResourceLimits {
        cpu_quota: round_to(current.cpu_quota as f64 * factor, CPU_GRANULARITY),
        memory_gb: round_to(current.memory_gb as f64 * memory_factor, MEMORY_GRANULARITY_GB),
        tasks_max: round_to(current.tasks_max as f64 * factor, TASKS_GRANULARITY),
    };
    clamp(scaled, policy)
}

/// Round requested limits to legible granularity and clamp them into the
/// policy bounds. Used for operator-supplied manual limits.
pub fn normalize_limits(limits: ResourceLimits, policy: &ScalingPolicyConfig) -> ResourceLimits {
    let rounded = ResourceLimits {
        cpu_quota: round_to(limits.cpu_quota as f64, CPU_GRANULARITY),
        memory_gb: round_to(limits.memory_gb as f64, MEMORY_GRANULARITY_GB),
        tasks_max: round_to(limits.tasks_max as f64, TASKS_GRANULARITY),
    };
    clamp(rounded, policy)
}

fn clamp(limits: ResourceLimits, policy: &ScalingPolicyConfig) -> ResourceLimits {
    ResourceLimits {
        cpu_quota: limits
            .cpu_quota
            .clamp(policy.min_limits.cpu_quota, policy.max_limits.cpu_quota),
        memory_gb: limits
            .memory_gb
            .clamp(policy.min_limits.memory_gb, policy.max_limits.memory_gb),
        tasks_max: limits
            .tasks_max
            .clamp(policy.min_limits.tasks_max, policy.max_limits.tasks_max),
    }
}

fn round_to(value: f64, granularity: u64) -> u64 {
    let steps = (value / granularity as f64).round();
    // Unlimited ("max") ceilings arrive as u64::MAX; saturate and let the
    // clamp pull the value back into bounds.
    (steps as u64).saturating_mul(granularity)
}

fn utilization(used: f64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    used / limit as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::config_for_profile;
    use poolscale_state::PolicyProfile;

    fn balanced() -> ScalingPolicyConfig {
        config_for_profile(PolicyProfile::Balanced)
    }

    fn limits(cpu: u64, mem: u64, tasks: u64) -> ResourceLimits {
        ResourceLimits {
            cpu_quota: cpu,
            memory_gb: mem,
            tasks_max: tasks,
        }
    }

    fn metrics(cpu_percent: f64, memory_gb: f64, process_count: u64) -> ResourceMetrics {
        ResourceMetrics {
            timestamp: 1000,
            cpu_percent,
            memory_gb,
            process_count,
            active_workers: 0,
            pending_jobs: 0,
            remaining_quota: 0,
            degraded: false,
        }
    }

    #[test]
    fn scale_up_fires_only_after_consecutive_checks() {
        let policy = balanced(); // consecutive_scale_up_checks = 3
        let current = limits(200, 32, 250);
        let mut engine = ThresholdDecisionEngine::new();

        let hot = metrics(90.0, 10.0, 100);
        assert_eq!(engine.evaluate(&hot, &current, &policy), Decision::None);
        assert_eq!(engine.evaluate(&hot, &current, &policy), Decision::None);
        assert_eq!(engine.evaluate(&hot, &current, &policy), Decision::ScaleUp);
    }

    #[test]
    fn single_cold_tick_resets_scale_up_streak() {
        let policy = balanced();
        let current = limits(200, 32, 250);
        let mut engine = ThresholdDecisionEngine::new();

        let hot = metrics(90.0, 10.0, 100);
        let mild = metrics(50.0, 16.0, 125);

        engine.evaluate(&hot, &current, &policy);
        engine.evaluate(&hot, &current, &policy);
        assert_eq!(engine.evaluate(&mild, &current, &policy), Decision::None);
        assert_eq!(engine.streaks().0, 0);

        // Streak must re-accumulate from scratch.
        engine.evaluate(&hot, &current, &policy);
        engine.evaluate(&hot, &current, &policy);
        assert_eq!(engine.evaluate(&hot, &current, &policy), Decision::ScaleUp);
    }

    #[test]
    fn firing_does_not_reset_the_streak() {
        let policy = balanced();
        let current = limits(200, 32, 250);
        let mut engine = ThresholdDecisionEngine::new();

        let hot = metrics(90.0, 10.0, 100);
        engine.evaluate(&hot, &current, &policy);
        engine.evaluate(&hot, &current, &policy);
        assert_eq!(engine.evaluate(&hot, &current, &policy), Decision::ScaleUp);
        // No reset in between: the next qualifying tick fires again.
        assert_eq!(engine.evaluate(&hot, &current, &policy), Decision::ScaleUp);

        engine.reset();
        assert_eq!(engine.streaks(), (0, 0));
        assert_eq!(engine.evaluate(&hot, &current, &policy), Decision::None);
    }

    #[test]
    fn scale_up_is_disjunctive_over_dimensions() {
        let policy = balanced();
        let current = limits(200, 32, 250);

        // Only memory hot: 30 of 32 GB is ~94% utilization.
        let mut engine = ThresholdDecisionEngine::new();
        let memory_hot = metrics(10.0, 30.0, 50);
        engine.evaluate(&memory_hot, &current, &policy);
        engine.evaluate(&memory_hot, &current, &policy);
        assert_eq!(engine.evaluate(&memory_hot, &current, &policy), Decision::ScaleUp);

        // Only processes hot: 240 of 250 is 96%.
        let mut engine = ThresholdDecisionEngine::new();
        let tasks_hot = metrics(10.0, 10.0, 240);
        engine.evaluate(&tasks_hot, &current, &policy);
        engine.evaluate(&tasks_hot, &current, &policy);
        assert_eq!(engine.evaluate(&tasks_hot, &current, &policy), Decision::ScaleUp);
    }

    #[test]
    fn scale_down_is_conjunctive_over_dimensions() {
        let policy = balanced(); // consecutive_scale_down_checks = 10
        let current = limits(200, 32, 250);

        // One dimension above its down-threshold blocks scale-down:
        // memory at 16 of 32 GB is 50%, above the 30% threshold.
        let mut engine = ThresholdDecisionEngine::new();
        let one_warm = metrics(5.0, 16.0, 20);
        for _ in 0..20 {
            assert_eq!(engine.evaluate(&one_warm, &current, &policy), Decision::None);
        }
        assert_eq!(engine.streaks().1, 0);

        // All dimensions cold: fires on the 10th consecutive tick.
        let mut engine = ThresholdDecisionEngine::new();
        let all_cold = metrics(5.0, 4.0, 20);
        for _ in 0..9 {
            assert_eq!(engine.evaluate(&all_cold, &current, &policy), Decision::None);
        }
        assert_eq!(engine.evaluate(&all_cold, &current, &policy), Decision::ScaleDown);
    }

    #[test]
    fn mid_range_metrics_decide_nothing() {
        let policy = balanced();
        let current = limits(200, 32, 250);
        let mut engine = ThresholdDecisionEngine::new();

        // 50% CPU, 50% memory, 50% tasks: neither condition holds.
        let mild = metrics(50.0, 16.0, 125);
        for _ in 0..20 {
            assert_eq!(engine.evaluate(&mild, &current, &policy), Decision::None);
        }
        assert_eq!(engine.streaks(), (0, 0));
    }

    #[test]
    fn worked_scale_up_example() {
        // {cpu:200, mem:32, tasks:250} with the balanced profile
        // (factor 1.5, memory factor 1.25) scales to {300, 40, 375}.
        let policy = balanced();
        let current = limits(200, 32, 250);

        let new = compute_new_limits(current, Decision::ScaleUp, &policy);
        assert_eq!(new, limits(300, 40, 375));
    }

    #[test]
    fn scale_down_rounds_to_granularity() {
        let policy = balanced();
        let current = limits(300, 40, 375);

        // cpu 300*0.7=210 → 200; mem 40*0.85=34 → 32; tasks 375*0.7=262.5 → 275.
        let new = compute_new_limits(current, Decision::ScaleDown, &policy);
        assert_eq!(new, limits(200, 32, 275));
    }

    #[test]
    fn none_direction_returns_current() {
        let policy = balanced();
        let current = limits(200, 32, 250);
        assert_eq!(compute_new_limits(current, Decision::None, &policy), current);
    }

    #[test]
    fn computed_limits_always_within_bounds() {
        let policy = balanced();
        let currents = [
            policy.min_limits,
            policy.max_limits,
            limits(100, 8, 50),
            limits(1600, 256, 2000),
            limits(200, 32, 250),
            limits(750, 120, 1000),
        ];

        for current in currents {
            for direction in [Decision::ScaleUp, Decision::ScaleDown] {
                let new = compute_new_limits(current, direction, &policy);
                assert!(new.cpu_quota >= policy.min_limits.cpu_quota);
                assert!(new.cpu_quota <= policy.max_limits.cpu_quota);
                assert!(new.memory_gb >= policy.min_limits.memory_gb);
                assert!(new.memory_gb <= policy.max_limits.memory_gb);
                assert!(new.tasks_max >= policy.min_limits.tasks_max);
                assert!(new.tasks_max <= policy.max_limits.tasks_max);
            }
        }
    }

    #[test]
    fn scale_up_at_max_stays_at_max() {
        let policy = balanced();
        let new = compute_new_limits(policy.max_limits, Decision::ScaleUp, &policy);
        assert_eq!(new, policy.max_limits);
    }

    #[test]
    fn scale_down_at_min_stays_at_min() {
        let policy = balanced();
        let new = compute_new_limits(policy.min_limits, Decision::ScaleDown, &policy);
        assert_eq!(new, policy.min_limits);
    }

    #[test]
    fn normalize_rounds_and_clamps_manual_limits() {
        let policy = balanced();

        // 430 → 450, 13 GB → 16, 260 → 250.
        let rounded = normalize_limits(limits(430, 13, 260), &policy);
        assert_eq!(rounded, limits(450, 16, 250));

        // Out-of-bounds requests clamp to the hard bounds.
        let clamped = normalize_limits(limits(10_000, 1000, 9000), &policy);
        assert_eq!(clamped, policy.max_limits);
        let floored = normalize_limits(limits(0, 0, 0), &policy);
        assert_eq!(floored, policy.min_limits);
    }

    #[test]
    fn zero_limit_dimension_reports_zero_utilization() {
        // Guards against division by zero rather than NaN poisoning.
        assert_eq!(utilization(10.0, 0), 0.0);
    }
}
