//! Domain types for the poolscale autoscaler.
//!
//! These types represent the persisted state of the control loop: metrics
//! samples, resource ceilings, the tunable scaling policy, and the
//! append-only log of scaling actions. All types are serializable to/from
//! JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

// ── Metrics ───────────────────────────────────────────────────────

/// Point-in-time resource metrics for the managed service.
///
/// Created once per tick by the monitor, consumed immediately by the
/// decision engine, and appended to the history store for observability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceMetrics {
    /// Unix timestamp (seconds) when the sample was taken.
    pub timestamp: u64,
    /// CPU usage in percent-of-one-core units (200.0 = two cores busy).
    pub cpu_percent: f64,
    /// Memory in use, in GB.
    pub memory_gb: f64,
    /// Live process/task count.
    pub process_count: u64,
    /// Workers currently executing work in the managed pool.
    pub active_workers: u32,
    /// Work items queued but not yet picked up.
    pub pending_jobs: u32,
    /// Remaining external-quota units available to the pool.
    pub remaining_quota: u32,
    /// True if any counter read failed and a last-known or zero value
    /// was substituted.
    pub degraded: bool,
}

// ── Limits ────────────────────────────────────────────────────────

/// The resource ceiling applied to the managed service.
///
/// Always within the policy's `[min, max]` bounds per dimension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    /// CPU quota in percent-of-one-core units (400 = four cores).
    pub cpu_quota: u64,
    /// Memory ceiling in GB.
    pub memory_gb: u64,
    /// Maximum process/task count.
    pub tasks_max: u64,
}

// ── Policy ────────────────────────────────────────────────────────

/// Operating mode of the autoscaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Automatic scaling is active.
    #[default]
    Enabled,
    /// No scaling actions are taken; metrics are still sampled.
    Disabled,
    /// Only operator-initiated `manual_scale` actions are applied.
    Manual,
}

/// Named preset mapping to a full set of threshold/factor/cooldown values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyProfile {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

/// Administrator-tunable scaling policy.
///
/// Replaced wholesale on update — never mutated field-by-field while a
/// loop tick is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingPolicyConfig {
    pub mode: ScalingMode,
    pub profile: PolicyProfile,

    /// Scale-up utilization thresholds, percent per dimension.
    pub cpu_scale_up_pct: f64,
    pub memory_scale_up_pct: f64,
    pub tasks_scale_up_pct: f64,

    /// Scale-down utilization thresholds, percent per dimension.
    pub cpu_scale_down_pct: f64,
    pub memory_scale_down_pct: f64,
    pub tasks_scale_down_pct: f64,

    /// Consecutive qualifying ticks required before a scale-up fires.
    pub consecutive_scale_up_checks: u32,
    /// Consecutive qualifying ticks required before a scale-down fires.
    pub consecutive_scale_down_checks: u32,

    /// Minimum seconds between two successful scaling actions.
    pub cooldown_secs: u64,

    /// Multiplicative factor applied to CPU/tasks on scale-up (> 1).
    pub scale_up_factor: f64,
    /// Multiplicative factor applied to CPU/tasks on scale-down (< 1).
    pub scale_down_factor: f64,
    /// Memory scale-up factor; closer to 1 than `scale_up_factor` so
    /// memory moves less aggressively than CPU/tasks.
    pub memory_scale_up_factor: f64,
    /// Memory scale-down factor; closer to 1 than `scale_down_factor`.
    pub memory_scale_down_factor: f64,

    /// Hard lower bounds per dimension.
    pub min_limits: ResourceLimits,
    /// Hard upper bounds per dimension.
    pub max_limits: ResourceLimits,

    /// CPU headroom (percent-of-one-core) reserved for the host's own
    /// processes when bounding limits to host capacity.
    pub reserved_cpu_percent: u64,
    /// Memory headroom (GB) reserved for the host's own processes.
    pub reserved_memory_gb: u64,
}

// ── Actions ───────────────────────────────────────────────────────

/// What kind of scaling action was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ScaleUp,
    ScaleDown,
    None,
    Manual,
    EmergencyStop,
}

/// What caused the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// The threshold decision engine fired.
    Threshold,
    /// An operator called `manual_scale`.
    Manual,
    /// An operator invoked the emergency stop.
    Emergency,
}

/// Outcome of an attempted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResult {
    Success,
    /// The apply failed and the prior configuration may not have been
    /// fully restored.
    Failed,
    /// The apply failed and the prior configuration was restored.
    RolledBack,
}

/// One entry in the append-only scaling-action log.
///
/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingAction {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    pub kind: ActionKind,
    pub trigger: TriggerKind,
    /// Human-readable explanation (metric values, operator reason, ...).
    pub reason: String,
    pub old_limits: ResourceLimits,
    pub new_limits: ResourceLimits,
    pub result: ActionResult,
    /// Error detail when `result` is not `Success`.
    pub error: Option<String>,
}

impl ScalingAction {
    /// Build the key for the actions table.
    pub fn table_key(&self) -> String {
        format!("{:020}", self.timestamp)
    }
}

impl ResourceMetrics {
    /// Build the key for the metrics table.
    pub fn table_key(&self) -> String {
        format!("{:020}", self.timestamp)
    }
}
