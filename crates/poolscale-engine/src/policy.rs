//! Policy profile presets.
//!
//! Each profile is a pure function of its name: calling
//! [`config_for_profile`] twice with the same profile yields identical
//! values, which is what makes `set_policy` idempotent.

use poolscale_state::{PolicyProfile, ResourceLimits, ScalingMode, ScalingPolicyConfig};

/// The hard-coded default policy used on first run and when the stored
/// config is corrupt: the balanced profile, automatic scaling enabled.
pub fn default_config() -> ScalingPolicyConfig {
    config_for_profile(PolicyProfile::Balanced)
}

/// Build the complete config for a named profile.
///
/// Mode is always `Enabled` here; callers that change profile at runtime
/// preserve the current mode themselves.
pub fn config_for_profile(profile: PolicyProfile) -> ScalingPolicyConfig {
    match profile {
        PolicyProfile::Conservative => ScalingPolicyConfig {
            mode: ScalingMode::Enabled,
            profile,
            cpu_scale_up_pct: 90.0,
            memory_scale_up_pct: 90.0,
            tasks_scale_up_pct: 90.0,
            cpu_scale_down_pct: 20.0,
            memory_scale_down_pct: 20.0,
            tasks_scale_down_pct: 20.0,
            consecutive_scale_up_checks: 5,
            consecutive_scale_down_checks: 15,
            cooldown_secs: 600,
            scale_up_factor: 1.25,
            scale_down_factor: 0.8,
            memory_scale_up_factor: 1.125,
            memory_scale_down_factor: 0.9,
            min_limits: MIN_LIMITS,
            max_limits: MAX_LIMITS,
            reserved_cpu_percent: 200,
            reserved_memory_gb: 16,
        },
        PolicyProfile::Balanced => ScalingPolicyConfig {
            mode: ScalingMode::Enabled,
            profile,
            cpu_scale_up_pct: 85.0,
            memory_scale_up_pct: 85.0,
            tasks_scale_up_pct: 85.0,
            cpu_scale_down_pct: 30.0,
            memory_scale_down_pct: 30.0,
            tasks_scale_down_pct: 30.0,
            consecutive_scale_up_checks: 3,
            consecutive_scale_down_checks: 10,
            cooldown_secs: 300,
            scale_up_factor: 1.5,
            scale_down_factor: 0.7,
            memory_scale_up_factor: 1.25,
            memory_scale_down_factor: 0.85,
            min_limits: MIN_LIMITS,
            max_limits: MAX_LIMITS,
            reserved_cpu_percent: 200,
            reserved_memory_gb: 16,
        },
        PolicyProfile::Aggressive => ScalingPolicyConfig {
            mode: ScalingMode::Enabled,
            profile,
            cpu_scale_up_pct: 75.0,
            memory_scale_up_pct: 75.0,
            tasks_scale_up_pct: 75.0,
            cpu_scale_down_pct: 40.0,
            memory_scale_down_pct: 40.0,
            tasks_scale_down_pct: 40.0,
            consecutive_scale_up_checks: 2,
            consecutive_scale_down_checks: 5,
            cooldown_secs: 120,
            scale_up_factor: 2.0,
            scale_down_factor: 0.6,
            memory_scale_up_factor: 1.5,
            memory_scale_down_factor: 0.75,
            min_limits: MIN_LIMITS,
            max_limits: MAX_LIMITS,
            reserved_cpu_percent: 200,
            reserved_memory_gb: 16,
        },
    }
}

const MIN_LIMITS: ResourceLimits = ResourceLimits {
    cpu_quota: 100,
    memory_gb: 8,
    tasks_max: 50,
};

const MAX_LIMITS: ResourceLimits = ResourceLimits {
    cpu_quota: 1600,
    memory_gb: 256,
    tasks_max: 2000,
};

/// Lower the max bounds so that the ceiling plus the reserved headroom
/// never exceeds the host's capacity.
pub fn bound_to_host_capacity(
    mut config: ScalingPolicyConfig,
    host_cpu_percent: u64,
    host_memory_gb: u64,
) -> ScalingPolicyConfig {
    let cpu_cap = host_cpu_percent
        .saturating_sub(config.reserved_cpu_percent)
        .max(config.min_limits.cpu_quota);
    let mem_cap = host_memory_gb
        .saturating_sub(config.reserved_memory_gb)
        .max(config.min_limits.memory_gb);

    config.max_limits.cpu_quota = config.max_limits.cpu_quota.min(cpu_cap);
    config.max_limits.memory_gb = config.max_limits.memory_gb.min(mem_cap);
    config
}
