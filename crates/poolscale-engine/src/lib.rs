//! poolscale-engine — scaling decisions from metrics snapshots.
//!
//! The [`ThresholdDecisionEngine`] turns per-tick metrics into
//! `{None, ScaleUp, ScaleDown}` using streak-counter hysteresis: a
//! condition must hold for a configured number of consecutive ticks
//! before a decision fires.
//!
//! # Decision rules
//!
//! ```text
//! scale-up   if ANY of {cpu%, memory util, process util} > its up-threshold
//!            for consecutive_scale_up_checks ticks        (eager, protects host)
//! scale-down if ALL of {cpu%, memory util, process util} < its down-threshold
//!            for consecutive_scale_down_checks ticks      (conservative)
//! ```
//!
//! New limits are the current limits multiplied by the direction's factor
//! (memory uses its own, gentler factors), rounded to legible granularity
//! (CPU → 50, memory → 8 GB, tasks → 25), then clamped per dimension into
//! the policy's `[min, max]`.

pub mod decision;
pub mod policy;

pub use decision::{Decision, ThresholdDecisionEngine, compute_new_limits, normalize_limits};
pub use policy::{bound_to_host_capacity, config_for_profile, default_config};
