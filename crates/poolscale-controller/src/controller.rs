//! AutoscalerController — orchestrates the control loop.
//!
//! Tick-level state machine: IDLE → EVALUATING (streaks accumulating) →
//! APPLYING (one-shot, guarded) → COOLDOWN (timer) → IDLE. Per-tick
//! errors are caught at the tick boundary and never terminate the loop.

use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use poolscale_engine::{
    Decision, ThresholdDecisionEngine, bound_to_host_capacity, compute_new_limits,
    normalize_limits,
};
use poolscale_monitor::{HostCapacity, ResourceMonitor, WorkloadContext};
use poolscale_state::{
    ActionKind, ActionResult, HistoryStore, PolicyProfile, ResourceLimits, ScalingAction,
    ScalingMode, ScalingPolicyConfig, StateError, TriggerKind,
};

use crate::error::ControlError;
use crate::limits::{LimitController, LimitError};

/// Callback supplying the pool-level workload context each tick.
pub type WorkloadFn = Box<dyn Fn() -> WorkloadContext + Send + Sync>;

/// Snapshot returned by `get_status` for the administrative surface.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub mode: ScalingMode,
    pub profile: PolicyProfile,
    pub current_limits: ResourceLimits,
    pub last_action: Option<ScalingAction>,
    /// True if the most recent metrics sample was degraded.
    pub degraded: bool,
    pub in_cooldown: bool,
    pub cooldown_remaining_secs: u64,
    /// True while an automatic or manual apply is in flight.
    pub apply_in_flight: bool,
    /// True if the stored config was corrupt at startup and the
    /// hard-coded defaults are in effect.
    pub config_fell_back: bool,
}

/// Mutable loop state, locked briefly and never across an await.
struct LoopState {
    current_limits: ResourceLimits,
    /// Start of the cooldown window; set only on successful applies.
    last_success_at: Option<Instant>,
    last_action: Option<ScalingAction>,
}

/// The autoscaling controller for one managed service.
///
/// Construct one instance at process start and share it by reference with
/// the loop and the administrative handlers.
pub struct AutoscalerController<L: LimitController> {
    store: HistoryStore,
    monitor: Mutex<ResourceMonitor>,
    engine: Mutex<ThresholdDecisionEngine>,
    limit_controller: L,
    /// Replaced wholesale by `set_mode`/`set_policy`; the loop reads a
    /// consistent snapshot per tick.
    config: ArcSwap<ScalingPolicyConfig>,
    state: StdMutex<LoopState>,
    /// Serializes applies. Held for the full duration of an apply;
    /// manual requests use `try_lock` and are rejected on contention.
    apply_guard: Mutex<()>,
    degraded: AtomicBool,
    config_fell_back: bool,
    /// Applied to every config that becomes active, so the max bounds
    /// plus the reserved headroom never exceed the host.
    host_capacity: HostCapacity,
    workload_fn: Option<WorkloadFn>,
}

impl<L: LimitController> AutoscalerController<L> {
    /// Build a controller: resolve the policy config (falling back to
    /// defaults if the stored one is corrupt), cap its bounds to the
    /// host capacity, and read the service's current limits.
    pub async fn new(
        store: HistoryStore,
        monitor: ResourceMonitor,
        limit_controller: L,
        host_capacity: HostCapacity,
    ) -> anyhow::Result<Self> {
        let loaded = store.load_config();
        let needs_save = !matches!(&loaded, Ok(Some(_)));
        let (config, config_fell_back) = resolve_config(loaded);
        let config =
            bound_to_host_capacity(config, host_capacity.cpu_percent, host_capacity.memory_gb);
        if needs_save {
            // First run, or a corrupt row being replaced by the defaults.
            if let Err(e) = store.save_config(&config) {
                warn!(error = %e, "failed to persist initial config");
            }
        }

        let read = limit_controller
            .read_limits()
            .await
            .map_err(|e| anyhow::anyhow!("initial limits read failed: {e}"))?;
        let current_limits = normalize_limits(read, &config);
        info!(?current_limits, profile = ?config.profile, "autoscaler controller initialized");

        Ok(Self {
            store,
            monitor: Mutex::new(monitor),
            engine: Mutex::new(ThresholdDecisionEngine::new()),
            limit_controller,
            config: ArcSwap::from_pointee(config),
            state: StdMutex::new(LoopState {
                current_limits,
                last_success_at: None,
                last_action: None,
            }),
            apply_guard: Mutex::new(()),
            degraded: AtomicBool::new(false),
            config_fell_back,
            host_capacity,
            workload_fn: None,
        })
    }

    /// Set the callback supplying workload context per tick.
    pub fn with_workload_fn(mut self, f: WorkloadFn) -> Self {
        self.workload_fn = Some(f);
        self
    }

    /// Run the control loop until the shutdown signal fires.
    ///
    /// The in-flight tick (including any apply) always finishes before
    /// the loop exits.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "autoscaler loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("autoscaler loop shutting down");
                    break;
                }
            }
        }
    }

    /// Execute one control-loop tick. Errors are logged, never raised.
    pub async fn tick(&self) {
        if let Err(e) = self.tick_inner().await {
            warn!(error = %e, "tick failed");
        }
    }

    async fn tick_inner(&self) -> anyhow::Result<()> {
        let ctx = self
            .workload_fn
            .as_ref()
            .map(|f| f())
            .unwrap_or_default();
        let metrics = self.monitor.lock().await.collect(&ctx).await;
        self.degraded.store(metrics.degraded, Ordering::Relaxed);

        // The sample is persisted regardless of mode or cooldown.
        if let Err(e) = self.store.append_metrics_sample(&metrics) {
            warn!(error = %e, "failed to persist metrics sample");
        }

        let config = self.config.load_full();
        if config.mode != ScalingMode::Enabled {
            return Ok(());
        }

        // Cooldown gate. The engine is not consulted here, so streaks are
        // unaffected by a cooldown-suppressed tick.
        let Some(current) = self.eligible_limits(&config) else {
            return Ok(());
        };

        let decision = self
            .engine
            .lock()
            .await
            .evaluate(&metrics, &current, &config);
        let kind = match decision {
            Decision::None => return Ok(()),
            Decision::ScaleUp => ActionKind::ScaleUp,
            Decision::ScaleDown => ActionKind::ScaleDown,
        };

        let _guard = self.apply_guard.lock().await;
        // A manual apply can complete while this tick waits on the guard.
        // Its cooldown gates this action too, and the decision must act on
        // the limits it left behind, not the pre-guard snapshot.
        let Some(current) = self.eligible_limits(&config) else {
            debug!("apply completed while waiting on guard, skipping tick");
            return Ok(());
        };
        let new_limits = compute_new_limits(current, decision, &config);
        if new_limits == current {
            debug!(?decision, "limits already at bounds, nothing to apply");
            return Ok(());
        }

        let reason = format!(
            "cpu {:.1}%, memory {:.1} GB, processes {}",
            metrics.cpu_percent, metrics.memory_gb, metrics.process_count
        );
        // Failure is recorded inside execute_apply; the tick itself
        // succeeded either way.
        let _ = self
            .execute_apply(current, new_limits, kind, TriggerKind::Threshold, reason)
            .await;
        Ok(())
    }

    /// Cooldown gate: `None` inside the window, otherwise the current
    /// limits.
    fn eligible_limits(&self, config: &ScalingPolicyConfig) -> Option<ResourceLimits> {
        let state = self.state.lock().unwrap();
        if let Some(at) = state.last_success_at {
            let elapsed = at.elapsed();
            if elapsed < Duration::from_secs(config.cooldown_secs) {
                debug!(
                    remaining_secs = config.cooldown_secs.saturating_sub(elapsed.as_secs()),
                    "within cooldown window"
                );
                return None;
            }
        }
        Some(state.current_limits)
    }

    /// Apply limits immediately, bypassing the decision engine.
    ///
    /// Goes through the identical apply → rollback → history path as an
    /// automatic action. Rejected while another apply is in flight.
    pub async fn manual_scale(
        &self,
        requested: ResourceLimits,
        reason: &str,
    ) -> Result<ScalingAction, ControlError> {
        let _guard = self
            .apply_guard
            .try_lock()
            .map_err(|_| ControlError::ConcurrentApplyConflict)?;

        let config = self.config.load_full();
        let new_limits = normalize_limits(requested, &config);
        let current = self.state.lock().unwrap().current_limits;
        info!(?requested, ?new_limits, reason, "manual scale requested");

        self.execute_apply(
            current,
            new_limits,
            ActionKind::Manual,
            TriggerKind::Manual,
            reason.to_string(),
        )
        .await
    }

    /// Switch the operating mode. Takes effect on the next tick.
    pub fn set_mode(&self, mode: ScalingMode) -> Result<(), ControlError> {
        let mut config = (**self.config.load()).clone();
        config.mode = mode;
        self.store.save_config(&config)?;
        self.config.store(Arc::new(config));
        info!(?mode, "scaling mode updated");
        Ok(())
    }

    /// Replace every threshold/factor/cooldown field from the profile's
    /// preset table, re-capped to the host capacity. The current mode is
    /// preserved. Takes effect on the next tick, not retroactively.
    pub fn set_policy(&self, profile: PolicyProfile) -> Result<(), ControlError> {
        let mode = self.config.load().mode;
        let mut config = bound_to_host_capacity(
            poolscale_engine::config_for_profile(profile),
            self.host_capacity.cpu_percent,
            self.host_capacity.memory_gb,
        );
        config.mode = mode;
        self.store.save_config(&config)?;
        self.config.store(Arc::new(config));
        info!(?profile, "scaling policy updated");
        Ok(())
    }

    /// Disable automatic scaling and record an emergency-stop action.
    /// Limits are left unchanged.
    pub fn emergency_stop(&self, reason: &str) -> Result<ScalingAction, ControlError> {
        self.set_mode(ScalingMode::Disabled)?;

        let mut state = self.state.lock().unwrap();
        let action = ScalingAction {
            timestamp: epoch_millis(),
            kind: ActionKind::EmergencyStop,
            trigger: TriggerKind::Emergency,
            reason: reason.to_string(),
            old_limits: state.current_limits,
            new_limits: state.current_limits,
            result: ActionResult::Success,
            error: None,
        };
        if let Err(e) = self.store.append_action(&action) {
            warn!(error = %e, "failed to persist emergency-stop action");
        }
        state.last_action = Some(action.clone());
        warn!(reason, "emergency stop: automatic scaling disabled");
        Ok(action)
    }

    /// Current controller status for the administrative surface.
    pub fn get_status(&self) -> ControllerStatus {
        let config = self.config.load_full();
        let state = self.state.lock().unwrap();

        let (in_cooldown, cooldown_remaining_secs) = match state.last_success_at {
            Some(at) => {
                let elapsed = at.elapsed().as_secs();
                if elapsed < config.cooldown_secs {
                    (true, config.cooldown_secs - elapsed)
                } else {
                    (false, 0)
                }
            }
            None => (false, 0),
        };

        ControllerStatus {
            mode: config.mode,
            profile: config.profile,
            current_limits: state.current_limits,
            last_action: state.last_action.clone(),
            degraded: self.degraded.load(Ordering::Relaxed),
            in_cooldown,
            cooldown_remaining_secs,
            apply_in_flight: self.apply_guard.try_lock().is_err(),
            config_fell_back: self.config_fell_back,
        }
    }

    /// The newest `limit` scaling actions, newest first.
    pub fn get_history(&self, limit: usize) -> Result<Vec<ScalingAction>, ControlError> {
        Ok(self.store.recent_actions(limit)?)
    }

    /// Apply `new_limits` and record the outcome. Caller must hold the
    /// apply guard.
    ///
    /// On success the limits are committed, the cooldown window starts,
    /// and the streak counters reset. On failure the prior limits stay
    /// current, no cooldown starts, and the streaks are left as-is so the
    /// next eligible tick can retry.
    async fn execute_apply(
        &self,
        old_limits: ResourceLimits,
        new_limits: ResourceLimits,
        kind: ActionKind,
        trigger: TriggerKind,
        reason: String,
    ) -> Result<ScalingAction, ControlError> {
        match self.limit_controller.apply_limits(new_limits).await {
            Ok(()) => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.current_limits = new_limits;
                    state.last_success_at = Some(Instant::now());
                }
                self.engine.lock().await.reset();

                let action = ScalingAction {
                    timestamp: epoch_millis(),
                    kind,
                    trigger,
                    reason,
                    old_limits,
                    new_limits,
                    result: ActionResult::Success,
                    error: None,
                };
                self.record_action(&action);
                info!(?kind, from = ?old_limits, to = ?new_limits, "limits applied");
                Ok(action)
            }
            Err(e) => {
                let result = match &e {
                    LimitError::Apply {
                        rolled_back: true, ..
                    } => ActionResult::RolledBack,
                    _ => ActionResult::Failed,
                };
                let action = ScalingAction {
                    timestamp: epoch_millis(),
                    kind,
                    trigger,
                    reason,
                    old_limits,
                    new_limits,
                    result,
                    error: Some(e.to_string()),
                };
                self.record_action(&action);
                warn!(?kind, error = %e, "limit apply failed, keeping prior limits");
                Err(ControlError::LimitApplyFailed(e.to_string()))
            }
        }
    }

    fn record_action(&self, action: &ScalingAction) {
        if let Err(e) = self.store.append_action(action) {
            warn!(error = %e, "failed to persist scaling action");
        }
        self.state.lock().unwrap().last_action = Some(action.clone());
    }
}

/// Resolve the startup config from a load result.
///
/// Corruption (and any other load error) falls back to the hard-coded
/// defaults with a warning rather than crashing; absence means first run.
/// Returns (config, fell_back).
fn resolve_config(
    loaded: Result<Option<ScalingPolicyConfig>, StateError>,
) -> (ScalingPolicyConfig, bool) {
    match loaded {
        Ok(Some(config)) => (config, false),
        Ok(None) => {
            info!("no stored policy config, using defaults");
            (poolscale_engine::default_config(), false)
        }
        Err(e) => {
            warn!(error = %e, "stored policy config unusable, falling back to defaults");
            (poolscale_engine::default_config(), true)
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
