//! ResourceMonitor — never-failing per-tick metrics collection.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::warn;

use poolscale_state::ResourceMetrics;

use crate::source::{MetricsSource, RawSample};

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Workload context supplied by the embedding application each tick:
/// pool-level counters the resource accounting interface cannot see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadContext {
    /// Workers currently executing work.
    pub active_workers: u32,
    /// Work items queued but not yet picked up.
    pub pending_jobs: u32,
    /// Remaining external-quota units.
    pub remaining_quota: u32,
}

/// Values carried between ticks so a failed read can fall back to the
/// previous sample instead of reporting garbage.
struct LastKnown {
    at: Instant,
    cpu_usage_usec: u64,
    cpu_percent: f64,
    memory_gb: f64,
    process_count: u64,
}

/// Wraps a [`MetricsSource`] and produces one `ResourceMetrics` snapshot
/// per call.
///
/// `collect` never fails: reads are bounded by `read_timeout`, and on any
/// error or timeout the last-known values (or zeros on the very first
/// sample) are substituted and the snapshot is marked degraded.
pub struct ResourceMonitor {
    source: Box<dyn MetricsSource>,
    read_timeout: Duration,
    last: Option<LastKnown>,
}

impl ResourceMonitor {
    pub fn new(source: Box<dyn MetricsSource>, read_timeout: Duration) -> Self {
        Self {
            source,
            read_timeout,
            last: None,
        }
    }

    /// Take one metrics snapshot.
    pub async fn collect(&mut self, ctx: &WorkloadContext) -> ResourceMetrics {
        let result = tokio::time::timeout(self.read_timeout, self.source.sample()).await;

        match result {
            Ok(Ok(sample)) => self.snapshot_from_sample(sample, ctx),
            Ok(Err(e)) => {
                warn!(error = %e, "metrics read failed, using degraded sample");
                self.degraded_snapshot(ctx)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.read_timeout.as_millis() as u64,
                    "metrics read timed out, using degraded sample"
                );
                self.degraded_snapshot(ctx)
            }
        }
    }

    fn snapshot_from_sample(&mut self, sample: RawSample, ctx: &WorkloadContext) -> ResourceMetrics {
        let now = Instant::now();

        // CPU percent is the cumulative-usage delta over the wall-clock
        // delta since the previous successful sample. The first sample has
        // no delta and reports 0%.
        let cpu_percent = match &self.last {
            Some(last) => cpu_percent_from_delta(
                sample.cpu_usage_usec.saturating_sub(last.cpu_usage_usec),
                now.duration_since(last.at),
            ),
            None => 0.0,
        };

        let memory_gb = sample.memory_bytes as f64 / GB;
        let process_count = sample.pids_current;

        self.last = Some(LastKnown {
            at: now,
            cpu_usage_usec: sample.cpu_usage_usec,
            cpu_percent,
            memory_gb,
            process_count,
        });

        ResourceMetrics {
            timestamp: epoch_secs(),
            cpu_percent,
            memory_gb,
            process_count,
            active_workers: ctx.active_workers,
            pending_jobs: ctx.pending_jobs,
            remaining_quota: ctx.remaining_quota,
            degraded: false,
        }
    }

    fn degraded_snapshot(&self, ctx: &WorkloadContext) -> ResourceMetrics {
        let (cpu_percent, memory_gb, process_count) = match &self.last {
            Some(last) => (last.cpu_percent, last.memory_gb, last.process_count),
            None => (0.0, 0.0, 0),
        };

        ResourceMetrics {
            timestamp: epoch_secs(),
            cpu_percent,
            memory_gb,
            process_count,
            active_workers: ctx.active_workers,
            pending_jobs: ctx.pending_jobs,
            remaining_quota: ctx.remaining_quota,
            degraded: true,
        }
    }
}

/// Percent-of-one-core CPU usage over a wall-clock window.
fn cpu_percent_from_delta(delta_usage_usec: u64, wall: Duration) -> f64 {
    let wall_usec = wall.as_micros() as f64;
    if wall_usec <= 0.0 {
        return 0.0;
    }
    delta_usage_usec as f64 / wall_usec * 100.0
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MonitorError, SampleFuture};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Source that replays a fixed script of results.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<RawSample, MonitorError>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<RawSample, MonitorError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    impl MetricsSource for ScriptedSource {
        fn sample(&self) -> SampleFuture<'_> {
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(MonitorError::Read("script exhausted".to_string())));
            Box::pin(async move { next })
        }
    }

    /// Source that never completes, to exercise the read timeout.
    struct HangingSource;

    impl MetricsSource for HangingSource {
        fn sample(&self) -> SampleFuture<'_> {
            Box::pin(std::future::pending::<Result<RawSample, MonitorError>>())
        }
    }

    fn sample(cpu_usec: u64, mem_bytes: u64, pids: u64) -> RawSample {
        RawSample {
            cpu_usage_usec: cpu_usec,
            memory_bytes: mem_bytes,
            pids_current: pids,
        }
    }

    #[test]
    fn cpu_percent_math() {
        // 1s of CPU over 1s of wall time = 100% of one core.
        assert_eq!(
            cpu_percent_from_delta(1_000_000, Duration::from_secs(1)),
            100.0
        );
        // 500ms of CPU over 1s = 50%.
        assert_eq!(
            cpu_percent_from_delta(500_000, Duration::from_secs(1)),
            50.0
        );
        // Zero wall time cannot divide.
        assert_eq!(cpu_percent_from_delta(1_000_000, Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn first_sample_reports_zero_cpu() {
        let source = ScriptedSource::new(vec![Ok(sample(5_000_000, 4 * 1024 * 1024 * 1024, 30))]);
        let mut monitor = ResourceMonitor::new(Box::new(source), Duration::from_secs(1));

        let metrics = monitor.collect(&WorkloadContext::default()).await;
        assert!(!metrics.degraded);
        assert_eq!(metrics.cpu_percent, 0.0);
        assert_eq!(metrics.memory_gb, 4.0);
        assert_eq!(metrics.process_count, 30);
    }

    #[tokio::test]
    async fn second_sample_reports_cpu_delta() {
        let source = ScriptedSource::new(vec![
            Ok(sample(1_000_000, 1024, 10)),
            Ok(sample(2_000_000, 1024, 10)),
        ]);
        let mut monitor = ResourceMonitor::new(Box::new(source), Duration::from_secs(1));

        monitor.collect(&WorkloadContext::default()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let metrics = monitor.collect(&WorkloadContext::default()).await;

        // 1s of CPU consumed over ~20ms of wall time: a large positive
        // percentage. The exact value depends on timing; only sign and
        // degraded status are asserted.
        assert!(!metrics.degraded);
        assert!(metrics.cpu_percent > 0.0);
    }

    #[tokio::test]
    async fn read_failure_degrades_to_last_known() {
        let source = ScriptedSource::new(vec![
            Ok(sample(1_000_000, 8 * 1024 * 1024 * 1024, 25)),
            Err(MonitorError::Read("boom".to_string())),
        ]);
        let mut monitor = ResourceMonitor::new(Box::new(source), Duration::from_secs(1));

        let first = monitor.collect(&WorkloadContext::default()).await;
        assert!(!first.degraded);

        let second = monitor.collect(&WorkloadContext::default()).await;
        assert!(second.degraded);
        assert_eq!(second.memory_gb, 8.0);
        assert_eq!(second.process_count, 25);
    }

    #[tokio::test]
    async fn read_failure_with_no_history_degrades_to_zeros() {
        let source = ScriptedSource::new(vec![Err(MonitorError::Read("boom".to_string()))]);
        let mut monitor = ResourceMonitor::new(Box::new(source), Duration::from_secs(1));

        let metrics = monitor.collect(&WorkloadContext::default()).await;
        assert!(metrics.degraded);
        assert_eq!(metrics.cpu_percent, 0.0);
        assert_eq!(metrics.memory_gb, 0.0);
        assert_eq!(metrics.process_count, 0);
    }

    #[tokio::test]
    async fn hung_read_times_out_and_degrades() {
        let mut monitor =
            ResourceMonitor::new(Box::new(HangingSource), Duration::from_millis(20));

        let metrics = monitor.collect(&WorkloadContext::default()).await;
        assert!(metrics.degraded);
    }

    #[tokio::test]
    async fn workload_context_is_carried_through() {
        let source = ScriptedSource::new(vec![Ok(sample(0, 0, 0))]);
        let mut monitor = ResourceMonitor::new(Box::new(source), Duration::from_secs(1));

        let ctx = WorkloadContext {
            active_workers: 4,
            pending_jobs: 17,
            remaining_quota: 900,
        };
        let metrics = monitor.collect(&ctx).await;
        assert_eq!(metrics.active_workers, 4);
        assert_eq!(metrics.pending_jobs, 17);
        assert_eq!(metrics.remaining_quota, 900);
    }
}
