//! Raw counter sources.
//!
//! The production source reads cgroup-v2 accounting files. Tests and
//! embedders can provide their own [`MetricsSource`] implementation.

use std::path::PathBuf;
use std::pin::Pin;

use thiserror::Error;

/// Errors from a raw counter read.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("counter read failed: {0}")]
    Read(String),

    #[error("counter parse failed: {0}")]
    Parse(String),

    #[error("counter read timed out")]
    Timeout,
}

/// One raw read of the managed service's resource counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// Cumulative CPU time consumed, in microseconds.
    pub cpu_usage_usec: u64,
    /// Memory currently in use, in bytes.
    pub memory_bytes: u64,
    /// Live process/task count.
    pub pids_current: u64,
}

/// Boxed future returned by [`MetricsSource::sample`].
pub type SampleFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RawSample, MonitorError>> + Send + 'a>>;

/// A point-in-time reader of host/service resource counters.
pub trait MetricsSource: Send + Sync {
    fn sample(&self) -> SampleFuture<'_>;
}

/// Reads cgroup-v2 accounting files from a cgroup directory.
///
/// Expects `cpu.stat` (for the `usage_usec` line), `memory.current`,
/// and `pids.current` under the given root.
pub struct CgroupSource {
    root: PathBuf,
}

impl CgroupSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_counter(&self, file: &str) -> Result<String, MonitorError> {
        let path = self.root.join(file);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| MonitorError::Read(format!("{}: {e}", path.display())))
    }

    async fn sample_inner(&self) -> Result<RawSample, MonitorError> {
        let cpu_stat = self.read_counter("cpu.stat").await?;
        let cpu_usage_usec = parse_cpu_stat_usage(&cpu_stat)?;

        let memory_bytes = self
            .read_counter("memory.current")
            .await?
            .trim()
            .parse::<u64>()
            .map_err(|e| MonitorError::Parse(format!("memory.current: {e}")))?;

        let pids_current = self
            .read_counter("pids.current")
            .await?
            .trim()
            .parse::<u64>()
            .map_err(|e| MonitorError::Parse(format!("pids.current: {e}")))?;

        Ok(RawSample {
            cpu_usage_usec,
            memory_bytes,
            pids_current,
        })
    }
}

impl MetricsSource for CgroupSource {
    fn sample(&self) -> SampleFuture<'_> {
        Box::pin(self.sample_inner())
    }
}

/// Extract the `usage_usec` value from a `cpu.stat` body.
fn parse_cpu_stat_usage(body: &str) -> Result<u64, MonitorError> {
    for line in body.lines() {
        if let Some(value) = line.strip_prefix("usage_usec ") {
            return value
                .trim()
                .parse::<u64>()
                .map_err(|e| MonitorError::Parse(format!("cpu.stat usage_usec: {e}")));
        }
    }
    Err(MonitorError::Parse(
        "cpu.stat missing usage_usec line".to_string(),
    ))
}
