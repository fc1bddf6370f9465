//! Host capacity detection.
//!
//! The scaling bounds must leave headroom for the host's own processes,
//! so the controller caps the policy's max limits against the total
//! capacity detected here.

use crate::source::MonitorError;

/// Total capacity of the host the managed service runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapacity {
    /// Total CPU in percent-of-one-core units (logical cores × 100).
    pub cpu_percent: u64,
    /// Total memory in GB, rounded down.
    pub memory_gb: u64,
}

impl HostCapacity {
    /// Detect capacity from the running host: logical core count and
    /// `MemTotal` from `/proc/meminfo`.
    pub async fn detect() -> Result<Self, MonitorError> {
        let cores = std::thread::available_parallelism()
            .map_err(|e| MonitorError::Read(format!("cpu count: {e}")))?
            .get() as u64;
        let meminfo = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .map_err(|e| MonitorError::Read(format!("/proc/meminfo: {e}")))?;

        Ok(Self {
            cpu_percent: cores * 100,
            memory_gb: parse_meminfo_total_gb(&meminfo)?,
        })
    }
}

/// Extract `MemTotal` (reported in kB) from a `/proc/meminfo` body.
fn parse_meminfo_total_gb(body: &str) -> Result<u64, MonitorError> {
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .map_err(|e| MonitorError::Parse(format!("MemTotal: {e}")))?;
            return Ok(kb / (1024 * 1024));
        }
    }
    Err(MonitorError::Parse(
        "MemTotal missing from /proc/meminfo".to_string(),
    ))
}
