//! Limit application.
//!
//! A [`LimitController`] reads and writes the actual resource ceiling of
//! the managed service. Implementations must leave the prior, last-known
//! good configuration in place when an apply fails; the cgroup
//! implementation snapshots the control files before writing and restores
//! them on partial failure.

use std::path::PathBuf;
use std::pin::Pin;

use thiserror::Error;
use tracing::{debug, warn};

use poolscale_state::ResourceLimits;

const GB: u64 = 1024 * 1024 * 1024;

/// Errors from reading or applying limits.
#[derive(Debug, Error)]
pub enum LimitError {
    #[error("failed to read limits: {0}")]
    Read(String),

    #[error("failed to apply limits: {message}")]
    Apply {
        message: String,
        /// True if the prior configuration was restored after the failure.
        rolled_back: bool,
    },
}

/// Boxed future returned by [`LimitController::read_limits`].
pub type ReadFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ResourceLimits, LimitError>> + Send + 'a>>;

/// Boxed future returned by [`LimitController::apply_limits`].
pub type ApplyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), LimitError>> + Send + 'a>>;

/// Applies and reads the resource ceiling on the managed service.
///
/// Both operations must be safely re-invokable after either outcome, and
/// a failed apply must leave the service in its prior configuration.
pub trait LimitController: Send + Sync {
    fn read_limits(&self) -> ReadFuture<'_>;
    fn apply_limits(&self, limits: ResourceLimits) -> ApplyFuture<'_>;
}

/// Writes `cpu.max`, `memory.max`, and `pids.max` in a cgroup-v2
/// directory.
///
/// Apply snapshots the prior contents of all three files first; if any
/// write fails, the files written so far are restored from the snapshot.
pub struct CgroupLimitController {
    root: PathBuf,
    /// CPU period in microseconds for the `cpu.max` quota.
    period_usec: u64,
}

impl CgroupLimitController {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            period_usec: 100_000,
        }
    }

    async fn read_inner(&self) -> Result<ResourceLimits, LimitError> {
        let cpu_max = self.read_file("cpu.max").await?;
        let memory_max = self.read_file("memory.max").await?;
        let pids_max = self.read_file("pids.max").await?;

        Ok(ResourceLimits {
            cpu_quota: parse_cpu_max(&cpu_max, self.period_usec)?,
            memory_gb: parse_max_or(&memory_max, "memory.max")? / GB,
            tasks_max: parse_max_or(&pids_max, "pids.max")?,
        })
    }

    async fn apply_inner(&self, limits: ResourceLimits) -> Result<(), LimitError> {
        let quota_usec = limits.cpu_quota * self.period_usec / 100;
        let files = [
            ("cpu.max", format!("{quota_usec} {}\n", self.period_usec)),
            ("memory.max", format!("{}\n", limits.memory_gb * GB)),
            ("pids.max", format!("{}\n", limits.tasks_max)),
        ];

        // Snapshot prior contents before touching anything, so a partial
        // failure can be rolled back.
        let mut backups = Vec::with_capacity(files.len());
        for (name, _) in &files {
            let prior = self.read_file(name).await.map_err(|e| LimitError::Apply {
                message: e.to_string(),
                rolled_back: true, // nothing was written yet
            })?;
            backups.push((*name, prior));
        }

        self.write_with_rollback(&files, &backups).await?;
        debug!(?limits, "limits written");
        Ok(())
    }

    /// Write the files in order. On a failure, every file written so far
    /// (and the failed one, which may have been truncated) is restored
    /// from the snapshot.
    async fn write_with_rollback(
        &self,
        files: &[(&str, String)],
        backups: &[(&str, String)],
    ) -> Result<(), LimitError> {
        for (i, (name, value)) in files.iter().enumerate() {
            let path = self.root.join(name);
            if let Err(e) = tokio::fs::write(&path, value).await {
                let message = format!("{}: {e}", path.display());
                warn!(error = %message, "limit write failed, restoring prior values");
                let rolled_back = self.restore(&backups[..=i]).await;
                return Err(LimitError::Apply {
                    message,
                    rolled_back,
                });
            }
        }
        Ok(())
    }

    /// Restore snapshotted file contents. Returns false if any restore
    /// write itself failed.
    async fn restore(&self, backups: &[(&str, String)]) -> bool {
        let mut ok = true;
        for (name, contents) in backups {
            let path = self.root.join(name);
            if let Err(e) = tokio::fs::write(&path, contents).await {
                warn!(file = %path.display(), error = %e, "rollback write failed");
                ok = false;
            }
        }
        ok
    }

    async fn read_file(&self, name: &str) -> Result<String, LimitError> {
        let path = self.root.join(name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| LimitError::Read(format!("{}: {e}", path.display())))
    }
}

impl LimitController for CgroupLimitController {
    fn read_limits(&self) -> ReadFuture<'_> {
        Box::pin(self.read_inner())
    }

    fn apply_limits(&self, limits: ResourceLimits) -> ApplyFuture<'_> {
        Box::pin(self.apply_inner(limits))
    }
}

/// Parse a `cpu.max` body (`"<quota_usec> <period_usec>"` or `"max <period>"`)
/// into percent-of-one-core units.
fn parse_cpu_max(body: &str, default_period: u64) -> Result<u64, LimitError> {
    let mut parts = body.split_whitespace();
    let quota = parts
        .next()
        .ok_or_else(|| LimitError::Read("cpu.max is empty".to_string()))?;
    if quota == "max" {
        return Ok(u64::MAX);
    }
    let quota_usec: u64 = quota
        .parse()
        .map_err(|e| LimitError::Read(format!("cpu.max quota: {e}")))?;
    let period_usec: u64 = match parts.next() {
        Some(p) => p
            .parse()
            .map_err(|e| LimitError::Read(format!("cpu.max period: {e}")))?,
        None => default_period,
    };
    if period_usec == 0 {
        return Err(LimitError::Read("cpu.max period is zero".to_string()));
    }
    Ok(quota_usec * 100 / period_usec)
}

/// Parse a single-value cgroup file that may contain `max`.
fn parse_max_or(body: &str, file: &str) -> Result<u64, LimitError> {
    let value = body.trim();
    if value == "max" {
        return Ok(u64::MAX);
    }
    value
        .parse()
        .map_err(|e| LimitError::Read(format!("{file}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(cpu: u64, mem: u64, tasks: u64) -> ResourceLimits {
        ResourceLimits {
            cpu_quota: cpu,
            memory_gb: mem,
            tasks_max: tasks,
        }
    }

    fn seed_cgroup(dir: &std::path::Path) {
        std::fs::write(dir.join("cpu.max"), "200000 100000\n").unwrap();
        std::fs::write(dir.join("memory.max"), format!("{}\n", 32 * GB)).unwrap();
        std::fs::write(dir.join("pids.max"), "250\n").unwrap();
    }

    #[test]
    fn parse_cpu_max_values() {
        assert_eq!(parse_cpu_max("200000 100000", 100_000).unwrap(), 200);
        assert_eq!(parse_cpu_max("50000 100000", 100_000).unwrap(), 50);
        assert_eq!(parse_cpu_max("max 100000", 100_000).unwrap(), u64::MAX);
        assert!(parse_cpu_max("garbage 100000", 100_000).is_err());
    }

    #[test]
    fn parse_max_or_values() {
        assert_eq!(parse_max_or("250\n", "pids.max").unwrap(), 250);
        assert_eq!(parse_max_or("max\n", "pids.max").unwrap(), u64::MAX);
        assert!(parse_max_or("nope", "pids.max").is_err());
    }

    #[tokio::test]
    async fn read_limits_from_cgroup_files() {
        let dir = tempfile::tempdir().unwrap();
        seed_cgroup(dir.path());

        let ctl = CgroupLimitController::new(dir.path());
        let read = ctl.read_limits().await.unwrap();
        assert_eq!(read, limits(200, 32, 250));
    }

    #[tokio::test]
    async fn apply_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        seed_cgroup(dir.path());

        let ctl = CgroupLimitController::new(dir.path());
        ctl.apply_limits(limits(300, 40, 375)).await.unwrap();

        let read = ctl.read_limits().await.unwrap();
        assert_eq!(read, limits(300, 40, 375));
    }

    #[tokio::test]
    async fn restore_rewrites_snapshotted_contents() {
        let dir = tempfile::tempdir().unwrap();
        seed_cgroup(dir.path());

        let ctl = CgroupLimitController::new(dir.path());
        let backups = [
            ("cpu.max", "200000 100000\n".to_string()),
            ("memory.max", format!("{}\n", 32 * GB)),
        ];

        // Clobber the files as a partial apply would, then restore.
        std::fs::write(dir.path().join("cpu.max"), "300000 100000\n").unwrap();
        std::fs::write(dir.path().join("memory.max"), format!("{}\n", 40 * GB)).unwrap();
        assert!(ctl.restore(&backups).await);

        let read = ctl.read_limits().await.unwrap();
        assert_eq!(read, limits(200, 32, 250));
    }

    #[tokio::test]
    async fn partial_write_failure_restores_files_written_before_it() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cpu.max"), "200000 100000\n").unwrap();
        std::fs::write(dir.path().join("memory.max"), format!("{}\n", 32 * GB)).unwrap();
        // A directory at pids.max makes the third write fail after the
        // first two have landed.
        std::fs::create_dir(dir.path().join("pids.max")).unwrap();

        let ctl = CgroupLimitController::new(dir.path());
        let files = [
            ("cpu.max", "300000 100000\n".to_string()),
            ("memory.max", format!("{}\n", 40 * GB)),
            ("pids.max", "375\n".to_string()),
        ];
        let backups = [
            ("cpu.max", "200000 100000\n".to_string()),
            ("memory.max", format!("{}\n", 32 * GB)),
            ("pids.max", "250\n".to_string()),
        ];

        match ctl.write_with_rollback(&files, &backups).await {
            // The pids.max restore hits the same directory, so the flag
            // reports the restore as incomplete.
            Err(LimitError::Apply { rolled_back, .. }) => assert!(!rolled_back),
            other => panic!("expected apply error, got {other:?}"),
        }

        // The two files written before the failure hold their prior
        // contents again.
        let cpu = std::fs::read_to_string(dir.path().join("cpu.max")).unwrap();
        assert_eq!(cpu, "200000 100000\n");
        let memory = std::fs::read_to_string(dir.path().join("memory.max")).unwrap();
        assert_eq!(memory, format!("{}\n", 32 * GB));
    }

    #[tokio::test]
    async fn apply_to_missing_cgroup_reports_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        // No files seeded: the backup read fails before any mutation.
        let ctl = CgroupLimitController::new(dir.path());
        match ctl.apply_limits(limits(300, 40, 375)).await {
            Err(LimitError::Apply { rolled_back, .. }) => assert!(rolled_back),
            other => panic!("expected apply error, got {other:?}"),
        }
    }
}
