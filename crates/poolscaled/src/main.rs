//! poolscaled — the poolscale daemon.
//!
//! Single binary that assembles the autoscaler for one managed service:
//! - History store (redb)
//! - Cgroup metrics source + resource monitor
//! - Threshold decision engine + controller loop
//!
//! # Usage
//!
//! ```text
//! poolscaled run --cgroup /sys/fs/cgroup/workers.slice --data-dir /var/lib/poolscale
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use poolscale_controller::{AutoscalerController, CgroupLimitController};
use poolscale_monitor::{CgroupSource, HostCapacity, ResourceMonitor};
use poolscale_state::HistoryStore;

#[derive(Parser)]
#[command(name = "poolscaled", about = "poolscale autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop for one managed service.
    Run {
        /// cgroup-v2 directory of the managed service.
        #[arg(long)]
        cgroup: PathBuf,

        /// Data directory for persistent history.
        #[arg(long, default_value = "/var/lib/poolscale")]
        data_dir: PathBuf,

        /// Control loop tick interval in seconds.
        #[arg(long, default_value = "30")]
        interval: u64,

        /// Metrics read timeout in milliseconds.
        #[arg(long, default_value = "5000")]
        read_timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "info,poolscaled=debug,poolscale_controller=debug"
                        .parse()
                        .unwrap()
                }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            cgroup,
            data_dir,
            interval,
            read_timeout_ms,
        } => run_loop(cgroup, data_dir, interval, read_timeout_ms).await,
    }
}

async fn run_loop(
    cgroup: PathBuf,
    data_dir: PathBuf,
    interval: u64,
    read_timeout_ms: u64,
) -> anyhow::Result<()> {
    info!("poolscale daemon starting");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("poolscale.redb");

    let store = HistoryStore::open(&db_path)?;
    info!(path = ?db_path, "history store opened");

    let source = CgroupSource::new(&cgroup);
    let monitor = ResourceMonitor::new(
        Box::new(source),
        Duration::from_millis(read_timeout_ms),
    );
    let limit_controller = CgroupLimitController::new(&cgroup);
    info!(cgroup = ?cgroup, "cgroup interfaces initialized");

    let host = HostCapacity::detect()
        .await
        .map_err(|e| anyhow::anyhow!("host capacity detection failed: {e}"))?;
    info!(
        cpu_percent = host.cpu_percent,
        memory_gb = host.memory_gb,
        "host capacity detected"
    );

    let controller = AutoscalerController::new(store, monitor, limit_controller, host).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // Runs until shutdown; the in-flight tick (including any apply)
    // finishes before this returns.
    controller.run(Duration::from_secs(interval), shutdown_rx).await;

    info!("poolscale daemon stopped");
    Ok(())
}
