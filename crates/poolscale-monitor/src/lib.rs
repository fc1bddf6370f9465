//! poolscale-monitor — resource metrics collection for the autoscaler.
//!
//! A [`MetricsSource`] reads raw cgroup-style counters (cumulative CPU time,
//! memory in use, live process count). The [`ResourceMonitor`] wraps a source
//! and produces one immutable `ResourceMetrics` snapshot per call: reads are
//! bounded by a timeout, CPU percent is derived from the counter delta since
//! the previous call, and any failure degrades to last-known or zero values
//! instead of surfacing an error — the control loop must always be able
//! to tick.

pub mod host;
pub mod monitor;
pub mod source;

pub use host::HostCapacity;
pub use monitor::{ResourceMonitor, WorkloadContext};
pub use source::{CgroupSource, MetricsSource, MonitorError, RawSample, SampleFuture};
