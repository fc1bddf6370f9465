//! poolscale-controller — the autoscaling control loop.
//!
//! The [`AutoscalerController`] orchestrates one managed service: every
//! tick it collects a metrics snapshot, persists it, consults the
//! threshold decision engine (outside cooldown windows), and applies new
//! resource limits through a [`LimitController`]. Failed applies are
//! recorded and leave the prior limits in place without starting a
//! cooldown, so the controller can retry at the next eligible tick.
//!
//! A single apply guard serializes automatic and manual applies; a manual
//! request arriving mid-apply is rejected, never queued.
//!
//! One controller instance drives one service. A second independently
//! scaled service needs a second instance.

pub mod controller;
pub mod error;
pub mod limits;

pub use controller::{AutoscalerController, ControllerStatus, WorkloadFn};
pub use error::ControlError;
pub use limits::{ApplyFuture, CgroupLimitController, LimitController, LimitError, ReadFuture};
