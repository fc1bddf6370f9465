//! poolscale-state — embedded history store for the poolscale autoscaler.
//!
//! Backed by [redb](https://docs.rs/redb), provides durable storage for the
//! append-only scaling-action log, periodic metrics samples, and the current
//! scaling policy config.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Actions and metrics samples use zero-padded timestamp keys so that the
//! natural lexicographic table order is chronological, which makes
//! "newest N" queries a reverse scan.
//!
//! The `HistoryStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::HistoryStore;
pub use types::*;
