//! redb table definitions for the poolscale history store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Action and metrics keys are zero-padded timestamps so that
//! lexicographic order equals chronological order.

use redb::TableDefinition;

/// Scaling actions keyed by `{epoch_millis:020}`.
pub const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");

/// Metrics samples keyed by `{epoch_secs:020}`.
pub const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");

/// Policy config, single row under [`CONFIG_KEY`].
pub const CONFIG: TableDefinition<&str, &[u8]> = TableDefinition::new("config");

/// The single key under which the current policy config is stored.
pub const CONFIG_KEY: &str = "current";
