//! HistoryStore — redb-backed persistence for the poolscale autoscaler.
//!
//! Provides the append-only scaling-action log, the metrics-sample log,
//! and single-row policy config storage. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe history store backed by redb.
#[derive(Clone)]
pub struct HistoryStore {
    db: Arc<Database>,
}

impl HistoryStore {
    /// Open (or create) a persistent history store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "history store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory history store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory history store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        txn.open_table(METRICS).map_err(map_err!(Table))?;
        txn.open_table(CONFIG).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Actions ────────────────────────────────────────────────────

    /// Append a scaling action to the log.
    ///
    /// If an action with the same millisecond timestamp already exists,
    /// the key is bumped until free so no entry is ever overwritten.
    pub fn append_action(&self, action: &ScalingAction) -> StateResult<()> {
        let value = serde_json::to_vec(action).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            let mut ts = action.timestamp;
            loop {
                let key = format!("{ts:020}");
                let occupied = table.get(key.as_str()).map_err(map_err!(Read))?.is_some();
                if !occupied {
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    break;
                }
                ts += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = ?action.kind, result = ?action.result, "scaling action appended");
        Ok(())
    }

    /// The newest `limit` actions, newest first.
    pub fn recent_actions(&self, limit: usize) -> StateResult<Vec<ScalingAction>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let action: ScalingAction =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(action);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    // ── Metrics samples ────────────────────────────────────────────

    /// Append one per-tick metrics sample.
    pub fn append_metrics_sample(&self, metrics: &ResourceMetrics) -> StateResult<()> {
        let key = metrics.table_key();
        let value = serde_json::to_vec(metrics).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(METRICS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The newest `limit` metrics samples, newest first.
    pub fn recent_metrics(&self, limit: usize) -> StateResult<Vec<ResourceMetrics>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRICS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let metrics: ResourceMetrics =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(metrics);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    // ── Policy config ──────────────────────────────────────────────

    /// Load the stored policy config.
    ///
    /// Returns `Ok(None)` if no config has been saved yet (first run) and
    /// `Err(StateError::ConfigCorrupt)` if a config row exists but cannot
    /// be decoded.
    pub fn load_config(&self) -> StateResult<Option<ScalingPolicyConfig>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONFIG).map_err(map_err!(Table))?;
        match table.get(CONFIG_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let config: ScalingPolicyConfig = serde_json::from_slice(guard.value())
                    .map_err(map_err!(ConfigCorrupt))?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    /// Save the policy config, replacing any previous row.
    pub fn save_config(&self, config: &ScalingPolicyConfig) -> StateResult<()> {
        let value = serde_json::to_vec(config).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CONFIG).map_err(map_err!(Table))?;
            table
                .insert(CONFIG_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(profile = ?config.profile, mode = ?config.mode, "policy config saved");
        Ok(())
    }
}
