//! Snapshot policy: when the live tree is materialized to the store.
//!
//! Evaluated at most once per applied operation. A snapshot is taken when
//! at least one trigger fires (version delta or elapsed time since the last
//! snapshot) and no configured minimum is violated. A failed snapshot write
//! leaves the policy state untouched, so the next trigger retries it.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Snapshot policy configuration. Durations are milliseconds in config
/// files; absent triggers never fire, absent limits never constrain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub trigger_by_version: Option<u64>,
    pub trigger_by_elapsed_ms: Option<u64>,
    pub min_version_delta: u64,
    pub min_elapsed_ms: u64,
    pub limit_by_version: Option<u64>,
    pub limit_by_elapsed_ms: Option<u64>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            trigger_by_version: Some(100),
            trigger_by_elapsed_ms: None,
            min_version_delta: 0,
            min_elapsed_ms: 0,
            limit_by_version: None,
            limit_by_elapsed_ms: None,
        }
    }
}

/// Per-model snapshot decision state.
pub struct SnapshotPolicy {
    config: SnapshotConfig,
    last_version: u64,
    last_at: Instant,
}

impl SnapshotPolicy {
    /// `snapshot_version` is the version of the newest snapshot known to be
    /// in the store.
    pub fn new(config: SnapshotConfig, snapshot_version: u64) -> Self {
        Self::new_at(config, snapshot_version, Instant::now())
    }

    pub fn new_at(config: SnapshotConfig, snapshot_version: u64, now: Instant) -> Self {
        Self {
            config,
            last_version: snapshot_version,
            last_at: now,
        }
    }

    pub fn last_snapshot_version(&self) -> u64 {
        self.last_version
    }

    /// True when versions exist beyond the newest snapshot; shutdown writes
    /// a final snapshot in that case regardless of triggers.
    pub fn is_dirty(&self, version: u64) -> bool {
        version > self.last_version
    }

    pub fn should_snapshot(&self, version: u64, now: Instant) -> bool {
        let delta = version.saturating_sub(self.last_version);
        let elapsed = now.saturating_duration_since(self.last_at);

        let triggered = self
            .config
            .trigger_by_version
            .is_some_and(|versions| delta >= versions)
            || self
                .config
                .trigger_by_elapsed_ms
                .is_some_and(|ms| elapsed >= Duration::from_millis(ms));
        if !triggered {
            return false;
        }

        delta >= self.config.min_version_delta
            && elapsed >= Duration::from_millis(self.config.min_elapsed_ms)
            && self
                .config
                .limit_by_version
                .is_none_or(|versions| delta >= versions)
            && self
                .config
                .limit_by_elapsed_ms
                .is_none_or(|ms| elapsed >= Duration::from_millis(ms))
    }

    pub fn record_snapshot(&mut self, version: u64, now: Instant) {
        self.last_version = version;
        self.last_at = now;
    }
}
