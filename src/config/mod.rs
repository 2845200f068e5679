//! Configuration schema and loading.

mod load;

use serde::{Deserialize, Serialize};

use crate::daemon::SnapshotConfig;

pub use load::{ConfigError, load_from_path, load_from_str};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub realtime: RealtimeConfig,
    pub snapshot: SnapshotConfig,
}

/// Coordinator timeouts, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Bound on an open request reaching data availability, including a
    /// cold-start wait.
    pub handshake_timeout_ms: u64,
    /// Grace period for a cold-start opener to supply initial data.
    pub data_request_timeout_ms: u64,
    /// Idle time after the last close before a coordinator shuts down.
    pub linger_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            data_request_timeout_ms: 10_000,
            linger_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    /// `tracing` env-filter directive; falls back to RUST_LOG, then "info".
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
        }
    }
}
