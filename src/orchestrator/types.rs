//! Shared types for the orchestrator: connection recovery states, the
//! process exit taxonomy, and the status snapshot exposed to callers.
//!
//! Grounded on `driver::types::DriverState`/`DriverSnapshot` (teacher's
//! lifecycle-state-plus-broadcast-snapshot shape).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Connection recovery state machine states (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// Final disposition of `Orchestrator::run`, mapped to a process exit code
/// in `main.rs` (spec.md §6 "Exit codes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Orderly shutdown with no error condition.
    Success,
    /// Fatal configuration or startup validation failure.
    ConfigError,
    /// A steady-state System/Configuration error triggered orderly shutdown.
    RuntimeError,
    /// An unexpected/system failure during startup.
    SystemError,
    /// Second termination signal, or the shutdown budget was exceeded.
    ForceExit,
}

impl ExitOutcome {
    pub fn code(self) -> u8 {
        match self {
            ExitOutcome::Success => 0,
            ExitOutcome::ConfigError => 1,
            ExitOutcome::RuntimeError => 2,
            ExitOutcome::SystemError => 3,
            ExitOutcome::ForceExit => 4,
        }
    }
}

/// Point-in-time health/status view (spec.md §4.1 `status()`), broadcast on
/// a `watch` channel so `Display` and any future caller can subscribe
/// without polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub connection_state: String,
    pub active_profile: String,
    pub uptime_secs: u64,
    pub readings_per_minute: f64,
    pub error_counts: HashMap<String, u64>,
    pub drive_active: bool,
}

impl StatusSnapshot {
    pub fn initial() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected.as_str().to_string(),
            active_profile: String::new(),
            uptime_secs: 0,
            readings_per_minute: 0.0,
            error_counts: HashMap::new(),
            drive_active: false,
        }
    }
}
