//! Entity types shared between the Store and the components that produce
//! or consume them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One sampled vehicle signal. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub timestamp_ms: u64,
    pub parameter: String,
    pub value: f64,
    pub unit: String,
    pub profile_id: Option<String>,
    pub drive_id: Option<Uuid>,
}

/// Comparison direction for a [`Threshold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Above,
    Below,
}

/// One alert rule: fire when `parameter` crosses `value` in `direction`,
/// no more often than every `cooldown_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threshold {
    pub id: String,
    pub parameter: String,
    pub direction: Direction,
    pub value: f64,
    pub cooldown_ms: u32,
}

/// A named tuning bundle: which parameters to poll, at what interval, and
/// which thresholds apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub thresholds: Vec<Threshold>,
    pub poll_interval_ms: u32,
}

/// One continuous drive, from a sustained engine-on condition to a
/// sustained engine-off condition. At most one may be open (`end_ts` unset)
/// at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveSession {
    pub id: Uuid,
    pub profile_id: String,
    pub start_ts: u64,
    pub end_ts: Option<u64>,
}

/// One fired alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub threshold_id: String,
    pub reading_ts: u64,
    pub value: f64,
    pub profile_id: Option<String>,
}

/// Post-drive statistics for one (drive, parameter) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub drive_id: Uuid,
    pub parameter: String,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub mode: f64,
    pub std1: f64,
    pub std2: f64,
    pub outlier_lo: f64,
    pub outlier_hi: f64,
}

/// Kind of a [`ConnectionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEventKind {
    Connected,
    Disconnected,
    DriveStart,
    DriveEnd,
}

/// One orchestrator-level lifecycle/connection transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub ts: u64,
    pub kind: ConnectionEventKind,
    pub detail: String,
}

/// Which rail is currently powering the SBC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerSource {
    Mains,
    Battery,
}

/// One UPS telemetry snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsSample {
    pub ts: u64,
    pub voltage_mv: u32,
    pub current_ma_signed: i32,
    pub soc_pct: f32,
    pub source: PowerSource,
}

/// VIN-keyed decoded vehicle identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub vin: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<u32>,
}

/// Outcome of one backup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStatus {
    Success,
    Failed,
}

/// Kind of artifact a [`BackupRecord`] covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    Database,
    Logs,
}

/// One backup attempt outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub ts: u64,
    pub kind: BackupKind,
    pub bytes: u64,
    pub remote_path: String,
    pub local_path: String,
    pub status: BackupStatus,
}
