//! Embedded ACID database: write-ahead logging, foreign-key enforcement,
//! idempotent schema, batched reading writes.
//!
//! Every pooled connection gets `PRAGMA journal_mode=WAL; PRAGMA
//! foreign_keys=ON; PRAGMA synchronous=NORMAL;` applied before it is ever
//! handed to a caller (see [`PragmaCustomizer`]) — a connection that lacks
//! this setup is never observable outside this module.

pub mod model;
mod schema;

use crate::error::{Result, VigilError};
use crate::logging::{StructuredLogger, get_logger};
use model::{
    AlertEvent, AnalysisResult, BackupKind, BackupRecord, BackupStatus, ConnectionEvent,
    ConnectionEventKind, Direction, DriveSession, Reading, Threshold, UpsSample, VehicleInfo,
};
use r2d2::CustomizeConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use uuid::Uuid;

type Pool = r2d2::Pool<SqliteConnectionManager>;

#[derive(Debug)]
struct PragmaCustomizer;

impl CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA synchronous=NORMAL;",
        )
    }
}

/// Handle to the embedded database. Cheaply cloneable (the pool is an
/// `Arc` internally); the Orchestrator owns the single instance for the
/// process lifetime and every other component borrows it.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
    logger: StructuredLogger,
}

impl Store {
    /// Open (creating if absent) the database at `path` and run schema
    /// creation. Idempotent: safe to call against an already-populated file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let logger = get_logger("store");
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = r2d2::Pool::builder()
            .connection_customizer(Box::new(PragmaCustomizer))
            .max_size(4)
            .build(manager)
            .map_err(|e| VigilError::store(format!("failed to open pool: {}", e)))?;

        let store = Self { pool, logger };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory database, used by tests and `--dry-run` validation.
    pub fn open_in_memory() -> Result<Self> {
        let logger = get_logger("store");
        let manager = SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder()
            .connection_customizer(Box::new(PragmaCustomizer))
            .max_size(1)
            .build(manager)
            .map_err(|e| VigilError::store(format!("failed to open pool: {}", e)))?;
        let store = Self { pool, logger };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Idempotent schema creation.
    pub fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        self.logger.debug("schema initialized");
        Ok(())
    }

    /// Insert Profile + Threshold rows from config, replacing any prior
    /// definition for the same profile id (profiles are immutable at
    /// runtime, so this only ever runs at startup).
    pub fn upsert_profile(
        &self,
        id: &str,
        name: &str,
        poll_interval_ms: u32,
        thresholds: &[Threshold],
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO profiles (id, name, poll_interval_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name=excluded.name, poll_interval_ms=excluded.poll_interval_ms",
            params![id, name, poll_interval_ms],
        )?;
        tx.execute("DELETE FROM thresholds WHERE profile_id = ?1", params![id])?;
        for t in thresholds {
            tx.execute(
                "INSERT INTO thresholds (id, profile_id, parameter, direction, value, cooldown_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    t.id,
                    id,
                    t.parameter,
                    direction_str(t.direction),
                    t.value,
                    t.cooldown_ms
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert a batch of readings in a single transaction (5–10 rows is
    /// the expected batch size; any size is accepted).
    pub fn insert_readings_batch(&self, readings: &[Reading]) -> Result<()> {
        if readings.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for r in readings {
            tx.execute(
                "INSERT INTO readings (timestamp_ms, parameter, value, unit, profile_id, drive_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    r.timestamp_ms as i64,
                    r.parameter,
                    r.value,
                    r.unit,
                    r.profile_id,
                    r.drive_id.map(|u| u.to_string()),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Whether a DriveSession is currently open (no end_ts).
    pub fn has_open_drive_session(&self) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM drive_sessions WHERE end_ts IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn open_drive_session(&self, session: &DriveSession) -> Result<()> {
        if self.has_open_drive_session()? {
            return Err(VigilError::data(
                "cannot open a drive session while one is already open",
            ));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO drive_sessions (id, profile_id, start_ts, end_ts) VALUES (?1, ?2, ?3, NULL)",
            params![session.id.to_string(), session.profile_id, session.start_ts as i64],
        )?;
        Ok(())
    }

    /// Close the open session. Idempotent: closing an already-closed
    /// session (or when none is open) is a no-op, not an error.
    pub fn close_drive_session(&self, id: Uuid, end_ts: u64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE drive_sessions SET end_ts = ?1 WHERE id = ?2 AND end_ts IS NULL",
            params![end_ts as i64, id.to_string()],
        )?;
        Ok(())
    }

    pub fn insert_alert_event(&self, alert: &AlertEvent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO alert_events (threshold_id, reading_ts, value, profile_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                alert.threshold_id,
                alert.reading_ts as i64,
                alert.value,
                alert.profile_id
            ],
        )?;
        Ok(())
    }

    pub fn insert_analysis_results(&self, rows: &[AnalysisResult]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for r in rows {
            tx.execute(
                "INSERT INTO analysis_results
                    (drive_id, parameter, min, max, avg, mode, std1, std2, outlier_lo, outlier_hi)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(drive_id, parameter) DO UPDATE SET
                    min=excluded.min, max=excluded.max, avg=excluded.avg, mode=excluded.mode,
                    std1=excluded.std1, std2=excluded.std2,
                    outlier_lo=excluded.outlier_lo, outlier_hi=excluded.outlier_hi",
                params![
                    r.drive_id.to_string(),
                    r.parameter,
                    r.min,
                    r.max,
                    r.avg,
                    r.mode,
                    r.std1,
                    r.std2,
                    r.outlier_lo,
                    r.outlier_hi
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_connection_event(&self, ev: &ConnectionEvent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO connection_events (ts, kind, detail) VALUES (?1, ?2, ?3)",
            params![ev.ts as i64, connection_kind_str(ev.kind), ev.detail],
        )?;
        Ok(())
    }

    pub fn insert_ups_sample(&self, s: &UpsSample) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ups_samples (ts, voltage_mv, current_ma_signed, soc_pct, source)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                s.ts as i64,
                s.voltage_mv,
                s.current_ma_signed,
                s.soc_pct,
                power_source_str(s.source)
            ],
        )?;
        Ok(())
    }

    pub fn upsert_vehicle_info(&self, info: &VehicleInfo) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO vehicle_info (vin, make, model, year) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(vin) DO UPDATE SET make=excluded.make, model=excluded.model, year=excluded.year",
            params![info.vin, info.make, info.model, info.year],
        )?;
        Ok(())
    }

    pub fn get_vehicle_info(&self, vin: &str) -> Result<Option<VehicleInfo>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT vin, make, model, year FROM vehicle_info WHERE vin = ?1",
            params![vin],
            |row| {
                Ok(VehicleInfo {
                    vin: row.get(0)?,
                    make: row.get(1)?,
                    model: row.get(2)?,
                    year: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(VigilError::from)
    }

    pub fn insert_backup_record(&self, r: &BackupRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO backup_records (ts, kind, bytes, remote_path, local_path, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                r.ts as i64,
                backup_kind_str(r.kind),
                r.bytes as i64,
                r.remote_path,
                r.local_path,
                backup_status_str(r.status)
            ],
        )?;
        Ok(())
    }

    /// Timestamp of the most recent *successful* backup of `kind`, if any.
    pub fn last_successful_backup_ts(&self, kind: BackupKind) -> Result<Option<u64>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT ts FROM backup_records WHERE kind = ?1 AND status = 'success'
             ORDER BY ts DESC LIMIT 1",
            params![backup_kind_str(kind)],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map(|opt| opt.map(|v| v as u64))
        .map_err(VigilError::from)
    }

    /// Local paths of successful backups of `kind` beyond the most recent
    /// `max_backups`, oldest first — candidates for deletion by the caller.
    /// Never includes the single most recent file even if `max_backups` is 0,
    /// matching "never delete the only remaining file".
    pub fn backups_beyond_retention(
        &self,
        kind: BackupKind,
        max_backups: u32,
    ) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT local_path FROM backup_records WHERE kind = ?1 AND status = 'success'
             ORDER BY ts DESC",
        )?;
        let paths: Vec<String> = stmt
            .query_map(params![backup_kind_str(kind)], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        let keep = (max_backups.max(1)) as usize;
        if paths.len() <= keep {
            return Ok(Vec::new());
        }
        Ok(paths[keep..].to_vec())
    }

    pub fn readings_for_drive(&self, drive_id: Uuid, parameter: &str) -> Result<Vec<f64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT value FROM readings WHERE drive_id = ?1 AND parameter = ?2 ORDER BY timestamp_ms",
        )?;
        let values = stmt
            .query_map(params![drive_id.to_string(), parameter], |row| row.get(0))?
            .collect::<std::result::Result<Vec<f64>, _>>()?;
        Ok(values)
    }

    /// Delete Reading rows older than `retention_days` and reclaim space.
    /// Returns the number of rows removed.
    pub fn vacuum_old_readings(&self, retention_days: u32) -> Result<u64> {
        let cutoff_ms = chrono::Utc::now().timestamp_millis()
            - i64::from(retention_days) * 24 * 3600 * 1000;
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM readings WHERE timestamp_ms < ?1",
            params![cutoff_ms],
        )?;
        conn.execute_batch("VACUUM;")?;
        self.logger
            .info(&format!("vacuumed {} stale reading rows", removed));
        Ok(removed as u64)
    }

    /// Force a WAL checkpoint before a backup snapshot copies the file, so
    /// the on-disk main database file reflects every committed write.
    pub fn checkpoint_for_backup(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

fn direction_str(d: Direction) -> &'static str {
    match d {
        Direction::Above => "above",
        Direction::Below => "below",
    }
}

fn connection_kind_str(k: ConnectionEventKind) -> &'static str {
    match k {
        ConnectionEventKind::Connected => "connected",
        ConnectionEventKind::Disconnected => "disconnected",
        ConnectionEventKind::DriveStart => "drive_start",
        ConnectionEventKind::DriveEnd => "drive_end",
    }
}

fn power_source_str(s: crate::store::model::PowerSource) -> &'static str {
    match s {
        crate::store::model::PowerSource::Mains => "mains",
        crate::store::model::PowerSource::Battery => "battery",
    }
}

fn backup_kind_str(k: BackupKind) -> &'static str {
    match k {
        BackupKind::Database => "database",
        BackupKind::Logs => "logs",
    }
}

fn backup_status_str(s: BackupStatus) -> &'static str {
    match s {
        BackupStatus::Success => "success",
        BackupStatus::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::PowerSource;

    fn reading(ts: u64, parameter: &str, value: f64) -> Reading {
        Reading {
            timestamp_ms: ts,
            parameter: parameter.to_string(),
            value,
            unit: "rpm".to_string(),
            profile_id: Some("daily".to_string()),
            drive_id: None,
        }
    }

    #[test]
    fn schema_init_is_idempotent_and_preserves_rows() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_readings_batch(&[reading(1, "RPM", 800.0)])
            .unwrap();
        store.init_schema().unwrap();
        let values = {
            let conn = store.conn().unwrap();
            let mut stmt = conn.prepare("SELECT COUNT(*) FROM readings").unwrap();
            stmt.query_row([], |r| r.get::<_, i64>(0)).unwrap()
        };
        assert_eq!(values, 1);
    }

    #[test]
    fn reading_roundtrip_is_byte_identical() {
        let store = Store::open_in_memory().unwrap();
        let r = reading(1234, "COOLANT_TEMP", 91.5);
        store.insert_readings_batch(&[r.clone()]).unwrap();
        let values = store.readings_for_drive(Uuid::nil(), "COOLANT_TEMP").unwrap();
        // drive_id was None, so this lookup (by nil uuid) finds nothing;
        // verify instead via a raw query matching on timestamp.
        assert!(values.is_empty());
        let conn = store.conn().unwrap();
        let (ts, parameter, value, unit): (i64, String, f64, String) = conn
            .query_row(
                "SELECT timestamp_ms, parameter, value, unit FROM readings WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(ts as u64, r.timestamp_ms);
        assert_eq!(parameter, r.parameter);
        assert_eq!(value, r.value);
        assert_eq!(unit, r.unit);
    }

    #[test]
    fn only_one_open_drive_session_allowed() {
        let store = Store::open_in_memory().unwrap();
        let s1 = DriveSession {
            id: Uuid::new_v4(),
            profile_id: "daily".to_string(),
            start_ts: 1,
            end_ts: None,
        };
        store.open_drive_session(&s1).unwrap();
        assert!(store.has_open_drive_session().unwrap());

        let s2 = DriveSession {
            id: Uuid::new_v4(),
            profile_id: "daily".to_string(),
            start_ts: 2,
            end_ts: None,
        };
        assert!(store.open_drive_session(&s2).is_err());

        store.close_drive_session(s1.id, 10).unwrap();
        assert!(!store.has_open_drive_session().unwrap());
        // closing again is idempotent
        store.close_drive_session(s1.id, 20).unwrap();
    }

    #[test]
    fn backup_retention_keeps_at_least_one() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5u64 {
            store
                .insert_backup_record(&BackupRecord {
                    ts: i,
                    kind: BackupKind::Database,
                    bytes: 100,
                    remote_path: String::new(),
                    local_path: format!("/data/backups/db_{}.db", i),
                    status: BackupStatus::Success,
                })
                .unwrap();
        }
        let stale = store
            .backups_beyond_retention(BackupKind::Database, 2)
            .unwrap();
        assert_eq!(stale.len(), 3);

        let stale_when_none_configured = store
            .backups_beyond_retention(BackupKind::Database, 0)
            .unwrap();
        assert_eq!(stale_when_none_configured.len(), 4);
    }

    #[test]
    fn ups_sample_roundtrips_power_source() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_ups_sample(&UpsSample {
                ts: 1,
                voltage_mv: 12_600,
                current_ma_signed: -500,
                soc_pct: 92.0,
                source: PowerSource::Battery,
            })
            .unwrap();
        let conn = store.conn().unwrap();
        let source: String = conn
            .query_row("SELECT source FROM ups_samples WHERE id = 1", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(source, "battery");
    }
}
