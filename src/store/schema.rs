//! Idempotent schema creation. Every statement is `CREATE TABLE IF NOT
//! EXISTS`; running this against a populated database must preserve every
//! existing row.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp_ms INTEGER NOT NULL,
    parameter TEXT NOT NULL,
    value REAL NOT NULL,
    unit TEXT NOT NULL,
    profile_id TEXT REFERENCES profiles(id),
    drive_id TEXT REFERENCES drive_sessions(id)
);
CREATE INDEX IF NOT EXISTS idx_readings_drive ON readings(drive_id);
CREATE INDEX IF NOT EXISTS idx_readings_ts ON readings(timestamp_ms);

CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    poll_interval_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS thresholds (
    id TEXT PRIMARY KEY,
    profile_id TEXT NOT NULL REFERENCES profiles(id),
    parameter TEXT NOT NULL,
    direction TEXT NOT NULL,
    value REAL NOT NULL,
    cooldown_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS drive_sessions (
    id TEXT PRIMARY KEY,
    profile_id TEXT NOT NULL,
    start_ts INTEGER NOT NULL,
    end_ts INTEGER
);
CREATE INDEX IF NOT EXISTS idx_drive_sessions_open ON drive_sessions(end_ts);

CREATE TABLE IF NOT EXISTS alert_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    threshold_id TEXT NOT NULL,
    reading_ts INTEGER NOT NULL,
    value REAL NOT NULL,
    profile_id TEXT
);

CREATE TABLE IF NOT EXISTS analysis_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    drive_id TEXT NOT NULL REFERENCES drive_sessions(id),
    parameter TEXT NOT NULL,
    min REAL NOT NULL,
    max REAL NOT NULL,
    avg REAL NOT NULL,
    mode REAL NOT NULL,
    std1 REAL NOT NULL,
    std2 REAL NOT NULL,
    outlier_lo REAL NOT NULL,
    outlier_hi REAL NOT NULL,
    UNIQUE(drive_id, parameter)
);

CREATE TABLE IF NOT EXISTS connection_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    kind TEXT NOT NULL,
    detail TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ups_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    voltage_mv INTEGER NOT NULL,
    current_ma_signed INTEGER NOT NULL,
    soc_pct REAL NOT NULL,
    source TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vehicle_info (
    vin TEXT PRIMARY KEY,
    make TEXT,
    model TEXT,
    year INTEGER
);

CREATE TABLE IF NOT EXISTS backup_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    kind TEXT NOT NULL,
    bytes INTEGER NOT NULL,
    remote_path TEXT NOT NULL,
    local_path TEXT NOT NULL,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_backup_records_kind_ts ON backup_records(kind, ts);
"#;
