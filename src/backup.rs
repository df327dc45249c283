//! BackupCoordinator: periodic off-device snapshot of the database (and,
//! optionally, rotated log files), with a catch-up check at startup so a
//! device that was powered off past its schedule still backs up promptly.
//!
//! Grounded on `updater::GitUpdater`'s atomic local-file handling (download
//! to a staging path, `sync_all`, rename with an EXDEV-safe copy fallback)
//! for writing the snapshot, and on `vin::VinResolver`'s `reqwest::Client`
//! usage for the (stubbed) remote uploader.

use crate::config::BackupConfig;
use crate::error::{Result, VigilError};
use crate::logging::{StructuredLogger, get_logger};
use crate::store::Store;
use crate::store::model::{BackupKind, BackupRecord, BackupStatus};
use async_trait::async_trait;
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Destination for a finished local snapshot file. Implementations decide
/// what "uploaded" means; the coordinator only needs a remote path string
/// back to record in the `BackupRecord`.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, local_path: &Path, kind: BackupKind) -> Result<String>;
}

/// Uploads by copying into another local directory. Used when
/// `backup.remote_target` is a filesystem path (the common case for a
/// USB stick or NAS mount) and by tests.
pub struct FilesystemUploader {
    target_dir: PathBuf,
}

impl FilesystemUploader {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
        }
    }
}

#[async_trait]
impl Uploader for FilesystemUploader {
    async fn upload(&self, local_path: &Path, _kind: BackupKind) -> Result<String> {
        std::fs::create_dir_all(&self.target_dir)?;
        let file_name = local_path
            .file_name()
            .ok_or_else(|| VigilError::store("snapshot path has no file name"))?;
        let dest = self.target_dir.join(file_name);
        atomic_copy(local_path, &dest)?;
        Ok(dest.display().to_string())
    }
}

/// No-op uploader used when `remote_target` is empty: the snapshot is
/// produced and recorded locally but never shipped off-device.
pub struct NullUploader;

#[async_trait]
impl Uploader for NullUploader {
    async fn upload(&self, local_path: &Path, _kind: BackupKind) -> Result<String> {
        Ok(local_path.display().to_string())
    }
}

pub struct BackupCoordinator {
    store: Store,
    db_path: PathBuf,
    folder_path: PathBuf,
    catchup_days: u32,
    schedule_time: (u32, u32),
    max_backups: u32,
    gzip: bool,
    uploader: Box<dyn Uploader>,
    logger: StructuredLogger,
}

impl BackupCoordinator {
    pub fn new(
        cfg: &BackupConfig,
        db_path: impl Into<PathBuf>,
        store: Store,
        uploader: Box<dyn Uploader>,
    ) -> Result<Self> {
        let schedule_time = parse_hh_mm(&cfg.schedule_time)?;
        Ok(Self {
            store,
            db_path: db_path.into(),
            folder_path: PathBuf::from(&cfg.folder_path),
            catchup_days: cfg.catchup_days,
            schedule_time,
            max_backups: cfg.max_backups,
            gzip: cfg.gzip,
            uploader,
            logger: get_logger("backup"),
        })
    }

    /// Record that a drive just ended (routing row: `drive_end ->
    /// BackupCoordinator`). The coordinator itself is schedule-driven, not
    /// drive-driven, so this is currently an observability hook rather than
    /// a trigger — kept distinct from `run_backup` so a future retention
    /// policy keyed on drive count has somewhere to live.
    pub fn note_drive_completed(&self, drive_id: uuid::Uuid) {
        self.logger
            .debug(&format!("drive {} completed, no backup policy keyed on it yet", drive_id));
    }

    /// Run once at startup: if the last successful database backup is
    /// older than `catchup_days` (or there has never been one), back up
    /// immediately instead of waiting for the next scheduled time.
    pub async fn run_catchup_if_due(&self) -> Result<()> {
        let now_ms = now_ms();
        let last = self.store.last_successful_backup_ts(BackupKind::Database)?;
        let due = match last {
            None => true,
            Some(ts) => {
                let age_ms = now_ms.saturating_sub(ts);
                age_ms > u64::from(self.catchup_days) * 24 * 3_600 * 1_000
            }
        };
        if due {
            self.logger.info("catch-up backup due at startup");
            self.run_backup().await?;
        }
        Ok(())
    }

    /// Returns `true` if, given `now`, a scheduled backup should run — the
    /// caller (orchestrator) checks this once a minute and fires at most
    /// once per calendar day.
    pub fn is_scheduled_now(&self, now: chrono::DateTime<chrono::Local>) -> bool {
        let (hour, minute) = self.schedule_time;
        now.hour() == hour && now.minute() == minute
    }

    /// Snapshot the database (WAL-checkpointed first), optionally gzip it,
    /// upload it, record the outcome, then enforce retention.
    pub async fn run_backup(&self) -> Result<BackupRecord> {
        self.store.checkpoint_for_backup()?;

        let result = self.snapshot_and_upload().await;
        let record = match result {
            Ok((local_path, bytes, remote_path)) => BackupRecord {
                ts: now_ms(),
                kind: BackupKind::Database,
                bytes,
                remote_path,
                local_path: local_path.display().to_string(),
                status: BackupStatus::Success,
            },
            Err(e) => {
                self.logger.error(&format!("backup failed: {}", e));
                BackupRecord {
                    ts: now_ms(),
                    kind: BackupKind::Database,
                    bytes: 0,
                    remote_path: String::new(),
                    local_path: String::new(),
                    status: BackupStatus::Failed,
                }
            }
        };
        self.store.insert_backup_record(&record)?;
        if record.status == BackupStatus::Success {
            self.record_metadata_sidecar(&record);
            self.enforce_retention()?;
        }
        Ok(record)
    }

    async fn snapshot_and_upload(&self) -> Result<(PathBuf, u64, String)> {
        std::fs::create_dir_all(&self.folder_path)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let extension = if self.gzip { "db.gz" } else { "db" };
        let snapshot_path = self
            .folder_path
            .join(format!("obd_backup_{}.{}", stamp, extension));

        let bytes = if self.gzip {
            gzip_file(&self.db_path, &snapshot_path)?
        } else {
            atomic_copy(&self.db_path, &snapshot_path)?;
            std::fs::metadata(&snapshot_path)?.len()
        };

        let remote_path = self.uploader.upload(&snapshot_path, BackupKind::Database).await?;
        Ok((snapshot_path, bytes, remote_path))
    }

    /// Update `backup.folder_path/backup_metadata.json` with this success
    /// (spec.md §6 "On-disk state layout": the sidecar "record[s] the most
    /// recent successes"). Best-effort: a failure here only demotes to a
    /// WARNING since the `backup_records` table remains the source of truth
    /// for `run_catchup_if_due`/`is_scheduled_now`.
    fn record_metadata_sidecar(&self, record: &BackupRecord) {
        let path = self.folder_path.join("backup_metadata.json");
        let mut metadata = read_metadata_sidecar(&path).unwrap_or_default();
        metadata.last_success.insert(
            backup_kind_name(record.kind).to_string(),
            BackupMetadataEntry {
                ts: record.ts,
                local_path: record.local_path.clone(),
                remote_path: record.remote_path.clone(),
                bytes: record.bytes,
            },
        );
        if let Err(e) = write_metadata_sidecar(&path, &metadata) {
            self.logger
                .warn(&format!("failed to update backup metadata sidecar: {}", e));
        }
    }

    /// Delete local snapshot files beyond `max_backups`, keeping at least
    /// one regardless of configuration.
    fn enforce_retention(&self) -> Result<()> {
        let stale = self
            .store
            .backups_beyond_retention(BackupKind::Database, self.max_backups)?;
        for path in stale {
            if let Err(e) = std::fs::remove_file(&path) {
                self.logger
                    .warn(&format!("failed to remove rotated backup {}: {}", path, e));
            }
        }
        Ok(())
    }
}

/// `backup_metadata.json` contents: the most recent successful backup per
/// kind, keyed by [`backup_kind_name`] (spec.md §6 "On-disk state layout").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BackupMetadataFile {
    #[serde(default)]
    last_success: HashMap<String, BackupMetadataEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackupMetadataEntry {
    ts: u64,
    local_path: String,
    remote_path: String,
    bytes: u64,
}

fn backup_kind_name(kind: BackupKind) -> &'static str {
    match kind {
        BackupKind::Database => "database",
        BackupKind::Logs => "logs",
    }
}

fn read_metadata_sidecar(path: &Path) -> Option<BackupMetadataFile> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_metadata_sidecar(path: &Path, metadata: &BackupMetadataFile) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let raw = serde_json::to_vec_pretty(metadata)?;
    std::fs::write(&tmp, raw)?;
    match std::fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(&tmp, path)?;
            let _ = std::fs::remove_file(&tmp);
            Ok(())
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn parse_hh_mm(s: &str) -> Result<(u32, u32)> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| VigilError::config(format!("invalid backup.schedule_time '{}': expected HH:MM", s)))?;
    let hour: u32 = h
        .parse()
        .map_err(|_| VigilError::config(format!("invalid backup.schedule_time hour in '{}'", s)))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| VigilError::config(format!("invalid backup.schedule_time minute in '{}'", s)))?;
    if hour > 23 || minute > 59 {
        return Err(VigilError::config(format!(
            "backup.schedule_time '{}' out of range",
            s
        )));
    }
    Ok((hour, minute))
}

/// Copy `src` to a temp file beside `dest`, `fsync`, then rename into
/// place — matching the updater's replace-current-executable pattern so a
/// crash mid-write never leaves a half-written snapshot at the final path.
fn atomic_copy(src: &Path, dest: &Path) -> Result<()> {
    let tmp = dest.with_extension("tmp");
    {
        let mut from = std::fs::File::open(src)?;
        let mut to = std::fs::File::create(&tmp)?;
        std::io::copy(&mut from, &mut to)?;
        to.sync_all()?;
    }
    match std::fs::rename(&tmp, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Cross-device rename: fall back to copy, then drop the temp file.
            std::fs::copy(&tmp, dest)?;
            let _ = std::fs::remove_file(&tmp);
            Ok(())
        }
    }
}

fn gzip_file(src: &Path, dest: &Path) -> Result<u64> {
    let tmp = dest.with_extension("tmp");
    let bytes = {
        let mut input = std::fs::File::open(src)?;
        let output = std::fs::File::create(&tmp)?;
        let mut encoder = flate2::write::GzEncoder::new(output, flate2::Compression::default());
        std::io::copy(&mut input, &mut encoder)?;
        let output = encoder.finish()?;
        output.sync_all()?;
        output.metadata()?.len()
    };
    match std::fs::rename(&tmp, dest) {
        Ok(()) => Ok(bytes),
        Err(_) => {
            std::fs::copy(&tmp, dest)?;
            let _ = std::fs::remove_file(&tmp);
            Ok(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupConfig;

    fn cfg(folder: &Path) -> BackupConfig {
        BackupConfig {
            folder_path: folder.display().to_string(),
            catchup_days: 2,
            schedule_time: "03:00".to_string(),
            max_backups: 2,
            gzip: false,
            remote_target: String::new(),
        }
    }

    #[test]
    fn parses_and_rejects_schedule_times() {
        assert_eq!(parse_hh_mm("03:00").unwrap(), (3, 0));
        assert_eq!(parse_hh_mm("23:59").unwrap(), (23, 59));
        assert!(parse_hh_mm("24:00").is_err());
        assert!(parse_hh_mm("not-a-time").is_err());
    }

    #[tokio::test]
    async fn run_backup_snapshots_uploads_and_records() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("vigil.db");
        let store = Store::open(&db_path).unwrap();
        let backups_dir = tmp.path().join("backups");
        let remote_dir = tmp.path().join("remote");

        let coordinator = BackupCoordinator::new(
            &cfg(&backups_dir),
            &db_path,
            store.clone(),
            Box::new(FilesystemUploader::new(&remote_dir)),
        )
        .unwrap();

        let record = coordinator.run_backup().await.unwrap();
        assert_eq!(record.status, BackupStatus::Success);
        assert!(record.bytes > 0);
        assert!(Path::new(&record.local_path).exists());
        assert!(remote_dir.exists());
    }

    #[tokio::test]
    async fn retention_keeps_at_least_one_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("vigil.db");
        let store = Store::open(&db_path).unwrap();
        let backups_dir = tmp.path().join("backups");

        let mut backup_cfg = cfg(&backups_dir);
        backup_cfg.max_backups = 1;
        let coordinator = BackupCoordinator::new(
            &backup_cfg,
            &db_path,
            store.clone(),
            Box::new(NullUploader),
        )
        .unwrap();

        for _ in 0..3 {
            coordinator.run_backup().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        }

        let remaining = std::fs::read_dir(&backups_dir)
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("obd_backup_"))
            .count();
        assert_eq!(remaining, 1, "max_backups=1 should retain exactly one snapshot file");
    }

    #[tokio::test]
    async fn catchup_runs_when_no_prior_backup_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("vigil.db");
        let store = Store::open(&db_path).unwrap();
        let backups_dir = tmp.path().join("backups");

        let coordinator = BackupCoordinator::new(
            &cfg(&backups_dir),
            &db_path,
            store.clone(),
            Box::new(NullUploader),
        )
        .unwrap();

        coordinator.run_catchup_if_due().await.unwrap();
        assert!(
            store
                .last_successful_backup_ts(BackupKind::Database)
                .unwrap()
                .is_some()
        );
    }
}
