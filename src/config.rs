//! Configuration management for vigil
//!
//! Loads, validates, and exposes the application configuration from a YAML
//! file, with `${VAR}` / `${VAR:default}` placeholders resolved against the
//! process environment before parsing.

use crate::error::{Result, VigilError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

/// Root configuration structure. Every recognized section is enumerated
/// with its type and default; unknown top-level keys are rejected by serde's
/// default (non-`deny_unknown_fields`) behavior at validation time via
/// [`Config::validate`], since `serde_yaml` alone does not reject them.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    pub application: ApplicationConfig,
    pub database: DatabaseConfig,
    pub bluetooth: BluetoothConfig,
    pub logging: LoggingConfig,
    pub profiles: ProfilesConfig,
    #[serde(rename = "realtimeData")]
    pub realtime_data: RealtimeDataConfig,
    pub analysis: AnalysisConfig,
    pub alerts: AlertsConfig,
    #[serde(rename = "aiAnalysis")]
    pub ai_analysis: AiAnalysisConfig,
    pub backup: BackupConfig,
    pub hardware: HardwareConfig,
    pub simulator: SimulatorConfig,
}

/// General application identity/behavior
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Deployment environment label (from APP_ENVIRONMENT)
    pub environment: String,

    /// Directory analysis exports and ad-hoc dumps are written to (from EXPORT_DIR)
    pub export_dir: String,
}

/// Embedded database location and retention policy
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the database file (from DB_PATH)
    pub path: String,

    /// Days of Reading rows to retain before the periodic vacuum reclaims them
    pub retention_days: u32,

    /// Interval between vacuum passes
    pub vacuum_interval_hours: u32,
}

/// Bluetooth serial connection to the ELM327-compatible dongle
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BluetoothConfig {
    /// MAC address of the dongle (from OBD_BT_MAC), required outside simulator mode
    pub mac: String,

    /// RFCOMM channel to bind
    pub channel: u8,

    /// Connect attempt timeout
    pub connect_timeout_ms: u64,

    /// Per-query timeout
    pub query_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file (from LOG_FILE)
    pub file: String,

    /// Max log file size in MB before rotation
    pub max_file_size_mb: u32,

    /// Number of rotated backup files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON formatting for emitted lines
    pub json_format: bool,

    /// Console sink level override
    pub console_level: Option<String>,

    /// File sink level override
    pub file_level: Option<String>,

    /// Display status-banner level override
    pub display_level: Option<String>,
}

/// One named tuning profile
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProfileConfig {
    pub id: String,
    pub name: String,
    pub poll_interval_ms: u32,
    #[serde(default)]
    pub thresholds: Vec<ThresholdConfig>,
}

/// One alert threshold definition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ThresholdConfig {
    pub parameter: String,
    pub direction: ThresholdDirection,
    pub value: f64,
    pub cooldown_ms: u32,
}

/// Direction of a threshold comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    Above,
    Below,
}

/// Profile selection and catalog
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ProfilesConfig {
    pub active_profile: String,
    pub available_profiles: Vec<ProfileConfig>,
}

/// Which parameters Poller samples, and at what default interval
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RealtimeDataConfig {
    pub enabled_parameters: Vec<String>,
    pub poll_interval_ms: u32,
}

/// DriveDetector thresholds (called "analysis" per the recognized config sections)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AnalysisConfig {
    pub start_rpm: f64,
    pub start_hold_ms: u64,
    pub end_rpm: f64,
    pub end_hold_ms: u64,
}

/// AlertEngine-wide defaults; per-threshold values live on each profile
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AlertsConfig {
    pub default_cooldown_ms: u32,
}

/// Optional LLM-based post-drive analysis client
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct AiAnalysisConfig {
    pub enabled: bool,
    /// Base URL of the inference host (from OLLAMA_BASE_URL)
    pub base_url: String,
    /// Model name (from AI_MODEL)
    pub model: String,
    pub timeout_secs: u64,
    pub focus_areas: Vec<String>,
}

/// Backup scheduling and retention
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BackupConfig {
    pub folder_path: String,
    pub catchup_days: u32,
    /// Wall-clock local time to run the daily backup, "HH:MM"
    pub schedule_time: String,
    pub max_backups: u32,
    pub gzip: bool,
    /// Opaque remote destination handed to the uploader; empty disables upload
    pub remote_target: String,
}

/// UPS, GPIO button and status display
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct HardwareConfig {
    pub i2c_bus: String,
    pub i2c_addr: u8,
    pub gpio_chip: String,
    pub gpio_button_pin: u32,
    pub ups_poll_interval_ms: u64,
    pub shutdown_delay_s: u32,
    pub low_soc_pct: f32,
    pub display_enabled: bool,
    pub display_refresh_ms: u64,
}

/// Simulator mode knobs, used when `--simulate` is passed
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SimulatorConfig {
    pub enabled: bool,
    pub seed: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            export_dir: "/tmp/vigil-exports".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "/data/vigil.db".to_string(),
            retention_days: 365,
            vacuum_interval_hours: 24,
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            mac: String::new(),
            channel: 1,
            connect_timeout_ms: 10_000,
            query_timeout_ms: 2_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "logs/service.log".to_string(),
            max_file_size_mb: 10,
            backup_count: 5,
            console_output: true,
            json_format: false,
            console_level: None,
            file_level: None,
            display_level: None,
        }
    }
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            active_profile: "daily".to_string(),
            available_profiles: vec![
                ProfileConfig {
                    id: "daily".to_string(),
                    name: "Daily driving".to_string(),
                    poll_interval_ms: 1000,
                    thresholds: vec![ThresholdConfig {
                        parameter: "COOLANT_TEMP".to_string(),
                        direction: ThresholdDirection::Above,
                        value: 110.0,
                        cooldown_ms: 60_000,
                    }],
                },
                ProfileConfig {
                    id: "performance".to_string(),
                    name: "Performance driving".to_string(),
                    poll_interval_ms: 250,
                    thresholds: vec![
                        ThresholdConfig {
                            parameter: "RPM".to_string(),
                            direction: ThresholdDirection::Above,
                            value: 6500.0,
                            cooldown_ms: 5_000,
                        },
                        ThresholdConfig {
                            parameter: "COOLANT_TEMP".to_string(),
                            direction: ThresholdDirection::Above,
                            value: 115.0,
                            cooldown_ms: 30_000,
                        },
                    ],
                },
            ],
        }
    }
}

impl Default for RealtimeDataConfig {
    fn default() -> Self {
        Self {
            enabled_parameters: vec![
                "RPM".to_string(),
                "SPEED".to_string(),
                "COOLANT_TEMP".to_string(),
                "FUEL_LEVEL".to_string(),
            ],
            poll_interval_ms: 1000,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            start_rpm: 500.0,
            start_hold_ms: 10_000,
            end_rpm: 0.0,
            end_hold_ms: 60_000,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            default_cooldown_ms: 30_000,
        }
    }
}

impl Default for AiAnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            timeout_secs: 120,
            focus_areas: Vec::new(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            folder_path: "/data/backups".to_string(),
            catchup_days: 2,
            schedule_time: "03:00".to_string(),
            max_backups: 30,
            gzip: true,
            remote_target: String::new(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            i2c_bus: "/dev/i2c-1".to_string(),
            i2c_addr: 0x36,
            gpio_chip: "/dev/gpiochip0".to_string(),
            gpio_button_pin: 17,
            ups_poll_interval_ms: 5_000,
            shutdown_delay_s: 30,
            low_soc_pct: 10.0,
            display_enabled: true,
            display_refresh_ms: 1000,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            seed: 42,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            database: DatabaseConfig::default(),
            bluetooth: BluetoothConfig::default(),
            logging: LoggingConfig::default(),
            profiles: ProfilesConfig::default(),
            realtime_data: RealtimeDataConfig::default(),
            analysis: AnalysisConfig::default(),
            alerts: AlertsConfig::default(),
            ai_analysis: AiAnalysisConfig::default(),
            backup: BackupConfig::default(),
            hardware: HardwareConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

/// Required environment variables recognized for `${VAR}`/`${VAR:default}`
/// expansion, documented so `validate()` can name an offending key.
pub const RECOGNIZED_ENV_VARS: &[&str] = &[
    "OBD_BT_MAC",
    "DB_PATH",
    "LOG_LEVEL",
    "LOG_FILE",
    "EXPORT_DIR",
    "OLLAMA_BASE_URL",
    "AI_MODEL",
    "APP_ENVIRONMENT",
];

/// Expand `${VAR}` and `${VAR:default}` placeholders in raw config text
/// against the process environment. A placeholder with no default and no
/// matching environment variable is left untouched so `validate()` can
/// surface it as a clear configuration error instead of silently emptying
/// the field.
fn expand_placeholders(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after_marker = &rest[start + 2..];
        match after_marker.find('}') {
            Some(close) => {
                let inner = &after_marker[..close];
                let (name, default) = match inner.split_once(':') {
                    Some((n, d)) => (n, Some(d)),
                    None => (inner, None),
                };
                match std::env::var(name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => match default {
                        Some(d) => out.push_str(d),
                        None => out.push_str(&rest[start..start + 2 + close + 1]),
                    },
                }
                rest = &after_marker[close + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

impl Config {
    /// Load configuration from a YAML file, resolving placeholders first
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let expanded = expand_placeholders(&contents);
        let config: Config = serde_yaml::from_str(&expanded)?;
        Ok(config)
    }

    /// Load configuration, searching the default locations in order
    pub fn load() -> Result<Self> {
        let default_paths = [
            "vigil_config.yaml",
            "/data/vigil_config.yaml",
            "/etc/vigil/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration. `simulate` relaxes the bluetooth MAC
    /// requirement since the simulator never opens a serial port.
    pub fn validate(&self, simulate: bool) -> Result<()> {
        if self.database.path.is_empty() {
            return Err(VigilError::validation(
                "database.path",
                "path cannot be empty",
            ));
        }

        if !simulate && !self.simulator.enabled && self.bluetooth.mac.is_empty() {
            return Err(VigilError::validation(
                "bluetooth.mac",
                "required unless running in simulator mode (unresolved ${OBD_BT_MAC}?)",
            ));
        }

        if self.realtime_data.poll_interval_ms == 0 {
            return Err(VigilError::validation(
                "realtimeData.poll_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.profiles.active_profile.trim().is_empty() {
            return Err(VigilError::validation(
                "profiles.activeProfile",
                "must name a profile id",
            ));
        }

        if !self
            .profiles
            .available_profiles
            .iter()
            .any(|p| p.id == self.profiles.active_profile)
        {
            return Err(VigilError::validation(
                "profiles.activeProfile",
                "does not match any entry in availableProfiles",
            ));
        }

        for profile in &self.profiles.available_profiles {
            if profile.poll_interval_ms == 0 {
                return Err(VigilError::validation(
                    "profiles.availableProfiles[].poll_interval_ms",
                    "must be greater than 0",
                ));
            }
        }

        if self.backup.max_backups == 0 {
            return Err(VigilError::validation(
                "backup.max_backups",
                "must retain at least 1 backup",
            ));
        }

        if self.hardware.low_soc_pct <= 0.0 || self.hardware.low_soc_pct >= 100.0 {
            return Err(VigilError::validation(
                "hardware.low_soc_pct",
                "must be between 0 and 100",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.profiles.active_profile, "daily");
        assert_eq!(config.realtime_data.poll_interval_ms, 1000);
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn test_config_validation_requires_mac_outside_simulator() {
        let config = Config::default();
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn test_config_validation_rejects_unknown_active_profile() {
        let mut config = Config::default();
        config.profiles.active_profile = "nonexistent".to_string();
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            config.profiles.active_profile,
            deserialized.profiles.active_profile
        );
    }

    #[test]
    fn test_expand_placeholders_with_default() {
        let raw = "mac: \"${OBD_BT_MAC:AA:BB:CC:DD:EE:FF}\"";
        let expanded = expand_placeholders(raw);
        assert_eq!(expanded, "mac: \"AA:BB:CC:DD:EE:FF\"");
    }

    #[test]
    fn test_expand_placeholders_from_env() {
        // SAFETY: test-local var name, no concurrent writer in this process.
        unsafe {
            std::env::set_var("VIGIL_TEST_PLACEHOLDER_VAR", "value-from-env");
        }
        let raw = "x: \"${VIGIL_TEST_PLACEHOLDER_VAR}\"";
        assert_eq!(expand_placeholders(raw), "x: \"value-from-env\"");
        unsafe {
            std::env::remove_var("VIGIL_TEST_PLACEHOLDER_VAR");
        }
    }

    #[test]
    fn test_expand_placeholders_missing_no_default_left_untouched() {
        let raw = "x: \"${VIGIL_TEST_TOTALLY_UNSET_VAR}\"";
        assert_eq!(expand_placeholders(raw), raw);
    }

    #[test]
    fn test_expand_placeholders_preserves_multibyte_characters() {
        let raw = "name: \"Dagelijks rijden — café run\"\nmac: \"${OBD_BT_MAC:AA:BB:CC:DD:EE:FF}\"";
        let expanded = expand_placeholders(raw);
        assert!(expanded.starts_with("name: \"Dagelijks rijden — café run\"\n"));
        assert!(expanded.ends_with("mac: \"AA:BB:CC:DD:EE:FF\""));
    }
}
