use std::fs;
use vigil::config::Config;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("vigil_config.yaml");

    let mut cfg = Config::default();
    cfg.bluetooth.mac = "AA:BB:CC:DD:EE:FF".to_string();
    cfg.database.path = path.with_extension("db").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.bluetooth.mac, "AA:BB:CC:DD:EE:FF");
    assert_eq!(loaded.database.path, cfg.database.path);
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();
    cfg.bluetooth.mac = "AA:BB:CC:DD:EE:FF".to_string();
    assert!(cfg.validate(false).is_ok());

    // A vehicle MAC is required unless simulating.
    let mut no_mac = cfg.clone();
    no_mac.bluetooth.mac.clear();
    assert!(no_mac.validate(false).is_err());
    assert!(no_mac.validate(true).is_ok());

    // Empty database path.
    let mut no_db = cfg.clone();
    no_db.database.path.clear();
    assert!(no_db.validate(true).is_err());

    // Active profile must refer to a known catalog entry.
    let mut bad_profile = cfg.clone();
    bad_profile.profiles.active_profile = "nonexistent".to_string();
    assert!(bad_profile.validate(true).is_err());

    // Poll interval must be positive.
    let mut zero_poll = cfg.clone();
    zero_poll.realtime_data.poll_interval_ms = 0;
    assert!(zero_poll.validate(true).is_err());

    // low_soc_pct must be a valid percentage.
    let mut bad_soc = cfg.clone();
    bad_soc.hardware.low_soc_pct = 150.0;
    assert!(bad_soc.validate(true).is_err());

    // max_backups must keep at least one backup.
    let mut zero_backups = cfg;
    zero_backups.backup.max_backups = 0;
    assert!(zero_backups.validate(true).is_err());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("serialization error"));
}

#[test]
fn placeholder_expansion_reads_from_process_environment() {
    // SAFETY: test-only env mutation, no concurrent access to this var elsewhere.
    unsafe {
        std::env::set_var("VIGIL_TEST_MAC", "11:22:33:44:55:66");
    }
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(
        tmp.path(),
        b"bluetooth:\n  mac: \"${VIGIL_TEST_MAC}\"\n  channel: ${VIGIL_MISSING:7}\n",
    )
    .unwrap();

    let cfg = Config::from_file(tmp.path()).unwrap();
    assert_eq!(cfg.bluetooth.mac, "11:22:33:44:55:66");
    assert_eq!(cfg.bluetooth.channel, 7);

    unsafe {
        std::env::remove_var("VIGIL_TEST_MAC");
    }
}
