// S1/S3 from spec.md §8: a drive session opens in the Store on
// drive_start, readings tagged with its id accumulate, and StatsEngine
// aggregates them into an AnalysisResult once the drive ends.

use std::time::{Duration, Instant};
use uuid::Uuid;
use vigil::config::AnalysisConfig;
use vigil::drive::{DriveDetector, DriveEvent};
use vigil::stats::StatsEngine;
use vigil::store::model::{DriveSession, Reading};
use vigil::store::Store;

fn analysis_cfg() -> AnalysisConfig {
    AnalysisConfig {
        start_rpm: 500.0,
        start_hold_ms: 5_000,
        end_rpm: 0.0,
        end_hold_ms: 5_000,
    }
}

fn reading(drive_id: Uuid, parameter: &str, value: f64, ts: u64) -> Reading {
    Reading {
        timestamp_ms: ts,
        parameter: parameter.to_string(),
        value,
        unit: "rpm".to_string(),
        profile_id: Some("daily".to_string()),
        drive_id: Some(drive_id),
    }
}

#[test]
fn drive_start_to_stats_end_to_end() {
    let store = Store::open_in_memory().unwrap();
    let mut detector = DriveDetector::new(&analysis_cfg());
    let stats = StatsEngine::new(store.clone());

    let t0 = Instant::now();
    assert_eq!(detector.feed(1000.0, t0), None);
    let start = detector
        .feed(1000.0, t0 + Duration::from_secs(5))
        .expect("hold elapsed, drive should have started");
    let drive_id = match start {
        DriveEvent::Start { drive_id } => drive_id,
        DriveEvent::End { .. } => panic!("expected Start"),
    };

    assert!(!store.has_open_drive_session().unwrap());
    store
        .open_drive_session(&DriveSession {
            id: drive_id,
            profile_id: "daily".to_string(),
            start_ts: 0,
            end_ts: None,
        })
        .unwrap();
    assert!(store.has_open_drive_session().unwrap());

    // A second concurrent session is rejected while one is open.
    assert!(store
        .open_drive_session(&DriveSession {
            id: Uuid::new_v4(),
            profile_id: "daily".to_string(),
            start_ts: 1,
            end_ts: None,
        })
        .is_err());

    let readings: Vec<Reading> = (0..6)
        .map(|i| reading(drive_id, "RPM", 1500.0 + i as f64 * 10.0, i as u64 * 1000))
        .collect();
    store.insert_readings_batch(&readings).unwrap();

    assert_eq!(detector.feed(0.0, t0 + Duration::from_secs(6)), None);
    let end = detector
        .feed(0.0, t0 + Duration::from_secs(11))
        .expect("end hold elapsed, drive should have ended");
    assert_eq!(end, DriveEvent::End { drive_id });

    store.close_drive_session(drive_id, 6000).unwrap();
    assert!(!store.has_open_drive_session().unwrap());
    // Idempotent: closing an already-closed session is a no-op, not an error.
    store.close_drive_session(drive_id, 6000).unwrap();

    let rows = stats
        .compute_and_store(drive_id, &["RPM".to_string(), "SPEED".to_string()])
        .unwrap();
    // SPEED has no readings for this drive and is skipped entirely.
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.parameter, "RPM");
    assert!((row.min - 1500.0).abs() < 1e-9);
    assert!((row.max - 1550.0).abs() < 1e-9);
    assert!(row.avg > row.min && row.avg < row.max);
}
