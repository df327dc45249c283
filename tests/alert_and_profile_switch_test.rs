// S4 from spec.md §8: alert cooldown bounds the fired-alert rate over a
// long reading stream, and ProfileSwitcher + AlertEngine::reload() pick up
// a newly-active profile's thresholds only at a drive boundary.

use std::time::{Duration, Instant};
use vigil::alerts::AlertEngine;
use vigil::config::ProfilesConfig;
use vigil::profile_switcher::ProfileSwitcher;
use vigil::profiles::ProfileStore;
use vigil::store::model::{Direction, Profile, Reading, Threshold};
use vigil::store::Store;

fn profile(id: &str, threshold_value: f64, cooldown_ms: u32) -> Profile {
    Profile {
        id: id.to_string(),
        name: id.to_string(),
        thresholds: vec![Threshold {
            id: format!("{id}-coolant-high"),
            parameter: "COOLANT_TEMP".to_string(),
            direction: Direction::Above,
            value: threshold_value,
            cooldown_ms,
        }],
        poll_interval_ms: 1000,
    }
}

fn reading(value: f64, ts: u64) -> Reading {
    Reading {
        timestamp_ms: ts,
        parameter: "COOLANT_TEMP".to_string(),
        value,
        unit: "celsius".to_string(),
        profile_id: Some("daily".to_string()),
        drive_id: None,
    }
}

#[test]
fn alert_rate_is_bounded_by_cooldown_over_a_long_stream() {
    let mut engine = AlertEngine::new(&profile("daily", 100.0, 10_000));
    let t0 = Instant::now();
    let mut fired = 0;
    for sec in 0..40u64 {
        fired += engine
            .evaluate(&reading(110.0, sec * 1000), t0 + Duration::from_secs(sec))
            .len();
    }
    // period=1s < cooldown=10s over 40s -> fires at t=0,10,20,30.
    assert_eq!(fired, 4);
}

#[test]
fn pending_profile_switch_only_applies_at_drive_boundary() {
    let store = Store::open_in_memory().unwrap();
    let profiles = ProfileStore::from_config(&ProfilesConfig::default(), &store).unwrap();
    let switcher = ProfileSwitcher::new();
    let mut engine = AlertEngine::new(&profile("daily", 100.0, 30_000));

    switcher.request_switch("performance".to_string());
    assert!(switcher.has_pending());
    assert_eq!(profiles.active_id(), "daily");

    // Still using the "daily" profile's threshold until a boundary applies it.
    let t0 = Instant::now();
    assert_eq!(engine.evaluate(&reading(110.0, 0), t0).len(), 1);

    // Drive boundary: apply the pending switch and reload thresholds.
    let pending = switcher
        .apply_pending(&profiles)
        .unwrap()
        .expect("a switch was pending");
    assert_eq!(pending, "performance");
    assert_eq!(profiles.active_id(), "performance");
    assert!(!switcher.has_pending());

    engine.reload(&profile("performance", 130.0, 30_000));
    // Old threshold (100) no longer applies; new one (130) does.
    assert!(engine.evaluate(&reading(110.0, 1000), t0).is_empty());
    assert_eq!(engine.evaluate(&reading(140.0, 2000), t0).len(), 1);
}
